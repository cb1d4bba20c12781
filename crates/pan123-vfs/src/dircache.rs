//! Directory cache
//!
//! A passive map from `(parent ID, name)` to a resolved leaf, plus the
//! parent-verification timestamps. The resolver owns the only handle and
//! mutates it; the cache itself never talks to the network, which keeps
//! the resolver/cache dependency one-directional.
//!
//! Negative results are never cached: a miss always goes back to the
//! server, so eventual-consistency propagation delays self-heal instead
//! of sticking.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use pan123_core::domain::newtypes::FileId;

/// A cached resolution of one directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedLeaf {
    /// Resolved ID
    pub id: FileId,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Name⇢ID cache local to one facade instance
#[derive(Debug, Default)]
pub struct DirCache {
    entries: DashMap<(i64, String), CachedLeaf>,
    verified_parents: RwLock<HashMap<i64, Instant>>,
}

impl DirCache {
    /// Creates an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a leaf under a parent
    #[must_use]
    pub fn get(&self, parent: FileId, name: &str) -> Option<CachedLeaf> {
        self.entries
            .get(&(parent.as_i64(), name.to_string()))
            .map(|e| *e.value())
    }

    /// Records a positive resolution
    pub fn put(&self, parent: FileId, name: &str, leaf: CachedLeaf) {
        self.entries
            .insert((parent.as_i64(), name.to_string()), leaf);
    }

    /// Forgets one entry (after a mutation touching it)
    pub fn invalidate(&self, parent: FileId, name: &str) {
        self.entries.remove(&(parent.as_i64(), name.to_string()));
    }

    /// Flushes everything, including parent verifications
    pub fn reset(&self) {
        debug!("directory cache reset");
        self.entries.clear();
        self.verified_parents
            .write()
            .expect("dircache lock poisoned")
            .clear();
    }

    /// Records that a parent was just confirmed to exist
    pub fn mark_parent_verified(&self, parent: FileId) {
        self.verified_parents
            .write()
            .expect("dircache lock poisoned")
            .insert(parent.as_i64(), Instant::now());
    }

    /// Forgets a parent verification (after removing the directory)
    pub fn forget_parent(&self, parent: FileId) {
        self.verified_parents
            .write()
            .expect("dircache lock poisoned")
            .remove(&parent.as_i64());
    }

    /// Whether the parent was confirmed within `ttl`
    #[must_use]
    pub fn parent_verified_within(&self, parent: FileId, ttl: Duration) -> bool {
        self.verified_parents
            .read()
            .expect("dircache lock poisoned")
            .get(&parent.as_i64())
            .is_some_and(|at| at.elapsed() < ttl)
    }
}
