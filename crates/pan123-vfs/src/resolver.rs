//! Path/ID resolver
//!
//! Resolves slash-delimited paths to server IDs by walking paginated
//! listings segment by segment, with the [`DirCache`] absorbing repeat
//! lookups. The resolver is the only writer of the cache; forced lookups
//! bypass it when the server may not have propagated a mutation yet.
//!
//! Listing names arrive URL-encoded and possibly padded; they are decoded
//! and trimmed once here, so every consumer sees local-form names, and
//! names on their way to the server go through the configured character
//! encoder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use pan123_api::client::{endpoints, error_means_duplicate, ApiClient};
use pan123_api::types::{FileListData, MkdirData, MkdirRequest};
use pan123_api::upload::ParentFixer;
use pan123_core::domain::encoding::Encoding;
use pan123_core::domain::entry::RemoteEntry;
use pan123_core::domain::newtypes::{FileId, RemotePath};
use pan123_core::{BackendError, Result};

use crate::dircache::{CachedLeaf, DirCache};

/// Listing page size
pub const PAGE_SIZE: u32 = 100;

/// Hard bound on pages walked per segment, against runaway cursors
pub const MAX_PAGES: u32 = 1_000;

/// How long a parent verification is trusted
pub const PARENT_VERIFY_TTL: Duration = Duration::from_secs(5 * 60);

/// Visibility polls after creating a directory
const CREATE_VISIBILITY_POLLS: u32 = 5;
const CREATE_VISIBILITY_STEP: Duration = Duration::from_millis(200);

/// Delays between forced lookups after a duplicate-name mkdir error
const DUPLICATE_PROBE_DELAYS: [Duration; 3] = [
    Duration::from_millis(200),
    Duration::from_millis(400),
    Duration::from_millis(600),
];

/// Resolves paths and keeps the directory cache coherent
pub struct Resolver {
    client: Arc<ApiClient>,
    cache: DirCache,
    encoding: Encoding,
}

impl Resolver {
    /// Creates a resolver with an empty cache
    #[must_use]
    pub fn new(client: Arc<ApiClient>, encoding: Encoding) -> Self {
        Self {
            client,
            cache: DirCache::new(),
            encoding,
        }
    }

    /// The cache, for invalidation by the facade after mutations
    pub fn cache(&self) -> &DirCache {
        &self.cache
    }

    /// Normalizes a raw listing name to local form
    fn decode_entry_name(&self, raw: &str) -> String {
        let decoded = urlencoding::decode(raw)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        self.encoding.decode_name(decoded.trim())
    }

    /// Encodes a local-form name for transmission
    #[must_use]
    pub fn encode_name(&self, name: &str) -> String {
        self.encoding.encode_name(name)
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Fetches one listing page
    pub async fn list_page(&self, parent: FileId, cursor: Option<i64>) -> Result<FileListData> {
        let mut query = vec![
            ("parentFileId", parent.as_i64().to_string()),
            ("limit", PAGE_SIZE.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("lastFileId", cursor.to_string()));
        }
        self.client.get_json(endpoints::FILE_LIST, &query).await
    }

    /// Lists a whole directory: alive entries only, names normalized,
    /// cache populated along the way
    pub async fn list_all(&self, parent: FileId) -> Result<Vec<RemoteEntry>> {
        let mut out = Vec::new();
        let mut cursor = None;
        for _page in 0..MAX_PAGES {
            let page = self.list_page(parent, cursor).await?;
            for mut entry in page.file_list {
                if !entry.is_alive() {
                    continue;
                }
                entry.filename = self.decode_entry_name(&entry.filename);
                self.cache.put(
                    parent,
                    &entry.filename,
                    CachedLeaf {
                        id: FileId::new(entry.file_id),
                        is_dir: entry.is_dir(),
                    },
                );
                out.push(entry);
            }
            if page.last_file_id < 0 {
                self.cache.mark_parent_verified(parent);
                return Ok(out);
            }
            cursor = Some(page.last_file_id);
        }
        Err(BackendError::Transient(format!(
            "listing of {parent} did not terminate within {MAX_PAGES} pages"
        )))
    }

    // ========================================================================
    // Leaf lookup
    // ========================================================================

    /// Looks up a name under a parent, answering from the cache when it can
    pub async fn find_leaf(&self, parent: FileId, name: &str) -> Result<Option<CachedLeaf>> {
        if let Some(hit) = self.cache.get(parent, name) {
            debug!(%parent, name, "dircache hit");
            return Ok(Some(hit));
        }
        self.find_leaf_forced(parent, name).await
    }

    /// Looks up a name under a parent, always re-querying the server.
    ///
    /// Used after mutations the server may not have propagated and when a
    /// creation reported a duplicate name whose ID we need.
    pub async fn find_leaf_forced(&self, parent: FileId, name: &str) -> Result<Option<CachedLeaf>> {
        let mut cursor = None;
        for _page in 0..MAX_PAGES {
            let page = self.list_page(parent, cursor).await?;
            for entry in &page.file_list {
                if !entry.is_alive() {
                    continue;
                }
                let decoded = self.decode_entry_name(&entry.filename);
                let leaf = CachedLeaf {
                    id: FileId::new(entry.file_id),
                    is_dir: entry.is_dir(),
                };
                self.cache.put(parent, &decoded, leaf);
                if decoded == name {
                    return Ok(Some(leaf));
                }
            }
            if page.last_file_id < 0 {
                return Ok(None);
            }
            cursor = Some(page.last_file_id);
        }
        Err(BackendError::Transient(format!(
            "listing of {parent} did not terminate within {MAX_PAGES} pages"
        )))
    }

    // ========================================================================
    // Path resolution
    // ========================================================================

    /// Resolves a path to the ID of a directory
    pub async fn resolve_dir(&self, root: FileId, path: &RemotePath) -> Result<FileId> {
        let leaf = self.resolve_entry(root, path).await?;
        match leaf {
            Some(leaf) if leaf.is_dir => Ok(leaf.id),
            Some(_) => Err(BackendError::NotAFile(format!(
                "{path} is a file, not a directory"
            ))),
            None => Ok(root),
        }
    }

    /// Resolves a path to its leaf, or `None` for the root itself
    pub async fn resolve_entry(
        &self,
        root: FileId,
        path: &RemotePath,
    ) -> Result<Option<CachedLeaf>> {
        let mut current = root;
        let mut resolved: Option<CachedLeaf> = None;
        let segments: Vec<&str> = path.segments().collect();
        for (i, segment) in segments.iter().enumerate() {
            let leaf = self
                .find_leaf(current, segment)
                .await?
                .ok_or_else(|| BackendError::NotFound(format!("{path} (segment {segment:?})")))?;
            if !leaf.is_dir && i + 1 < segments.len() {
                return Err(BackendError::NotFound(format!(
                    "{path}: {segment:?} is a file"
                )));
            }
            current = leaf.id;
            resolved = Some(leaf);
        }
        Ok(resolved)
    }

    // ========================================================================
    // Directory creation
    // ========================================================================

    /// Creates one directory under a parent, absorbing duplicate races and
    /// propagation delay. The returned ID has been confirmed visible.
    pub async fn create_dir(&self, parent: FileId, name: &str) -> Result<FileId> {
        if let Some(existing) = self.find_leaf(parent, name).await? {
            if existing.is_dir {
                return Ok(existing.id);
            }
            return Err(BackendError::Conflict(format!(
                "a file named {name:?} already exists under {parent}"
            )));
        }

        let request = MkdirRequest {
            name: self.encode_name(name),
            parent_id: parent.as_i64(),
        };
        match self
            .client
            .post_json::<MkdirData, _>(endpoints::MKDIR, &request)
            .await
        {
            Ok(created) => {
                debug!(%parent, name, dir_id = created.dir_id, "directory created");
                self.await_visibility(parent, name).await
            }
            Err(err) if error_means_duplicate(&err) => {
                // Someone else created it first; the sibling may take a
                // moment to show up in listings.
                debug!(%parent, name, "duplicate-name race on mkdir");
                tokio::time::sleep(Duration::from_millis(100)).await;
                for delay in DUPLICATE_PROBE_DELAYS {
                    if let Some(existing) = self.find_leaf_forced(parent, name).await? {
                        if existing.is_dir {
                            return Ok(existing.id);
                        }
                        return Err(BackendError::Conflict(format!(
                            "a file named {name:?} already exists under {parent}"
                        )));
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Polls until the freshly created directory is visible in listings
    async fn await_visibility(&self, parent: FileId, name: &str) -> Result<FileId> {
        let mut delay = CREATE_VISIBILITY_STEP;
        for attempt in 1..=CREATE_VISIBILITY_POLLS {
            if let Some(leaf) = self.find_leaf_forced(parent, name).await? {
                return Ok(leaf.id);
            }
            debug!(%parent, name, attempt, "created directory not visible yet");
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        Err(BackendError::Transient(format!(
            "directory {name:?} under {parent} not visible after creation"
        )))
    }

    /// Resolves a directory path, creating missing components
    pub async fn ensure_dir(&self, root: FileId, path: &RemotePath) -> Result<FileId> {
        let mut current = root;
        for segment in path.segments() {
            match self.find_leaf(current, segment).await? {
                Some(leaf) if leaf.is_dir => current = leaf.id,
                Some(_) => {
                    return Err(BackendError::Conflict(format!(
                        "{path}: {segment:?} exists and is a file"
                    )))
                }
                None => current = self.create_dir(current, segment).await?,
            }
        }
        Ok(current)
    }

    // ========================================================================
    // Parent verification and repair
    // ========================================================================

    /// Confirms a parent directory still exists; positive answers are
    /// cached for five minutes, negative answers never
    pub async fn verify_parent(&self, parent: FileId) -> Result<bool> {
        if self.cache.parent_verified_within(parent, PARENT_VERIFY_TTL) {
            return Ok(true);
        }
        match self.list_page(parent, None).await {
            Ok(_) => {
                self.cache.mark_parent_verified(parent);
                Ok(true)
            }
            Err(
                BackendError::NotFound(_)
                | BackendError::Protocol { .. }
                | BackendError::Conflict(_),
            ) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Repairs a possibly stale parent ID: reset the cache, re-verify, and
    /// fall back to the root when the cached ID is gone
    pub async fn repair_parent(&self, cached: FileId) -> Result<FileId> {
        warn!(%cached, "repairing possibly stale parent ID");
        self.cache.reset();
        if self.verify_parent(cached).await? {
            return Ok(cached);
        }
        if !cached.is_root() && self.verify_parent(FileId::ROOT).await? {
            return Ok(FileId::ROOT);
        }
        Ok(FileId::ROOT)
    }
}

#[async_trait]
impl ParentFixer for Resolver {
    async fn fix_parent(&self, stale: FileId) -> Result<FileId> {
        self.repair_parent(stale).await
    }
}
