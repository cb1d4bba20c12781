//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers the remote hands out.
//! Each newtype validates at construction time so the rest of the backend
//! can assume well-formed values.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::BackendError;

// ============================================================================
// FileId
// ============================================================================

/// Server-assigned 64-bit identity of a file or directory.
///
/// The synthetic root directory has ID 0 and no name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(i64);

impl FileId {
    /// The synthetic root directory
    pub const ROOT: FileId = FileId(0);

    /// Wraps a raw server ID
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Whether this is the synthetic root
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.0 == 0
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| BackendError::Validation(format!("invalid file ID {s:?}: {e}")))
    }
}

impl From<i64> for FileId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ============================================================================
// RemotePath
// ============================================================================

/// A normalized slash-delimited path anchored at the configured root.
///
/// Normalization trims leading/trailing separators and collapses empty and
/// `.` segments; `..` is rejected. The root is the empty path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemotePath(String);

impl RemotePath {
    /// The root path (no segments)
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Builds a normalized path, rejecting `..` segments
    pub fn new(path: &str) -> crate::Result<Self> {
        let mut segments = Vec::new();
        for seg in path.split('/') {
            match seg {
                "" | "." => continue,
                ".." => {
                    return Err(BackendError::Validation(format!(
                        "path {path:?} contains a parent-directory segment"
                    )))
                }
                s => segments.push(s),
            }
        }
        Ok(Self(segments.join("/")))
    }

    /// Whether this is the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The normalized string form (empty for root)
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates the path segments in order
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Appends a single name, returning a new path
    #[must_use]
    pub fn join(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }

    /// Appends another path's segments, returning a new path
    #[must_use]
    pub fn join_path(&self, other: &Self) -> Self {
        if other.is_root() {
            self.clone()
        } else if self.is_root() {
            other.clone()
        } else {
            Self(format!("{}/{}", self.0, other.0))
        }
    }

    /// Splits into (parent, leaf). Returns `None` for the root.
    #[must_use]
    pub fn parent_and_leaf(&self) -> Option<(Self, &str)> {
        if self.is_root() {
            return None;
        }
        match self.0.rsplit_once('/') {
            Some((parent, leaf)) => Some((Self(parent.to_string()), leaf)),
            None => Some((Self::root(), self.0.as_str())),
        }
    }
}

impl Display for RemotePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ============================================================================
// Md5Hash
// ============================================================================

/// A lowercase 32-hex-digit MD5 digest (the remote calls this "etag")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Md5Hash(String);

impl Md5Hash {
    /// Parses a hex digest string, normalizing to lowercase
    pub fn from_hex(hex: &str) -> crate::Result<Self> {
        let hex = hex.trim();
        if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BackendError::Validation(format!(
                "invalid MD5 digest {hex:?}"
            )));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Formats raw digest bytes as a lowercase hex string
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut s = String::with_capacity(32);
        for b in bytes {
            use std::fmt::Write;
            let _ = write!(s, "{b:02x}");
        }
        Self(s)
    }

    /// The lowercase hex form
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Md5Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
