//! Remote entry model
//!
//! [`RemoteEntry`] is the row shape shared by the listing, detail, and info
//! endpoints. [`Object`] is the immutable snapshot handed to callers.
//!
//! A listing consumer treats an entry as existent iff
//! `trashed == 0 && status < 100`; everything else (recycle bin, moderation
//! rejects) must stay invisible to the host engine.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{FileId, Md5Hash, RemotePath};

/// Entry type value for regular files
pub const TYPE_FILE: i64 = 0;
/// Entry type value for directories
pub const TYPE_DIR: i64 = 1;
/// Moderation status values at or above this are rejected entries
pub const STATUS_REJECTED: i64 = 100;

/// A file or directory row as reported by the remote
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    /// Server-assigned identity
    pub file_id: i64,
    /// Entry name; may arrive URL-encoded from the listing endpoint
    pub filename: String,
    /// 0 = file, 1 = directory
    #[serde(rename = "type")]
    pub file_type: i64,
    /// Size in bytes (0 for directories)
    #[serde(default)]
    pub size: i64,
    /// MD5 of the content, lowercase hex ("etag"); empty for directories
    #[serde(default)]
    pub etag: String,
    /// ID of the containing directory
    #[serde(default)]
    pub parent_file_id: i64,
    /// 1 when the entry sits in the recycle bin
    #[serde(default)]
    pub trashed: i64,
    /// Moderation status; >= 100 means rejected
    #[serde(default)]
    pub status: i64,
    /// Creation timestamp, `YYYY-MM-DD HH:MM:SS`
    #[serde(default)]
    pub create_at: Option<String>,
    /// Last-update timestamp, `YYYY-MM-DD HH:MM:SS`
    #[serde(default)]
    pub update_at: Option<String>,
}

impl RemoteEntry {
    /// Whether the entry is a directory
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type == TYPE_DIR
    }

    /// The validity filter: not trashed and not moderation-rejected
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.trashed == 0 && self.status < STATUS_REJECTED
    }

    /// Parses `update_at` into a UTC timestamp, if present and well-formed.
    ///
    /// The remote reports wall-clock times without an offset; they are
    /// taken as UTC, which is all the host needs since modification-time
    /// precision is not supported by this backend.
    #[must_use]
    pub fn mod_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.update_at.as_deref()?;
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// The etag as a validated digest, if the remote reported one
    #[must_use]
    pub fn md5(&self) -> Option<Md5Hash> {
        if self.etag.is_empty() {
            None
        } else {
            Md5Hash::from_hex(&self.etag).ok()
        }
    }
}

/// Immutable caller-facing snapshot of a remote entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// Server-assigned identity
    pub id: FileId,
    /// Path relative to the facade root
    pub remote: RemotePath,
    /// Size in bytes
    pub size: u64,
    /// MD5 of the content, when known
    pub md5: Option<Md5Hash>,
    /// Last-update time, when known
    pub mod_time: Option<DateTime<Utc>>,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

impl Object {
    /// Builds a snapshot from an entry at the given remote path
    #[must_use]
    pub fn from_entry(entry: &RemoteEntry, remote: RemotePath) -> Self {
        Self {
            id: FileId::new(entry.file_id),
            remote,
            size: entry.size.max(0) as u64,
            md5: entry.md5(),
            mod_time: entry.mod_time(),
            is_dir: entry.is_dir(),
        }
    }
}
