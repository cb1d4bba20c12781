//! Host filesystem contract (driven port)
//!
//! The embedding sync/transfer engine talks to the backend exclusively
//! through [`RemoteFs`] and the [`ContentSource`] abstraction for upload
//! payloads. Objects returned to the host are immutable snapshots
//! ([`crate::domain::entry::Object`]); mutation goes back through the
//! trait so the facade can keep its caches coherent.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

use crate::domain::entry::Object;
use crate::domain::errors::BackendError;
use crate::domain::newtypes::{Md5Hash, RemotePath};
use crate::Result;

/// A boxed async byte stream
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Capabilities the backend reports to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// MD5 is the only supported hash
    pub md5_supported: bool,
    /// The remote has no server-side copy primitive
    pub server_side_copy: bool,
    /// Modification-time precision; `None` means not supported
    pub mod_time_precision: Option<Duration>,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            md5_supported: true,
            server_side_copy: false,
            mod_time_precision: None,
        }
    }
}

/// Storage usage reported by `about`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    /// Total quota in bytes, where reported
    pub total: Option<u64>,
    /// Bytes in use, where reported
    pub used: Option<u64>,
    /// Bytes free, where reported
    pub free: Option<u64>,
}

/// A half-open byte range for reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRange {
    /// First byte offset
    pub offset: u64,
    /// Number of bytes; `None` reads to the end
    pub length: Option<u64>,
}

/// Options for opening an object for reading
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Byte range to read; `None` reads the whole object
    pub range: Option<OpenRange>,
    /// Forces the sequential path even for large objects
    pub disable_concurrent_download: bool,
    /// Overrides the configured User-Agent for this read
    pub user_agent: Option<String>,
}

/// Metadata describing an upload payload before any bytes move
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Destination path relative to the facade root
    pub remote: RemotePath,
    /// Payload size in bytes; negative when unknown
    pub size: i64,
    /// Content MD5 when the source already knows it
    pub md5: Option<Md5Hash>,
    /// Source modification time, informational only
    pub mod_time: Option<DateTime<Utc>>,
    /// Whether the payload lives on the local machine. Cross-origin
    /// sources are spooled to a temp file before upload.
    pub local: bool,
}

/// An upload payload that can be (re-)opened for reading.
///
/// The upload engine opens a source several times: once to hash, then
/// once per chunk with a byte range. Sources that cannot re-open cheaply
/// report it and are spooled to a temp file first.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Static description of the payload
    fn info(&self) -> &SourceInfo;

    /// Whether `open` may be called repeatedly with ranges at no real cost
    fn reopenable(&self) -> bool;

    /// Opens the payload, optionally at a byte range
    async fn open(&self, range: Option<OpenRange>) -> Result<ByteStream>;
}

/// A [`ContentSource`] backed by a local file
#[derive(Debug)]
pub struct FileSource {
    info: SourceInfo,
    path: PathBuf,
}

impl FileSource {
    /// Describes a local file destined for `remote`
    pub async fn new(path: PathBuf, remote: RemotePath) -> Result<Self> {
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| BackendError::Validation(format!("cannot stat {path:?}: {e}")))?;
        if !meta.is_file() {
            return Err(BackendError::Validation(format!("{path:?} is not a file")));
        }
        Ok(Self {
            info: SourceInfo {
                remote,
                size: meta.len() as i64,
                md5: None,
                mod_time: None,
                local: true,
            },
            path,
        })
    }
}

#[async_trait]
impl ContentSource for FileSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn reopenable(&self) -> bool {
        true
    }

    async fn open(&self, range: Option<OpenRange>) -> Result<ByteStream> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| BackendError::Transient(format!("open {:?}: {e}", self.path)))?;
        match range {
            None => Ok(Box::new(file)),
            Some(OpenRange { offset, length }) => {
                file.seek(std::io::SeekFrom::Start(offset))
                    .await
                    .map_err(|e| BackendError::Transient(format!("seek {:?}: {e}", self.path)))?;
                match length {
                    Some(len) => Ok(Box::new(file.take(len))),
                    None => Ok(Box::new(file)),
                }
            }
        }
    }
}

/// A [`ContentSource`] over an in-memory buffer
pub struct BytesSource {
    info: SourceInfo,
    data: Vec<u8>,
}

impl BytesSource {
    /// Wraps a buffer destined for `remote`
    #[must_use]
    pub fn new(data: Vec<u8>, remote: RemotePath) -> Self {
        Self {
            info: SourceInfo {
                remote,
                size: data.len() as i64,
                md5: None,
                mod_time: None,
                local: true,
            },
            data,
        }
    }

    /// Marks the source as cross-origin, forcing the spooled upload path
    #[must_use]
    pub fn non_local(mut self) -> Self {
        self.info.local = false;
        self
    }
}

#[async_trait]
impl ContentSource for BytesSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn reopenable(&self) -> bool {
        true
    }

    async fn open(&self, range: Option<OpenRange>) -> Result<ByteStream> {
        let data = match range {
            None => self.data.clone(),
            Some(OpenRange { offset, length }) => {
                let start = (offset as usize).min(self.data.len());
                let end = match length {
                    Some(len) => (start + len as usize).min(self.data.len()),
                    None => self.data.len(),
                };
                self.data[start..end].to_vec()
            }
        };
        Ok(Box::new(std::io::Cursor::new(data)))
    }
}

/// The uniform virtual-filesystem interface over the remote
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Reports backend capabilities
    fn features(&self) -> Features;

    /// Lists a directory, validity-filtered, names decoded
    async fn list(&self, dir: &RemotePath) -> Result<Vec<Object>>;

    /// Resolves a path to a file object; directories yield `NotAFile`
    async fn new_object(&self, remote: &RemotePath) -> Result<Object>;

    /// Uploads a payload, creating intermediate directories as needed.
    /// An existing object at the same name is updated in place.
    async fn put(&self, source: &dyn ContentSource) -> Result<Object>;

    /// Creates a directory chain
    async fn mkdir(&self, dir: &RemotePath) -> Result<()>;

    /// Removes an empty directory
    async fn rmdir(&self, dir: &RemotePath) -> Result<()>;

    /// Moves/renames a file
    async fn move_object(&self, src: &Object, dst: &RemotePath) -> Result<Object>;

    /// Moves a whole directory
    async fn dir_move(&self, src: &RemotePath, dst: &RemotePath) -> Result<()>;

    /// Copies a file. The remote has no copy primitive, so this downloads
    /// and re-uploads.
    async fn copy(&self, src: &Object, dst: &RemotePath) -> Result<Object>;

    /// Recursively trashes a directory's contents, then the directory
    async fn purge(&self, dir: &RemotePath) -> Result<()>;

    /// Reports storage usage
    async fn about(&self) -> Result<Usage>;

    /// Opens an object for reading
    async fn open(&self, obj: &Object, opts: &OpenOptions) -> Result<ByteStream>;

    /// Trashes a single file
    async fn remove(&self, obj: &Object) -> Result<()>;
}
