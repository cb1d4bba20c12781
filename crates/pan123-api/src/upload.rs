//! Upload engine
//!
//! `put` picks one strategy per call and runs it to completion:
//!
//! - **Instant**: every path starts with a `create` probe carrying the
//!   payload MD5; `reuse == true` means the server already has the bytes
//!   and nothing is transferred.
//! - **Single-step** (≤ 1 GiB): payloads up to 100 MiB are hashed in
//!   memory; larger ones are spooled to a temp file while hashing, then
//!   streamed into one multipart request against the upload domain.
//! - **Chunked** (> 1 GiB): the server decrees the slice size; slices are
//!   uploaded 1-based with per-slice MD5s and a 5-minute per-attempt
//!   timeout, then completion is polled until the server has assembled
//!   the file.
//! - **Cross-cloud**: non-local sources are spooled first, which bounds
//!   backpressure and lets the engine validate the exact size before any
//!   remote call.
//!
//! Stale parent IDs ("parentFileID does not exist") are repaired once via
//! the resolver-supplied [`ParentFixer`] and the `create` retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use pan123_core::domain::name::validate_name;
use pan123_core::domain::newtypes::{FileId, Md5Hash};
use pan123_core::ports::vfs::{ByteStream, ContentSource, OpenRange, SourceInfo};
use pan123_core::{BackendError, Result};

use crate::client::{endpoints, error_means_parent_missing, ApiClient};
use crate::types::{
    SingleCreateData, UploadCompleteData, UploadCompleteRequest, UploadCreateData,
    UploadCreateRequest,
};

/// Payloads at or below this are hashed fully in memory
pub const SINGLE_STEP_MEMORY_CUTOFF: i64 = 100 * 1024 * 1024;

/// Largest payload the single-step endpoint accepts
pub const SINGLE_STEP_LIMIT: i64 = 1024 * 1024 * 1024;

/// Completion poll attempts and spacing
pub const COMPLETION_POLLS: u32 = 300;
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Per-attempt timeout on each slice upload
pub const SLICE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(300);

const SPOOL_BUF_SIZE: usize = 1024 * 1024;

// ============================================================================
// Strategy selection
// ============================================================================

/// The strategy chosen once per `put` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Read fully to memory, hash, single-step
    SingleStepMemory,
    /// Spool to temp file while hashing, then single-step from the file
    SingleStepSpooled,
    /// Chunked session with server-decreed slice size
    Chunked,
    /// Non-local or unknown-size source: spool first, then re-select
    CrossCloudSpooled,
}

/// Picks the strategy for a payload description
#[must_use]
pub fn choose_strategy(info: &SourceInfo) -> UploadStrategy {
    if !info.local || info.size < 0 {
        UploadStrategy::CrossCloudSpooled
    } else if info.size <= SINGLE_STEP_MEMORY_CUTOFF {
        UploadStrategy::SingleStepMemory
    } else if info.size <= SINGLE_STEP_LIMIT {
        UploadStrategy::SingleStepSpooled
    } else {
        UploadStrategy::Chunked
    }
}

/// Collision handling requested from the server at session creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Server renames the new file with an auto-suffix
    Rename,
    /// Server replaces the existing file in place
    Overwrite,
}

impl DuplicatePolicy {
    fn as_wire(self) -> u8 {
        match self {
            Self::Rename => 1,
            Self::Overwrite => 2,
        }
    }
}

/// Repairs a stale parent directory ID; implemented by the path resolver
#[async_trait]
pub trait ParentFixer: Send + Sync {
    /// Returns a parent ID that is known to exist, falling back to root
    async fn fix_parent(&self, stale: FileId) -> Result<FileId>;
}

/// What an upload produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// ID of the resulting file
    pub file_id: FileId,
    /// Parent the file actually landed in (differs from the requested
    /// parent only after stale-parent recovery)
    pub parent_id: FileId,
    /// Payload size in bytes
    pub size: u64,
    /// MD5 of the payload
    pub md5: Md5Hash,
}

// ============================================================================
// Uploader
// ============================================================================

/// The upload engine; one instance per facade
pub struct Uploader {
    client: Arc<ApiClient>,
    max_parts: u32,
}

impl Uploader {
    /// Creates an engine bound to a client, capping chunk counts at
    /// `max_parts`
    #[must_use]
    pub fn new(client: Arc<ApiClient>, max_parts: u32) -> Self {
        Self { client, max_parts }
    }

    /// Uploads a payload into `parent` under `name`
    pub async fn put(
        &self,
        source: &dyn ContentSource,
        parent: FileId,
        name: &str,
        policy: DuplicatePolicy,
        fixer: &dyn ParentFixer,
    ) -> Result<UploadOutcome> {
        validate_name(name)?;
        match choose_strategy(source.info()) {
            UploadStrategy::SingleStepMemory => {
                self.single_step_memory(source, parent, name, policy, fixer).await
            }
            UploadStrategy::SingleStepSpooled => {
                let spooled = spool(source).await?;
                self.single_step_file(&spooled, parent, name, policy, fixer).await
            }
            UploadStrategy::Chunked => self.chunked(source, parent, name, policy, fixer).await,
            UploadStrategy::CrossCloudSpooled => {
                let spooled = spool(source).await?;
                if spooled.size <= SINGLE_STEP_MEMORY_CUTOFF as u64 {
                    self.single_step_memory(&spooled, parent, name, policy, fixer).await
                } else if spooled.size <= SINGLE_STEP_LIMIT as u64 {
                    self.single_step_file(&spooled, parent, name, policy, fixer).await
                } else {
                    self.chunked(&spooled, parent, name, policy, fixer).await
                }
            }
        }
    }

    // ========================================================================
    // Session creation with stale-parent recovery
    // ========================================================================

    /// Calls `create`, repairing a stale parent ID at most once
    async fn create_session(
        &self,
        parent: FileId,
        name: &str,
        md5: &Md5Hash,
        size: u64,
        policy: DuplicatePolicy,
        fixer: &dyn ParentFixer,
    ) -> Result<(UploadCreateData, FileId)> {
        let request = |parent: FileId| UploadCreateRequest {
            parent_file_id: parent.as_i64(),
            filename: name.to_string(),
            etag: md5.as_str().to_string(),
            size: size as i64,
            duplicate: policy.as_wire(),
        };

        match self
            .client
            .post_json::<UploadCreateData, _>(endpoints::UPLOAD_CREATE, &request(parent))
            .await
        {
            Ok(data) => Ok((data, parent)),
            Err(err) if error_means_parent_missing(&err) => {
                warn!(parent = %parent, error = %err, "stale parent on create, repairing");
                let fixed = fixer.fix_parent(parent).await?;
                if fixed == parent {
                    return Err(err);
                }
                let data = self
                    .client
                    .post_json::<UploadCreateData, _>(endpoints::UPLOAD_CREATE, &request(fixed))
                    .await?;
                Ok((data, fixed))
            }
            Err(err) => Err(err),
        }
    }

    // ========================================================================
    // Single-step paths
    // ========================================================================

    async fn single_step_memory(
        &self,
        source: &dyn ContentSource,
        parent: FileId,
        name: &str,
        policy: DuplicatePolicy,
        fixer: &dyn ParentFixer,
    ) -> Result<UploadOutcome> {
        let mut stream = source.open(None).await?;
        let mut data = Vec::new();
        stream
            .read_to_end(&mut data)
            .await
            .map_err(|e| BackendError::Transient(format!("reading upload source: {e}")))?;
        let size = data.len() as u64;
        let md5 = Md5Hash::from_bytes(md5::compute(&data).0);

        let (created, parent) = self
            .create_session(parent, name, &md5, size, policy, fixer)
            .await?;
        if created.reuse {
            return instant_outcome(created, parent, size, md5, name);
        }

        debug!(name, size, "single-step upload from memory");
        let data = Arc::new(data);
        self.single_step_call(parent, name, &md5, size, policy, move || {
            Ok(Part::bytes(data.as_ref().clone()))
        })
        .await
    }

    async fn single_step_file(
        &self,
        spooled: &SpooledSource,
        parent: FileId,
        name: &str,
        policy: DuplicatePolicy,
        fixer: &dyn ParentFixer,
    ) -> Result<UploadOutcome> {
        let size = spooled.size;
        let md5 = spooled.md5.clone();

        let (created, parent) = self
            .create_session(parent, name, &md5, size, policy, fixer)
            .await?;
        if created.reuse {
            return instant_outcome(created, parent, size, md5, name);
        }

        debug!(name, size, "single-step upload from spool file");
        let path = spooled.file.path().to_path_buf();
        self.single_step_call(parent, name, &md5, size, policy, move || {
            let file = std::fs::File::open(&path)
                .map_err(|e| BackendError::Transient(format!("reopening spool file: {e}")))?;
            let body = reqwest::Body::from(tokio::fs::File::from_std(file));
            Ok(Part::stream_with_length(body, size))
        })
        .await
    }

    /// The multipart `single/create` call shared by both single-step paths
    async fn single_step_call(
        &self,
        parent: FileId,
        name: &str,
        md5: &Md5Hash,
        size: u64,
        policy: DuplicatePolicy,
        make_file_part: impl Fn() -> Result<Part> + Send + Sync + 'static,
    ) -> Result<UploadOutcome> {
        let name_owned = name.to_string();
        let etag = md5.as_str().to_string();
        let make_form = move || -> Result<Form> {
            Ok(Form::new()
                .text("parentFileID", parent.as_i64().to_string())
                .text("filename", name_owned.clone())
                .text("etag", etag.clone())
                .text("size", size.to_string())
                .text("duplicate", policy.as_wire().to_string())
                .part("file", make_file_part()?.file_name(name_owned.clone())))
        };

        let created: SingleCreateData = self
            .client
            .post_form(
                endpoints::SINGLE_CREATE,
                &make_form,
                Some(SLICE_ATTEMPT_TIMEOUT),
            )
            .await?;

        let file_id = if created.completed {
            created.file_id.ok_or_else(|| BackendError::Protocol {
                code: -1,
                message: "single-step completed without a fileID".to_string(),
            })?
        } else if let Some(preupload_id) = created.preupload_id {
            self.poll_completion(&preupload_id).await?
        } else {
            return Err(BackendError::Protocol {
                code: -1,
                message: "single-step neither completed nor returned a session".to_string(),
            });
        };

        info!(name, size, file_id, "single-step upload finished");
        Ok(UploadOutcome {
            file_id: FileId::new(file_id),
            parent_id: parent,
            size,
            md5: md5.clone(),
        })
    }

    // ========================================================================
    // Chunked path
    // ========================================================================

    async fn chunked(
        &self,
        source: &dyn ContentSource,
        parent: FileId,
        name: &str,
        policy: DuplicatePolicy,
        fixer: &dyn ParentFixer,
    ) -> Result<UploadOutcome> {
        // A source that cannot be re-opened per range has to go through a
        // spool file; hashing already costs one full read.
        if !source.reopenable() {
            let spooled = spool(source).await?;
            return self.chunked_inner(&spooled, parent, name, policy, fixer).await;
        }
        self.chunked_inner(source, parent, name, policy, fixer).await
    }

    async fn chunked_inner(
        &self,
        source: &dyn ContentSource,
        parent: FileId,
        name: &str,
        policy: DuplicatePolicy,
        fixer: &dyn ParentFixer,
    ) -> Result<UploadOutcome> {
        let size = source.info().size as u64;
        let md5 = match &source.info().md5 {
            Some(known) => known.clone(),
            None => hash_source(source).await?,
        };

        let (created, parent) = self
            .create_session(parent, name, &md5, size, policy, fixer)
            .await?;
        if created.reuse {
            return instant_outcome(created, parent, size, md5, name);
        }

        let preupload_id = created.preupload_id.ok_or_else(|| BackendError::Protocol {
            code: -1,
            message: "create returned neither reuse nor a preuploadID".to_string(),
        })?;
        let slice_size = created.slice_size;
        if slice_size <= 0 {
            return Err(BackendError::Protocol {
                code: -1,
                message: format!("create returned invalid sliceSize {slice_size}"),
            });
        }

        let parts = part_count(size, slice_size as u64);
        if parts > u64::from(self.max_parts) {
            return Err(BackendError::Validation(format!(
                "file needs {parts} slices of {slice_size} bytes, exceeding the {} slice limit",
                self.max_parts
            )));
        }

        info!(name, size, slice_size, parts, "chunked upload starting");
        for slice_no in 1..=parts {
            let offset = (slice_no - 1) * slice_size as u64;
            let len = (slice_size as u64).min(size - offset);
            self.upload_slice(source, &preupload_id, slice_no, offset, len)
                .await?;
        }

        let file_id = self.poll_completion(&preupload_id).await?;
        info!(name, size, file_id, "chunked upload finished");
        Ok(UploadOutcome {
            file_id: FileId::new(file_id),
            parent_id: parent,
            size,
            md5,
        })
    }

    /// Uploads one slice as multipart form data
    async fn upload_slice(
        &self,
        source: &dyn ContentSource,
        preupload_id: &str,
        slice_no: u64,
        offset: u64,
        len: u64,
    ) -> Result<()> {
        let mut stream = source
            .open(Some(OpenRange {
                offset,
                length: Some(len),
            }))
            .await?;
        let mut chunk = Vec::with_capacity(len as usize);
        stream
            .read_to_end(&mut chunk)
            .await
            .map_err(|e| BackendError::Transient(format!("reading slice {slice_no}: {e}")))?;
        if chunk.len() as u64 != len {
            return Err(BackendError::Validation(format!(
                "slice {slice_no} read {} bytes, expected {len}",
                chunk.len()
            )));
        }

        let slice_md5 = Md5Hash::from_bytes(md5::compute(&chunk).0);
        debug!(slice_no, len, md5 = %slice_md5, "uploading slice");

        let preupload_id = preupload_id.to_string();
        let chunk = Arc::new(chunk);
        let make_form = move || -> Result<Form> {
            Ok(Form::new()
                .text("preuploadID", preupload_id.clone())
                .text("sliceNo", slice_no.to_string())
                .text("sliceMD5", slice_md5.as_str().to_string())
                .part(
                    "slice",
                    Part::bytes(chunk.as_ref().clone()).file_name("slice"),
                ))
        };
        self.client
            .post_form_empty(
                endpoints::UPLOAD_SLICE,
                &make_form,
                Some(SLICE_ATTEMPT_TIMEOUT),
            )
            .await
    }

    /// Polls `upload_complete` until the server reports the file assembled
    async fn poll_completion(&self, preupload_id: &str) -> Result<i64> {
        let request = UploadCompleteRequest {
            preupload_id: preupload_id.to_string(),
        };
        for attempt in 1..=COMPLETION_POLLS {
            let data: UploadCompleteData = self
                .client
                .post_json(endpoints::UPLOAD_COMPLETE, &request)
                .await?;
            if data.completed {
                return Ok(data.file_id);
            }
            debug!(attempt, "upload not assembled yet");
            tokio::time::sleep(COMPLETION_POLL_INTERVAL).await;
        }
        Err(BackendError::Transient(format!(
            "upload session {preupload_id} did not complete after {COMPLETION_POLLS} polls"
        )))
    }
}

fn instant_outcome(
    created: UploadCreateData,
    parent: FileId,
    size: u64,
    md5: Md5Hash,
    name: &str,
) -> Result<UploadOutcome> {
    let file_id = created.file_id.ok_or_else(|| BackendError::Protocol {
        code: -1,
        message: "reuse=true without a fileID".to_string(),
    })?;
    info!(name, size, file_id, "instant upload, no bytes transferred");
    Ok(UploadOutcome {
        file_id: FileId::new(file_id),
        parent_id: parent,
        size,
        md5,
    })
}

/// Number of slices needed for `size` bytes at `slice_size`
#[must_use]
pub fn part_count(size: u64, slice_size: u64) -> u64 {
    size.div_ceil(slice_size.max(1)).max(1)
}

// ============================================================================
// Spooling
// ============================================================================

/// A temp-file-backed source with a known size and MD5
#[derive(Debug)]
pub(crate) struct SpooledSource {
    info: SourceInfo,
    file: NamedTempFile,
    size: u64,
    md5: Md5Hash,
}

#[async_trait]
impl ContentSource for SpooledSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn reopenable(&self) -> bool {
        true
    }

    async fn open(&self, range: Option<OpenRange>) -> Result<ByteStream> {
        use tokio::io::AsyncSeekExt;
        let file = std::fs::File::open(self.file.path())
            .map_err(|e| BackendError::Transient(format!("reopening spool file: {e}")))?;
        let mut file = tokio::fs::File::from_std(file);
        match range {
            None => Ok(Box::new(file)),
            Some(OpenRange { offset, length }) => {
                file.seek(std::io::SeekFrom::Start(offset))
                    .await
                    .map_err(|e| BackendError::Transient(format!("seeking spool file: {e}")))?;
                match length {
                    Some(len) => Ok(Box::new(file.take(len))),
                    None => Ok(Box::new(file)),
                }
            }
        }
    }
}

/// Streams a source into a temp file, hashing as it goes.
///
/// When the source declared a size, the byte count is validated against
/// it so a truncated cross-cloud read fails before any remote call.
async fn spool(source: &dyn ContentSource) -> Result<SpooledSource> {
    let declared = source.info().size;
    debug!(declared, "spooling upload source to temp file");

    let tmp = NamedTempFile::new()
        .map_err(|e| BackendError::Transient(format!("creating spool file: {e}")))?;
    let mut writer = tokio::fs::OpenOptions::new()
        .write(true)
        .open(tmp.path())
        .await
        .map_err(|e| BackendError::Transient(format!("opening spool file: {e}")))?;

    let mut stream = source.open(None).await?;
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; SPOOL_BUF_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| BackendError::Transient(format!("reading upload source: {e}")))?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| BackendError::Transient(format!("writing spool file: {e}")))?;
        total += n as u64;
    }
    writer
        .flush()
        .await
        .map_err(|e| BackendError::Transient(format!("flushing spool file: {e}")))?;

    if declared >= 0 && total != declared as u64 {
        return Err(BackendError::Validation(format!(
            "source declared {declared} bytes but produced {total}"
        )));
    }

    let md5 = Md5Hash::from_bytes(ctx.compute().0);
    let mut info = source.info().clone();
    info.size = total as i64;
    info.md5 = Some(md5.clone());
    info.local = true;
    Ok(SpooledSource {
        info,
        file: tmp,
        size: total,
        md5,
    })
}

/// Hashes a re-openable source with one streaming pass
async fn hash_source(source: &dyn ContentSource) -> Result<Md5Hash> {
    let mut stream = source.open(None).await?;
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; SPOOL_BUF_SIZE];
    loop {
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| BackendError::Transient(format!("hashing upload source: {e}")))?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(Md5Hash::from_bytes(ctx.compute().0))
}
