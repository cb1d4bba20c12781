//! Backend commands surfaced through the host CLI
//!
//! - [`media_sync`] mirrors a remote subtree into local `.strm` shadow
//!   files whose single line is `123://<fileID>` (or the remote path in
//!   compatibility mode), so media servers can index a cloud library
//!   without holding the bytes.
//! - [`get_download_url`] resolves a file reference (`123://<id>`, bare
//!   numeric ID, or remote path) to its current download URL.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use pan123_core::domain::newtypes::{FileId, RemotePath};
use pan123_core::ports::vfs::RemoteFs;
use pan123_core::{BackendError, Result};

use crate::facade::Pan123Fs;

/// Options for [`media_sync`]
#[derive(Debug, Clone, Default)]
pub struct MediaSyncOptions {
    /// Only these extensions (lowercase, no dot); empty means all
    pub include_extensions: Vec<String>,
    /// Never these extensions (lowercase, no dot)
    pub exclude_extensions: Vec<String>,
    /// Skip files smaller than this
    pub min_size: u64,
    /// Report what would happen without touching the filesystem
    pub dry_run: bool,
    /// Delete `.strm` files under the target that no longer correspond
    /// to a remote file; scoped strictly to the sync target
    pub sync_delete: bool,
    /// Write the remote path instead of `123://<id>` (compatibility mode)
    pub path_mode: bool,
}

/// What a [`media_sync`] run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaSyncReport {
    /// Shadow files written
    pub created: usize,
    /// Shadow files already up to date
    pub unchanged: usize,
    /// Remote files skipped by the filters
    pub skipped: usize,
    /// Stale shadow files removed (sync-delete)
    pub deleted: usize,
}

/// Decides whether a remote file passes the extension and size filters
fn passes_filters(name: &str, size: u64, opts: &MediaSyncOptions) -> bool {
    if size < opts.min_size {
        return false;
    }
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    if opts.exclude_extensions.iter().any(|x| *x == ext) {
        return false;
    }
    if !opts.include_extensions.is_empty() && !opts.include_extensions.iter().any(|x| *x == ext) {
        return false;
    }
    true
}

/// The shadow file name for a remote name: extension replaced by `.strm`
fn strm_name(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.strm"),
        _ => format!("{name}.strm"),
    }
}

/// The single-line shadow file body
fn strm_body(id: FileId, remote: &RemotePath, path_mode: bool) -> String {
    if path_mode {
        format!("/{}", remote.as_str())
    } else {
        format!("123://{}", id.as_i64())
    }
}

/// Mirrors `remote_dir` into `.strm` shadow files under `target`
pub async fn media_sync(
    fs: &Pan123Fs,
    remote_dir: &RemotePath,
    target: &Path,
    opts: &MediaSyncOptions,
) -> Result<MediaSyncReport> {
    let mut report = MediaSyncReport::default();
    let mut written: HashSet<PathBuf> = HashSet::new();
    let mut stack: Vec<(RemotePath, PathBuf)> = vec![(remote_dir.clone(), target.to_path_buf())];

    while let Some((dir, local_dir)) = stack.pop() {
        let entries = fs.list(&dir).await?;
        if !opts.dry_run {
            tokio::fs::create_dir_all(&local_dir).await.map_err(|e| {
                BackendError::Validation(format!("cannot create {local_dir:?}: {e}"))
            })?;
        }

        for obj in entries {
            let name = match obj.remote.parent_and_leaf() {
                Some((_, leaf)) => leaf.to_string(),
                None => continue,
            };
            if obj.is_dir {
                stack.push((obj.remote.clone(), local_dir.join(&name)));
                continue;
            }
            if !passes_filters(&name, obj.size, opts) {
                report.skipped += 1;
                continue;
            }

            let shadow = local_dir.join(strm_name(&name));
            let body = strm_body(obj.id, &obj.remote, opts.path_mode);
            written.insert(shadow.clone());

            let current = tokio::fs::read_to_string(&shadow).await.ok();
            if current.as_deref().map(str::trim) == Some(body.as_str()) {
                report.unchanged += 1;
                continue;
            }
            if opts.dry_run {
                debug!(?shadow, "would write shadow file");
            } else {
                tokio::fs::write(&shadow, &body).await.map_err(|e| {
                    BackendError::Validation(format!("cannot write {shadow:?}: {e}"))
                })?;
            }
            report.created += 1;
        }
    }

    if opts.sync_delete {
        report.deleted = sweep_stale(target, &written, opts.dry_run).await?;
    }

    info!(
        created = report.created,
        unchanged = report.unchanged,
        skipped = report.skipped,
        deleted = report.deleted,
        "media sync finished"
    );
    Ok(report)
}

/// Removes `.strm` files under `target` that this run did not produce
async fn sweep_stale(target: &Path, written: &HashSet<PathBuf>, dry_run: bool) -> Result<usize> {
    let mut deleted = 0;
    let mut stack = vec![target.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            // The target may not exist at all on a dry run
            Err(_) => continue,
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(BackendError::Validation(format!("cannot read {dir:?}: {e}")))
                }
            };
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "strm") && !written.contains(&path) {
                if dry_run {
                    debug!(?path, "would delete stale shadow file");
                } else {
                    tokio::fs::remove_file(&path).await.map_err(|e| {
                        BackendError::Validation(format!("cannot delete {path:?}: {e}"))
                    })?;
                }
                deleted += 1;
            }
        }
    }
    Ok(deleted)
}

// ============================================================================
// get-download-url
// ============================================================================

/// Parses `123://<id>` or a bare numeric ID
#[must_use]
pub fn parse_file_reference(reference: &str) -> Option<FileId> {
    let digits = reference.strip_prefix("123://").unwrap_or(reference);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// Resolves a file reference to its current download URL
pub async fn get_download_url(
    fs: &Pan123Fs,
    reference: &str,
    user_agent: Option<&str>,
) -> Result<String> {
    if let Some(id) = parse_file_reference(reference) {
        return fs.downloader().download_url(id, user_agent).await;
    }
    let remote = RemotePath::new(reference)?;
    let obj = fs.new_object(&remote).await?;
    fs.downloader().download_url(obj.id, user_agent).await
}
