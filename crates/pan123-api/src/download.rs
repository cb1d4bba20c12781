//! Download engine
//!
//! URL acquisition with a TTL cache, ranged reads, and an optional
//! parallel prefetch for large objects: 6 workers fetch 50 MiB chunks
//! into an anonymous temp file via positional writes, and the returned
//! reader streams the reassembled file, which the OS reclaims when the
//! last handle drops. Any prefetch initialization failure falls back to
//! the plain sequential stream.

use std::collections::HashMap;
use std::os::unix::fs::FileExt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures_util::TryStreamExt;
use reqwest::header::{RANGE, USER_AGENT};
use tokio::sync::Semaphore;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use pan123_core::domain::newtypes::FileId;
use pan123_core::ports::vfs::{ByteStream, OpenOptions, OpenRange};
use pan123_core::{BackendError, Result};

use crate::client::{endpoints, ApiClient, CallOpts};
use crate::pacer::PacerKind;
use crate::types::DownloadInfoData;

/// Cached download URLs live this long. The server grants roughly two
/// hours; the margin absorbs clock skew and long reads started late.
pub const URL_CACHE_TTL: Duration = Duration::from_secs(90 * 60);

/// Objects at or above this size are eligible for parallel prefetch
pub const CONCURRENT_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Parallel prefetch worker count
pub const CONCURRENT_WORKERS: usize = 6;

/// Parallel prefetch chunk size
pub const CONCURRENT_CHUNK: u64 = 50 * 1024 * 1024;

const CHUNK_FETCH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
struct CachedUrl {
    url: String,
    expires: Instant,
}

/// Acquires download URLs and opens object content
pub struct Downloader {
    client: Arc<ApiClient>,
    url_cache: RwLock<HashMap<i64, CachedUrl>>,
}

impl Downloader {
    /// Creates a downloader bound to a client
    #[must_use]
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            url_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves the current download URL for a file, consulting the cache
    pub async fn download_url(&self, id: FileId, user_agent: Option<&str>) -> Result<String> {
        if let Some(cached) = self
            .url_cache
            .read()
            .expect("url cache poisoned")
            .get(&id.as_i64())
        {
            if cached.expires > Instant::now() {
                debug!(%id, "download URL cache hit");
                return Ok(cached.url.clone());
            }
        }

        let data: DownloadInfoData = self
            .client
            .get_json_opts(
                endpoints::DOWNLOAD_INFO,
                &[("fileId", id.as_i64().to_string())],
                CallOpts {
                    user_agent,
                    ..CallOpts::default()
                },
            )
            .await?;

        self.url_cache
            .write()
            .expect("url cache poisoned")
            .insert(
                id.as_i64(),
                CachedUrl {
                    url: data.download_url.clone(),
                    expires: Instant::now() + URL_CACHE_TTL,
                },
            );
        Ok(data.download_url)
    }

    /// Drops a cached URL, forcing re-acquisition on the next open
    pub fn invalidate_url(&self, id: FileId) {
        self.url_cache
            .write()
            .expect("url cache poisoned")
            .remove(&id.as_i64());
    }

    /// Opens an object for reading.
    ///
    /// Whole-object reads of large files switch to parallel prefetch
    /// unless the caller disabled it; explicit ranges always stream
    /// sequentially.
    pub async fn open(&self, id: FileId, size: u64, opts: &OpenOptions) -> Result<ByteStream> {
        let url = self.download_url(id, opts.user_agent.as_deref()).await?;

        let eligible = opts.range.is_none()
            && !opts.disable_concurrent_download
            && size >= CONCURRENT_THRESHOLD;
        if eligible {
            match self.parallel_fetch(&url, size, opts).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    warn!(%id, error = %err, "parallel prefetch failed, falling back to sequential");
                }
            }
        }

        self.sequential(&url, opts).await
    }

    /// Plain streaming GET, paced and retried by the download pacer
    async fn sequential(&self, url: &str, opts: &OpenOptions) -> Result<ByteStream> {
        let pacer = self.client.pacer(PacerKind::Download);
        let ua = opts
            .user_agent
            .clone()
            .unwrap_or_else(|| self.client.user_agent().to_string());
        let range = opts.range;

        let resp = pacer
            .call(|| {
                let url = url.to_string();
                let ua = ua.clone();
                async move {
                    let mut req = self.client.http().get(&url).header(USER_AGENT, &ua);
                    if let Some(range) = range {
                        req = req.header(RANGE, format_range(range));
                    }
                    let resp = match req.send().await {
                        Ok(r) => r,
                        Err(e) => {
                            return (
                                true,
                                Err(BackendError::Transient(format!("download request: {e}"))),
                            )
                        }
                    };
                    let status = resp.status();
                    match status.as_u16() {
                        200 | 206 => (false, Ok(resp)),
                        404 => (
                            false,
                            Err(BackendError::NotFound("download URL expired or file gone".into())),
                        ),
                        429 => (
                            true,
                            Err(BackendError::RateLimited("download returned 429".into())),
                        ),
                        s if status.is_server_error() => (
                            true,
                            Err(BackendError::Transient(format!("download returned {s}"))),
                        ),
                        s => (
                            false,
                            Err(BackendError::Protocol {
                                code: i64::from(s),
                                message: "unexpected download status".to_string(),
                            }),
                        ),
                    }
                }
            })
            .await?;

        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e));
        Ok(Box::new(StreamReader::new(stream)))
    }

    /// Fetches the whole object with bounded parallel range reads into an
    /// anonymous temp file, then returns a reader over the reassembly
    async fn parallel_fetch(
        &self,
        url: &str,
        size: u64,
        opts: &OpenOptions,
    ) -> Result<ByteStream> {
        let tmp = tempfile::tempfile()
            .map_err(|e| BackendError::Transient(format!("creating prefetch file: {e}")))?;
        let file = Arc::new(tmp);
        let semaphore = Arc::new(Semaphore::new(CONCURRENT_WORKERS));
        let ua = opts
            .user_agent
            .clone()
            .unwrap_or_else(|| self.client.user_agent().to_string());

        debug!(size, chunk = CONCURRENT_CHUNK, "starting parallel prefetch");
        let mut handles = Vec::new();
        let mut offset = 0u64;
        while offset < size {
            let len = CONCURRENT_CHUNK.min(size - offset);
            let http = self.client.http().clone();
            let url = url.to_string();
            let ua = ua.clone();
            let file = Arc::clone(&file);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| BackendError::Transient("prefetch semaphore closed".into()))?;
                let bytes = fetch_chunk(&http, &url, &ua, offset, len).await?;
                tokio::task::spawn_blocking(move || {
                    file.write_all_at(&bytes, offset).map_err(|e| {
                        BackendError::Transient(format!("prefetch write at {offset}: {e}"))
                    })
                })
                .await
                .map_err(|e| BackendError::Transient(format!("prefetch writer died: {e}")))?
            }));
            offset += len;
        }

        for handle in handles {
            handle
                .await
                .map_err(|e| BackendError::Transient(format!("prefetch worker died: {e}")))??;
        }

        let mut reader = file
            .try_clone()
            .map_err(|e| BackendError::Transient(format!("reopening prefetch file: {e}")))?;
        use std::io::Seek;
        reader
            .seek(std::io::SeekFrom::Start(0))
            .map_err(|e| BackendError::Transient(format!("rewinding prefetch file: {e}")))?;
        Ok(Box::new(tokio::fs::File::from_std(reader)))
    }
}

/// Fetches one byte range, with a few attempts against transient failures
async fn fetch_chunk(
    http: &reqwest::Client,
    url: &str,
    ua: &str,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>> {
    let range_header = format!("bytes={}-{}", offset, offset + len - 1);
    let mut last_err = BackendError::Transient("no attempt made".into());
    for attempt in 1..=CHUNK_FETCH_ATTEMPTS {
        let resp = http
            .get(url)
            .header(USER_AGENT, ua)
            .header(RANGE, &range_header)
            .send()
            .await;
        match resp {
            Ok(resp) if matches!(resp.status().as_u16(), 200 | 206) => {
                let bytes = resp.bytes().await.map_err(|e| {
                    BackendError::Transient(format!("reading chunk at {offset}: {e}"))
                })?;
                if bytes.len() as u64 != len {
                    return Err(BackendError::Transient(format!(
                        "chunk at {offset} returned {} bytes, expected {len}",
                        bytes.len()
                    )));
                }
                return Ok(bytes.to_vec());
            }
            Ok(resp) if resp.status().is_server_error() || resp.status().as_u16() == 429 => {
                last_err =
                    BackendError::Transient(format!("chunk at {offset}: {}", resp.status()));
            }
            Ok(resp) => {
                return Err(BackendError::Protocol {
                    code: i64::from(resp.status().as_u16()),
                    message: format!("chunk at {offset} failed"),
                });
            }
            Err(e) => {
                last_err = BackendError::Transient(format!("chunk at {offset}: {e}"));
            }
        }
        debug!(attempt, offset, "retrying chunk fetch");
        tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
    }
    Err(last_err)
}

fn format_range(range: OpenRange) -> String {
    match range.length {
        Some(len) if len > 0 => format!("bytes={}-{}", range.offset, range.offset + len - 1),
        _ => format!("bytes={}-", range.offset),
    }
}
