//! Rate limiting and retry fabric
//!
//! Every API call is wrapped by a [`Pacer`] drawn from the [`PacerSet`].
//! A pacer guarantees a minimum delay between call starts, grows its
//! effective delay exponentially while calls ask to be retried, and decays
//! it back toward the floor on success. Retries live exclusively here:
//! inner functions report a `(should_retry, result)` pair and never loop
//! themselves, so a failing call is retried exactly once per pacer turn
//! rather than multiplicatively.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pan123_api::pacer::{Pacer, PacerKind};
//!
//! # async fn example() -> pan123_core::Result<()> {
//! let pacer = Pacer::with_defaults(PacerKind::List);
//! let listing = pacer
//!     .call(|| async { (false, Ok::<_, pan123_core::BackendError>(vec![1, 2, 3])) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use pan123_core::config::Config;
use pan123_core::Result;

/// Maximum attempts per paced call before the last error is surfaced
pub const MAX_ATTEMPTS: u32 = 10;

// ============================================================================
// PacerKind
// ============================================================================

/// The six pacer classes, one per API family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacerKind {
    /// Directory listing
    List,
    /// Move/rename/trash/single-file info and anything unclassified
    Strict,
    /// Slice and single-step payload uploads (the hot path)
    Upload,
    /// Download-URL acquisition and content reads
    Download,
    /// Bulk operations (multi-ID trash during purge)
    Batch,
    /// Credential endpoint
    Token,
}

impl PacerKind {
    /// The default floor delay for this class
    #[must_use]
    pub fn default_min_sleep(&self) -> Duration {
        match self {
            Self::List => Duration::from_millis(200),
            Self::Strict => Duration::from_millis(250),
            Self::Upload => Duration::from_millis(20),
            Self::Download => Duration::from_millis(500),
            Self::Batch => Duration::from_millis(200),
            Self::Token => Duration::from_secs(1),
        }
    }

    /// The backoff ceiling for this class
    #[must_use]
    pub fn default_max_sleep(&self) -> Duration {
        match self {
            Self::Token => Duration::from_secs(10),
            _ => Duration::from_secs(2),
        }
    }
}

// ============================================================================
// Pacer
// ============================================================================

#[derive(Debug)]
struct PacerInner {
    /// Current effective delay between call starts
    delay: Duration,
    /// Earliest instant the next call may start
    not_before: Option<Instant>,
}

/// Token-pacing wrapper with exponential backoff
///
/// Concurrent callers each reserve the next slot under the internal lock,
/// so calls in one class are spaced by at least the effective delay even
/// when issued in parallel.
#[derive(Debug)]
pub struct Pacer {
    min_sleep: Duration,
    max_sleep: Duration,
    decay: f64,
    inner: Mutex<PacerInner>,
}

impl Pacer {
    /// Creates a pacer with explicit parameters
    #[must_use]
    pub fn new(min_sleep: Duration, max_sleep: Duration, decay: f64) -> Self {
        Self {
            min_sleep,
            max_sleep,
            decay: decay.max(1.0),
            inner: Mutex::new(PacerInner {
                delay: min_sleep,
                not_before: None,
            }),
        }
    }

    /// Creates a pacer with the class defaults
    #[must_use]
    pub fn with_defaults(kind: PacerKind) -> Self {
        Self::new(kind.default_min_sleep(), kind.default_max_sleep(), 2.0)
    }

    /// The configured floor delay
    #[must_use]
    pub fn min_sleep(&self) -> Duration {
        self.min_sleep
    }

    /// The current effective delay (grows on retries, decays on success)
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.inner.lock().expect("pacer poisoned").delay
    }

    /// Reserves the next call slot and sleeps until it arrives
    async fn begin(&self) {
        let wake = {
            let mut inner = self.inner.lock().expect("pacer poisoned");
            let now = Instant::now();
            let wake = inner.not_before.map_or(now, |nb| nb.max(now));
            inner.not_before = Some(wake + inner.delay);
            wake
        };
        tokio::time::sleep_until(tokio::time::Instant::from_std(wake)).await;
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("pacer poisoned");
        if inner.delay > self.min_sleep {
            let decayed = inner.delay.div_f64(self.decay).max(self.min_sleep);
            debug!(
                old_ms = inner.delay.as_millis(),
                new_ms = decayed.as_millis(),
                "pacer delay decaying"
            );
            inner.delay = decayed;
        }
    }

    fn on_retry(&self) {
        let mut inner = self.inner.lock().expect("pacer poisoned");
        let raised = (inner.delay * 2).min(self.max_sleep).max(self.min_sleep);
        debug!(
            old_ms = inner.delay.as_millis(),
            new_ms = raised.as_millis(),
            "pacer delay rising after retry"
        );
        inner.delay = raised;
    }

    /// Runs a retriable action under this pacer.
    ///
    /// `f` is invoked once per attempt and returns `(should_retry, result)`.
    /// While `should_retry` is true and attempts remain, the pacer raises
    /// its delay and tries again; otherwise the result is returned as-is.
    pub async fn call<T, F, Fut>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = (bool, Result<T>)>,
    {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            self.begin().await;
            let (should_retry, result) = f().await;
            match result {
                Ok(value) => {
                    self.on_success();
                    return Ok(value);
                }
                Err(err) if should_retry && attempt < MAX_ATTEMPTS => {
                    debug!(attempt, error = %err, "paced call retrying");
                    self.on_retry();
                    last_err = Some(err);
                }
                Err(err) => {
                    if should_retry {
                        warn!(attempt, error = %err, "paced call exhausted retries");
                        self.on_retry();
                    }
                    return Err(err);
                }
            }
        }
        Err(last_err.expect("retry loop exited without an error"))
    }
}

// ============================================================================
// PacerSet
// ============================================================================

/// One pacer per API class, shared across the whole backend instance
#[derive(Debug, Clone)]
pub struct PacerSet {
    list: Arc<Pacer>,
    strict: Arc<Pacer>,
    upload: Arc<Pacer>,
    download: Arc<Pacer>,
    batch: Arc<Pacer>,
    token: Arc<Pacer>,
}

impl PacerSet {
    /// Builds the set, applying the configured floors where the
    /// configuration exposes them
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let make = |kind: PacerKind, floor: Duration| {
            Arc::new(Pacer::new(floor, kind.default_max_sleep(), 2.0))
        };
        Self {
            list: make(PacerKind::List, PacerKind::List.default_min_sleep()),
            strict: make(PacerKind::Strict, config.strict_pacer_min_sleep),
            upload: make(PacerKind::Upload, config.upload_pacer_min_sleep),
            download: make(PacerKind::Download, config.download_pacer_min_sleep),
            batch: make(PacerKind::Batch, PacerKind::Batch.default_min_sleep()),
            token: make(PacerKind::Token, PacerKind::Token.default_min_sleep()),
        }
    }

    /// Returns the pacer for a class
    #[must_use]
    pub fn get(&self, kind: PacerKind) -> Arc<Pacer> {
        match kind {
            PacerKind::List => Arc::clone(&self.list),
            PacerKind::Strict => Arc::clone(&self.strict),
            PacerKind::Upload => Arc::clone(&self.upload),
            PacerKind::Download => Arc::clone(&self.download),
            PacerKind::Batch => Arc::clone(&self.batch),
            PacerKind::Token => Arc::clone(&self.token),
        }
    }

    /// Maps an endpoint path to its pacer class.
    ///
    /// Unknown endpoints are routed to [`PacerKind::Strict`]; bulk callers
    /// override the class explicitly instead of relying on path matching.
    #[must_use]
    pub fn classify(path: &str) -> PacerKind {
        if path.contains("access_token") {
            PacerKind::Token
        } else if path.contains("file/list") {
            PacerKind::List
        } else if path.contains("file/slice") || path.contains("file/single/create") {
            PacerKind::Upload
        } else if path.contains("download_info") {
            PacerKind::Download
        } else {
            PacerKind::Strict
        }
    }
}
