//! Backend error taxonomy
//!
//! Every operation in the backend returns [`Result<T>`] with a
//! [`BackendError`] classifying the failure. The taxonomy is part of the
//! host contract: the embedding engine dispatches on these kinds (retry,
//! re-anchor, surface to the user), so adapters must map remote failures
//! onto them rather than invent ad-hoc strings.

use thiserror::Error;

/// Errors surfaced by the 123Pan backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The path or ID does not exist on the remote
    #[error("not found: {0}")]
    NotFound(String),

    /// The configured root resolves to a file; the host should re-create
    /// the facade anchored at the parent directory
    #[error("root points at a file: {0}")]
    IsFile(String),

    /// The caller treated a directory as a file
    #[error("not a file: {0}")]
    NotAFile(String),

    /// The bearer credential was rejected or could not be obtained
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The entry was rejected by server-side moderation
    #[error("permission denied: {0}")]
    Permission(String),

    /// Duplicate name or move-to-same-location
    #[error("conflict: {0}")]
    Conflict(String),

    /// The remote imposed a rate limit or quota
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network failure, 5xx, or another condition worth retrying
    #[error("transient error: {0}")]
    Transient(String),

    /// Local input validation failed; nothing was sent to the remote
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unexpected non-zero API code with no specific mapping
    #[error("api error {code}: {message}")]
    Protocol {
        /// The `code` field of the API response envelope
        code: i64,
        /// The `message` field of the API response envelope
        message: String,
    },
}

impl BackendError {
    /// Whether a pacer should retry the failed call.
    ///
    /// Auth errors are not retriable here: the transport self-heals them
    /// once via a forced token refresh, and a second 401 is terminal.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited(_))
    }
}

/// Result alias used throughout the backend
pub type Result<T> = std::result::Result<T, BackendError>;
