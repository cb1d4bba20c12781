//! Backend configuration
//!
//! Every knob the host configuration layer can set for one backend
//! instance. Defaults follow the remote's published limits; `validate()`
//! is called once at facade construction so the adapters can assume a
//! well-formed configuration afterwards.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::encoding::Encoding;
use crate::domain::errors::BackendError;
use crate::domain::newtypes::FileId;
use crate::Result;

/// Hard ceiling on the number of chunks in one upload session
pub const MAX_UPLOAD_PARTS_LIMIT: u32 = 10_000;

fn default_user_agent() -> String {
    // A current desktop Chrome UA; some CDN nodes reject obviously
    // non-browser agents.
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36"
        .to_string()
}

fn default_root_folder_id() -> String {
    "0".to_string()
}

fn default_max_upload_parts() -> u32 {
    1_000
}

fn default_upload_pacer_min_sleep() -> Duration {
    Duration::from_millis(20)
}

fn default_download_pacer_min_sleep() -> Duration {
    Duration::from_millis(500)
}

fn default_strict_pacer_min_sleep() -> Duration {
    Duration::from_millis(250)
}

/// The persisted credential, stored by the host under the `token` key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedToken {
    /// Bearer token for API requests
    pub access_token: String,
    /// RFC3339 expiry instant
    pub expiry: DateTime<Utc>,
}

/// Configuration for one backend instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Open-platform client ID (required)
    pub client_id: String,
    /// Open-platform client secret (required)
    pub client_secret: String,
    /// Previously persisted credential, if any
    #[serde(default)]
    pub token: Option<PersistedToken>,
    /// User-Agent sent on every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// ID of the directory all remote paths are anchored at
    #[serde(default = "default_root_folder_id")]
    pub root_folder_id: String,
    /// Maximum number of chunks per upload session (clamped to 10000)
    #[serde(default = "default_max_upload_parts")]
    pub max_upload_parts: u32,
    /// Floor delay between chunk uploads
    #[serde(default = "default_upload_pacer_min_sleep")]
    pub upload_pacer_min_sleep: Duration,
    /// Floor delay between download-URL requests
    #[serde(default = "default_download_pacer_min_sleep")]
    pub download_pacer_min_sleep: Duration,
    /// Floor delay between mutation requests
    #[serde(default = "default_strict_pacer_min_sleep")]
    pub strict_pacer_min_sleep: Duration,
    /// Remote-name character encoding classes
    #[serde(default)]
    pub encoding: Encoding,
}

impl Config {
    /// Builds a configuration with defaults from the required credentials
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token: None,
            user_agent: default_user_agent(),
            root_folder_id: default_root_folder_id(),
            max_upload_parts: default_max_upload_parts(),
            upload_pacer_min_sleep: default_upload_pacer_min_sleep(),
            download_pacer_min_sleep: default_download_pacer_min_sleep(),
            strict_pacer_min_sleep: default_strict_pacer_min_sleep(),
            encoding: Encoding::default(),
        }
    }

    /// Checks required keys and bounds
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(BackendError::Validation("client_id is required".into()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(BackendError::Validation("client_secret is required".into()));
        }
        if self.max_upload_parts == 0 {
            return Err(BackendError::Validation(
                "max_upload_parts must be at least 1".into(),
            ));
        }
        self.root_folder()?;
        Ok(())
    }

    /// The configured root folder ID, parsed
    pub fn root_folder(&self) -> Result<FileId> {
        self.root_folder_id.parse()
    }

    /// `max_upload_parts` clamped to the remote's hard ceiling
    #[must_use]
    pub fn effective_max_upload_parts(&self) -> u32 {
        self.max_upload_parts.min(MAX_UPLOAD_PARTS_LIMIT)
    }
}
