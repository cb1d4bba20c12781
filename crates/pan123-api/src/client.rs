//! API transport
//!
//! Single entry point for every call to the open platform. A call:
//! 1. ensures the token is valid,
//! 2. classifies the endpoint onto a pacer,
//! 3. routes payload endpoints to the dynamically discovered upload
//!    domain and everything else to the fixed API host,
//! 4. attaches the standard headers,
//! 5. runs inside the pacer loop, force-refreshing the token exactly once
//!    on a 401 and classifying transient failures for retry,
//! 6. decodes the `{code, message, data}` envelope and maps non-zero
//!    codes onto [`BackendError`] kinds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::multipart::Form;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use pan123_core::config::Config;
use pan123_core::ports::token_store::TokenStore;
use pan123_core::{BackendError, Result};

use crate::pacer::{Pacer, PacerKind, PacerSet};
use crate::token::TokenManager;
use crate::types::ApiResponse;

/// The fixed open-API host
pub const OPEN_API_BASE: &str = "https://open-api.123pan.com";

/// Known-good upload domain used when discovery fails
pub const FALLBACK_UPLOAD_DOMAIN: &str = "https://openapi-upload.123242.com";

/// Endpoint paths, grouped here so call sites and tests agree on them
pub mod endpoints {
    pub const USER_INFO: &str = "/api/v1/user/info";
    pub const FILE_LIST: &str = "/api/v2/file/list";
    pub const FILE_DETAIL: &str = "/api/v1/file/detail";
    pub const FILE_INFO: &str = "/api/v1/file/info";
    pub const DOWNLOAD_INFO: &str = "/api/v1/file/download_info";
    pub const MKDIR: &str = "/upload/v1/file/mkdir";
    pub const TRASH: &str = "/api/v1/file/trash";
    pub const MOVE: &str = "/api/v1/file/move";
    pub const RENAME: &str = "/api/v1/file/name";
    pub const UPLOAD_CREATE: &str = "/upload/v2/file/create";
    pub const UPLOAD_SLICE: &str = "/upload/v2/file/slice";
    pub const UPLOAD_COMPLETE: &str = "/upload/v2/file/upload_complete";
    pub const SINGLE_CREATE: &str = "/upload/v2/file/single/create";
    pub const UPLOAD_DOMAIN: &str = "/upload/v2/file/domain";
}

/// Per-call options; the defaults suit almost every endpoint
#[derive(Default)]
pub struct CallOpts<'a> {
    /// Overrides path-based pacer classification (bulk operations)
    pub kind: Option<PacerKind>,
    /// Per-attempt timeout (slice uploads)
    pub timeout: Option<Duration>,
    /// Overrides the configured User-Agent
    pub user_agent: Option<&'a str>,
    /// Builds the multipart form for this attempt; forms are single-use,
    /// so the transport rebuilds one per retry
    pub form: Option<&'a (dyn Fn() -> Result<Form> + Send + Sync)>,
}

/// The call envelope shared by every subsystem
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    upload_base_override: Option<String>,
    user_agent: String,
    pacers: PacerSet,
    tokens: TokenManager,
    upload_domain: RwLock<Option<String>>,
}

impl ApiClient {
    /// Creates a client against the production hosts
    pub fn new(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self> {
        Self::with_base_urls(config, store, OPEN_API_BASE, None)
    }

    /// Creates a client with overridden hosts (tests point both at a mock
    /// server)
    pub fn with_base_urls(
        config: &Config,
        store: Arc<dyn TokenStore>,
        base_url: &str,
        upload_base: Option<&str>,
    ) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::Transient(format!("building http client: {e}")))?;
        let pacers = PacerSet::new(config);
        let tokens = TokenManager::new(
            config,
            store,
            pacers.get(PacerKind::Token),
            http.clone(),
            base_url,
        );
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            upload_base_override: upload_base.map(str::to_string),
            user_agent: config.user_agent.clone(),
            pacers,
            tokens,
            upload_domain: RwLock::new(None),
        })
    }

    /// The underlying HTTP client, for direct content reads
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The configured User-Agent
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// The pacer for a class, for callers pacing non-envelope requests
    pub fn pacer(&self, kind: PacerKind) -> Arc<Pacer> {
        self.pacers.get(kind)
    }

    /// The token manager (the facade owns token state through this)
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    // ========================================================================
    // Host routing
    // ========================================================================

    fn needs_upload_domain(path: &str) -> bool {
        path.contains("file/slice") || path.contains("file/single/create")
    }

    /// The upload domain, discovered once and cached.
    ///
    /// Discovery failures fall back to the known default without caching,
    /// so a later call gets another chance at the real list.
    pub async fn upload_domain(&self) -> Result<String> {
        if let Some(domain) = self
            .upload_domain
            .read()
            .expect("upload domain lock poisoned")
            .clone()
        {
            return Ok(domain);
        }

        match self
            .get_json::<Vec<String>>(endpoints::UPLOAD_DOMAIN, &[])
            .await
        {
            Ok(domains) if !domains.is_empty() => {
                let domain = domains.into_iter().next().expect("non-empty");
                debug!(%domain, "discovered upload domain");
                *self
                    .upload_domain
                    .write()
                    .expect("upload domain lock poisoned") = Some(domain.clone());
                Ok(domain)
            }
            Ok(_) => {
                warn!("upload domain list empty, using fallback");
                Ok(FALLBACK_UPLOAD_DOMAIN.to_string())
            }
            Err(err) => {
                warn!(error = %err, "upload domain discovery failed, using fallback");
                Ok(FALLBACK_UPLOAD_DOMAIN.to_string())
            }
        }
    }

    async fn host_for(&self, path: &str) -> Result<String> {
        if Self::needs_upload_domain(path) {
            if let Some(overridden) = &self.upload_base_override {
                return Ok(overridden.clone());
            }
            Box::pin(self.upload_domain()).await
        } else {
            Ok(self.base_url.clone())
        }
    }

    // ========================================================================
    // Core call
    // ========================================================================

    /// Performs one enveloped call. Returns the decoded `data` field,
    /// which some mutations legitimately omit.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        opts: CallOpts<'_>,
    ) -> Result<Option<T>> {
        let kind = opts.kind.unwrap_or_else(|| PacerSet::classify(path));
        let pacer = self.pacers.get(kind);
        let host = self.host_for(path).await?;
        let url = format!("{host}{path}");
        let refreshed = AtomicBool::new(false);

        let body = &body;
        let opts = &opts;
        let refreshed = &refreshed;
        pacer
            .call(|| {
                let method = method.clone();
                let url = url.clone();
                async move {
                    self.attempt::<T>(method, &url, path, query, body, opts, refreshed)
                        .await
                }
            })
            .await
    }

    /// One attempt inside the pacer loop
    #[allow(clippy::too_many_arguments)]
    async fn attempt<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        path: &str,
        query: &[(&str, String)],
        body: &Option<Value>,
        opts: &CallOpts<'_>,
        refreshed: &AtomicBool,
    ) -> (bool, Result<Option<T>>) {
        let bearer = match self.tokens.ensure_valid(false, false).await {
            Ok(b) => b,
            Err(e) => return (e.is_retriable(), Err(e)),
        };

        let mut req = self
            .http
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
            .header("Platform", "open_platform")
            .header(USER_AGENT, opts.user_agent.unwrap_or(&self.user_agent));
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(timeout) = opts.timeout {
            req = req.timeout(timeout);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(make_form) = opts.form {
            match make_form() {
                Ok(form) => req = req.multipart(form),
                Err(e) => return (false, Err(e)),
            }
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                return (
                    true,
                    Err(BackendError::Transient(format!("request {path}: {e}"))),
                )
            }
        };

        let status = resp.status();
        if status.as_u16() == 401 {
            if !refreshed.swap(true, Ordering::SeqCst) {
                debug!(path, "401 received, forcing token refresh");
                return match self.tokens.ensure_valid(true, true).await {
                    Ok(_) => (
                        true,
                        Err(BackendError::Auth(format!(
                            "unauthorized on {path}, token refreshed"
                        ))),
                    ),
                    Err(e) => (false, Err(e)),
                };
            }
            return (
                false,
                Err(BackendError::Auth(format!(
                    "unauthorized on {path} after token refresh"
                ))),
            );
        }
        if status.as_u16() == 429 {
            return (
                true,
                Err(BackendError::RateLimited(format!("{path} returned 429"))),
            );
        }
        if status.is_server_error() {
            return (
                true,
                Err(BackendError::Transient(format!(
                    "{path} returned {status}"
                ))),
            );
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return (
                false,
                Err(BackendError::Protocol {
                    code: i64::from(status.as_u16()),
                    message: format!("{path}: {text}"),
                }),
            );
        }

        let bytes = match resp.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return (
                    true,
                    Err(BackendError::Transient(format!(
                        "reading {path} response: {e}"
                    ))),
                )
            }
        };
        let envelope: ApiResponse<T> = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(e) => {
                return (
                    false,
                    Err(BackendError::Protocol {
                        code: -1,
                        message: format!("undecodable response from {path}: {e}"),
                    }),
                )
            }
        };

        if !envelope.is_success() {
            let err = map_api_code(envelope.code, &envelope.message);
            return (err.is_retriable(), Err(err));
        }
        (false, Ok(envelope.data))
    }

    // ========================================================================
    // Convenience wrappers
    // ========================================================================

    /// GET expecting a data payload
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.call(Method::GET, path, query, None, CallOpts::default())
            .await?
            .ok_or_else(|| missing_data(path))
    }

    /// GET expecting a data payload, with per-call options
    pub async fn get_json_opts<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        opts: CallOpts<'_>,
    ) -> Result<T> {
        self.call(Method::GET, path, query, None, opts)
            .await?
            .ok_or_else(|| missing_data(path))
    }

    /// POST with a JSON body, expecting a data payload
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = to_body(body)?;
        self.call(Method::POST, path, &[], Some(body), CallOpts::default())
            .await?
            .ok_or_else(|| missing_data(path))
    }

    /// POST with a JSON body, ignoring whatever data comes back
    pub async fn post_empty<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        kind: Option<PacerKind>,
    ) -> Result<()> {
        let body = to_body(body)?;
        self.call::<Value>(
            Method::POST,
            path,
            &[],
            Some(body),
            CallOpts {
                kind,
                ..CallOpts::default()
            },
        )
        .await?;
        Ok(())
    }

    /// PUT with a JSON body, ignoring whatever data comes back
    pub async fn put_empty<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let body = to_body(body)?;
        self.call::<Value>(Method::PUT, path, &[], Some(body), CallOpts::default())
            .await?;
        Ok(())
    }

    /// POST multipart/form-data to the upload domain, expecting a payload
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        make_form: &(dyn Fn() -> Result<Form> + Send + Sync),
        timeout: Option<Duration>,
    ) -> Result<T> {
        self.call(
            Method::POST,
            path,
            &[],
            None,
            CallOpts {
                timeout,
                form: Some(make_form),
                ..CallOpts::default()
            },
        )
        .await?
        .ok_or_else(|| missing_data(path))
    }

    /// POST multipart/form-data, ignoring whatever data comes back
    pub async fn post_form_empty(
        &self,
        path: &str,
        make_form: &(dyn Fn() -> Result<Form> + Send + Sync),
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.call::<Value>(
            Method::POST,
            path,
            &[],
            None,
            CallOpts {
                timeout,
                form: Some(make_form),
                ..CallOpts::default()
            },
        )
        .await?;
        Ok(())
    }
}

fn to_body<B: Serialize>(body: &B) -> Result<Value> {
    serde_json::to_value(body)
        .map_err(|e| BackendError::Validation(format!("unserializable request body: {e}")))
}

fn missing_data(path: &str) -> BackendError {
    BackendError::Protocol {
        code: -1,
        message: format!("{path} succeeded but carried no data"),
    }
}

// ============================================================================
// API code mapping
// ============================================================================

/// API code for "file does not exist"
pub const CODE_FILE_NOT_FOUND: i64 = 5066;

/// Maps a non-zero envelope code onto an error kind
#[must_use]
pub fn map_api_code(code: i64, message: &str) -> BackendError {
    match code {
        401 => BackendError::Auth(message.to_string()),
        429 => BackendError::RateLimited(message.to_string()),
        CODE_FILE_NOT_FOUND => BackendError::NotFound(message.to_string()),
        _ if message_means_duplicate(message) => BackendError::Conflict(message.to_string()),
        _ => BackendError::Protocol {
            code,
            message: message.to_string(),
        },
    }
}

fn message_means_duplicate(message: &str) -> bool {
    message.contains("同名") || message.to_ascii_lowercase().contains("already exist")
}

/// Whether an error reports a duplicate-name collision
#[must_use]
pub fn error_means_duplicate(err: &BackendError) -> bool {
    match err {
        BackendError::Conflict(_) => true,
        BackendError::Protocol { message, .. } => message_means_duplicate(message),
        _ => false,
    }
}

/// Whether an error reports a stale/deleted parent directory ID
#[must_use]
pub fn error_means_parent_missing(err: &BackendError) -> bool {
    let message = match err {
        BackendError::Protocol { message, .. } => message,
        BackendError::NotFound(message) => message,
        _ => return false,
    };
    message.contains("parentFileID") || message.contains("父目录") || message.contains("父级")
}
