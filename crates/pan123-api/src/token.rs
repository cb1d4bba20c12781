//! Access-token lifecycle
//!
//! The credential is a `(bearer, expiry)` pair obtained from the token
//! endpoint with the client ID/secret, considered valid while
//! `now + 10 min < expiry`, and persisted through the host's
//! [`TokenStore`] whenever it changes. All state lives behind one async
//! mutex so concurrent callers refresh at most once; a 401 anywhere in the
//! transport forces a refresh through [`TokenManager::ensure_valid`] with
//! both flags set.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};

use pan123_core::config::{Config, PersistedToken};
use pan123_core::ports::token_store::TokenStore;
use pan123_core::{BackendError, Result};

use crate::pacer::Pacer;
use crate::types::{ApiResponse, TokenData, TokenRequest};

/// Path of the credential endpoint
pub const TOKEN_PATH: &str = "/api/v1/access_token";

/// Refresh this long before the server-reported expiry
const EXPIRY_MARGIN_MINUTES: i64 = 10;

/// Obtains, caches, refreshes, and persists the access credential
pub struct TokenManager {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    user_agent: String,
    store: Arc<dyn TokenStore>,
    pacer: Arc<Pacer>,
    state: tokio::sync::Mutex<Option<PersistedToken>>,
}

impl TokenManager {
    /// Creates a manager seeded with whatever credential the configuration
    /// carried over from the last run
    pub fn new(
        config: &Config,
        store: Arc<dyn TokenStore>,
        pacer: Arc<Pacer>,
        http: reqwest::Client,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            user_agent: config.user_agent.clone(),
            store,
            pacer,
            state: tokio::sync::Mutex::new(config.token.clone()),
        }
    }

    /// A snapshot of the current bearer, without refreshing
    pub async fn current_bearer(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    /// Ensures a usable bearer and returns it.
    ///
    /// With both flags false the cached credential is returned while it is
    /// inside its validity window. `force_if_expired` narrows the freshness
    /// test to hard expiry; `force_always` refreshes unconditionally. The
    /// 401-recovery path in the transport calls `ensure_valid(true, true)`.
    pub async fn ensure_valid(&self, force_if_expired: bool, force_always: bool) -> Result<String> {
        let mut state = self.state.lock().await;

        if !force_always {
            if let Some(tok) = state.as_ref() {
                if token_fresh(tok.expiry, force_if_expired) {
                    return Ok(tok.access_token.clone());
                }
            }
        }

        let refreshed = self.request_token().await?;
        info!(expiry = %refreshed.expiry, "obtained access token");
        if let Err(err) = self.store.persist(&refreshed).await {
            // A credential that cannot be persisted still works for this
            // process; the next run will simply re-authenticate.
            warn!(error = %err, "failed to persist access token");
        }
        let bearer = refreshed.access_token.clone();
        *state = Some(refreshed);
        Ok(bearer)
    }

    /// Issues the token-endpoint request under the token pacer
    async fn request_token(&self) -> Result<PersistedToken> {
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let body = TokenRequest {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        };

        debug!("requesting access token");
        self.pacer
            .call(|| {
                let url = url.clone();
                let body = &body;
                async move {
                    let resp = match self
                        .http
                        .post(&url)
                        .header("Platform", "open_platform")
                        .header(reqwest::header::USER_AGENT, &self.user_agent)
                        .json(body)
                        .send()
                        .await
                    {
                        Ok(r) => r,
                        Err(e) => {
                            return (
                                true,
                                Err(BackendError::Transient(format!("token request: {e}"))),
                            )
                        }
                    };

                    let status = resp.status();
                    if status.as_u16() == 429 || status.is_server_error() {
                        return (
                            true,
                            Err(BackendError::Transient(format!(
                                "token endpoint returned {status}"
                            ))),
                        );
                    }
                    if !status.is_success() {
                        return (
                            false,
                            Err(BackendError::Auth(format!(
                                "token endpoint returned {status}"
                            ))),
                        );
                    }

                    let envelope: ApiResponse<TokenData> = match resp.json().await {
                        Ok(e) => e,
                        Err(e) => {
                            return (
                                false,
                                Err(BackendError::Auth(format!(
                                    "malformed token response: {e}"
                                ))),
                            )
                        }
                    };
                    if !envelope.is_success() {
                        let retriable = envelope.code == 429;
                        let err = if retriable {
                            BackendError::RateLimited(envelope.message)
                        } else {
                            BackendError::Auth(format!(
                                "token endpoint code {}: {}",
                                envelope.code, envelope.message
                            ))
                        };
                        return (retriable, Err(err));
                    }

                    (false, parse_token_data(envelope.data))
                }
            })
            .await
    }
}

/// Validates and converts the token payload
fn parse_token_data(data: Option<TokenData>) -> Result<PersistedToken> {
    let data = data
        .ok_or_else(|| BackendError::Auth("token response carried no data".to_string()))?;
    let access_token = data
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| BackendError::Auth("token response missing accessToken".to_string()))?;
    let expired_at = data
        .expired_at
        .ok_or_else(|| BackendError::Auth("token response missing expiredAt".to_string()))?;
    let expiry = DateTime::parse_from_rfc3339(&expired_at)
        .map_err(|e| BackendError::Auth(format!("invalid expiredAt {expired_at:?}: {e}")))?
        .with_timezone(&Utc);
    Ok(PersistedToken {
        access_token,
        expiry,
    })
}

/// The freshness test behind `ensure_valid`
fn token_fresh(expiry: DateTime<Utc>, hard_expiry_only: bool) -> bool {
    let now = Utc::now();
    if hard_expiry_only {
        expiry > now
    } else {
        expiry > now + ChronoDuration::minutes(EXPIRY_MARGIN_MINUTES)
    }
}
