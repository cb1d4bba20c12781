//! Token persistence port
//!
//! The access credential survives restarts as JSON under the host's
//! `token` configuration key. The backend never touches the host's
//! configuration store directly; it persists through this callback, which
//! keeps token state local to one facade instance instead of a
//! process-wide singleton.

use async_trait::async_trait;

use crate::config::PersistedToken;
use crate::Result;

/// Host-supplied persistence for the access credential
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Loads the previously persisted credential, if any
    async fn load(&self) -> Result<Option<PersistedToken>>;

    /// Writes the credential back to the host configuration layer
    async fn persist(&self, token: &PersistedToken) -> Result<()>;
}

/// A store that persists nothing; useful for tests and one-shot tools
#[derive(Debug, Default)]
pub struct NullTokenStore;

#[async_trait]
impl TokenStore for NullTokenStore {
    async fn load(&self) -> Result<Option<PersistedToken>> {
        Ok(None)
    }

    async fn persist(&self, _token: &PersistedToken) -> Result<()> {
        Ok(())
    }
}

/// An in-memory store for tests that want to observe persistence
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: std::sync::Mutex<Option<PersistedToken>>,
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<PersistedToken>> {
        Ok(self.inner.lock().expect("token store poisoned").clone())
    }

    async fn persist(&self, token: &PersistedToken) -> Result<()> {
        *self.inner.lock().expect("token store poisoned") = Some(token.clone());
        Ok(())
    }
}
