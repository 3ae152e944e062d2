//! Authentication credentials for the upstream connection
//!
//! Acquisition (OAuth, session exchange) happens outside the relay. The relay
//! only reads whatever credential is current at connect time.

use crate::config::store::ConfigStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque upstream token with optional expiry
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    /// Unix milliseconds after which the token must not be used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Credential {
            token: token.into(),
            expires_at_ms: None,
        }
    }

    pub fn with_expiry(mut self, expires_at_ms: u64) -> Self {
        self.expires_at_ms = Some(expires_at_ms);
        self
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(expiry) if expiry <= now_ms)
    }

    /// Usable for gating: non-empty and not expired
    pub fn is_usable(&self, now_ms: u64) -> bool {
        !self.token.is_empty() && !self.is_expired(now_ms)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

/// Supplies the current credential, if any
pub trait CredentialProvider: Send + Sync + 'static {
    fn current(&self) -> Option<Credential>;
}

/// Reads the credential held in the configuration store, hiding expired ones
pub struct StoreCredentialProvider {
    store: Arc<dyn ConfigStore>,
}

impl StoreCredentialProvider {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        StoreCredentialProvider { store }
    }
}

impl CredentialProvider for StoreCredentialProvider {
    fn current(&self) -> Option<Credential> {
        let now = crate::io::wall_clock_ms();
        self.store
            .snapshot()
            .credential
            .filter(|credential| credential.is_usable(now))
    }
}

/// Fixed credential, e.g. a long-lived token from the environment
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: Option<Credential>,
}

impl StaticCredentialProvider {
    pub fn new(credential: Option<Credential>) -> Self {
        StaticCredentialProvider { credential }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn current(&self) -> Option<Credential> {
        self.credential.clone()
    }
}
