//! Configuration
//!
//! Two kinds of configuration live here:
//!
//! - **Settings** (`settings`): static daemon parameters read once at startup
//!   from a TOML file plus environment overrides (endpoint, retry budget,
//!   delivery deadline, listen address, logging).
//! - **Live configuration** (`store`, `file_store`): the user-controlled
//!   `{enabled, filter_id, credential}` triple that gates the upstream
//!   connection. It is written by external collaborators and observed through
//!   a change feed; the relay itself never writes it back.

pub mod file_store;
pub mod settings;
pub mod store;

pub use file_store::FileConfigStore;
pub use settings::{
    AuthScheme, ControlSettings, DeliverySettings, FilterSettings, LoggingSettings,
    RelaySettings, RetryPolicyKind, RetrySettings, StoreSettings, UpstreamSettings,
};
pub use store::{
    ConfigChange, ConfigField, ConfigStore, Configuration, Gate, GateFailure,
    InMemoryConfigStore,
};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("failed to serialize configuration: {0}")]
    Serialize(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Serde helper for `Duration` stored as integer milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
