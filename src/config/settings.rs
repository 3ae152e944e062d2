//! Daemon settings
//!
//! Loaded from an optional TOML file, then overridden from the environment:
//!
//! - `RELAY_ENDPOINT`: upstream event-stream URL
//! - `RELAY_MAX_RETRIES`: consecutive failures before giving up (default: 10)
//! - `RELAY_RETRY_DELAY_MS`: delay between reconnect attempts (default: 5000)
//! - `RELAY_DELIVERY_TIMEOUT_MS`: per-event delivery deadline (default: 3000)
//! - `RELAY_CONTROL_ADDR`: control listener address (default: 127.0.0.1:7380)
//! - `RELAY_STORE_PATH`: live configuration file (default: relay-config.toml)
//! - `RELAY_TARGETS_FILE`: delivery target list
//! - `RELAY_LOG_LEVEL`: default log filter when `RUST_LOG` is unset
//! - `RELAY_LOG_JSON`: emit JSON logs (`true`/`1`)

use super::{duration_millis, ConfigError};
use crate::connector::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub upstream: UpstreamSettings,
    pub filter: FilterSettings,
    pub retry: RetrySettings,
    pub delivery: DeliverySettings,
    pub control: ControlSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

/// How the credential is presented to the upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `Cookie: <cookie_name>=<token>`
    Cookie { cookie_name: String },
}

impl Default for AuthScheme {
    fn default() -> Self {
        AuthScheme::Bearer
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    pub endpoint: String,
    pub auth: AuthScheme,
    #[serde(with = "duration_millis", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        UpstreamSettings {
            endpoint: "http://127.0.0.1:8080/events".to_string(),
            auth: AuthScheme::Bearer,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Event kind that is eligible for delivery
    pub event_kind: String,
    /// Payload field compared against the configured filter identifier
    pub identifier_field: String,
}

impl Default for FilterSettings {
    fn default() -> Self {
        FilterSettings {
            event_kind: "pause-equivalent".to_string(),
            identifier_field: "rewardId".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicyKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    #[serde(with = "duration_millis", rename = "delay_ms")]
    pub delay: Duration,
    pub policy: RetryPolicyKind,
    /// Upper bound for the exponential policy
    #[serde(with = "duration_millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: 10,
            delay: Duration::from_millis(5_000),
            policy: RetryPolicyKind::Fixed,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetrySettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        match self.policy {
            RetryPolicyKind::Fixed => RetryPolicy::Fixed { delay: self.delay },
            RetryPolicyKind::Exponential => RetryPolicy::Exponential {
                initial: self.delay,
                cap: self.max_delay,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    #[serde(with = "duration_millis", rename = "timeout_ms")]
    pub timeout: Duration,
    /// TOML file listing HTTP delivery targets, re-read per event
    pub targets_file: PathBuf,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        DeliverySettings {
            timeout: Duration::from_millis(3_000),
            targets_file: PathBuf::from("relay-targets.toml"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub listen_addr: String,
}

impl Default for ControlSettings {
    fn default() -> Self {
        ControlSettings {
            listen_addr: "127.0.0.1:7380".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
    #[serde(with = "duration_millis", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            path: PathBuf::from("relay-config.toml"),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RelaySettings {
    /// Load from `path` (if given), apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => RelaySettings::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `RELAY_*` overrides from an arbitrary lookup (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("RELAY_ENDPOINT") {
            self.upstream.endpoint = endpoint;
        }
        if let Some(value) = lookup("RELAY_MAX_RETRIES") {
            self.retry.max_attempts = parse_number("RELAY_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("RELAY_RETRY_DELAY_MS") {
            self.retry.delay = Duration::from_millis(parse_number("RELAY_RETRY_DELAY_MS", &value)?);
        }
        if let Some(value) = lookup("RELAY_DELIVERY_TIMEOUT_MS") {
            self.delivery.timeout =
                Duration::from_millis(parse_number("RELAY_DELIVERY_TIMEOUT_MS", &value)?);
        }
        if let Some(addr) = lookup("RELAY_CONTROL_ADDR") {
            self.control.listen_addr = addr;
        }
        if let Some(path) = lookup("RELAY_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(path) = lookup("RELAY_TARGETS_FILE") {
            self.delivery.targets_file = PathBuf::from(path);
        }
        if let Some(level) = lookup("RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(value) = lookup("RELAY_LOG_JSON") {
            self.logging.json = value == "true" || value == "1";
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.endpoint.is_empty() {
            return Err(invalid("upstream.endpoint", ""));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "0"));
        }
        if self.delivery.timeout.is_zero() {
            return Err(invalid("delivery.timeout_ms", "0"));
        }
        if self.filter.identifier_field.is_empty() {
            return Err(invalid("filter.identifier_field", ""));
        }
        Ok(())
    }
}

/// Parse into the target width; out-of-range values are rejected, not truncated
fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = RelaySettings::default();
        assert_eq!(settings.retry.max_attempts, 10);
        assert_eq!(settings.retry.delay, Duration::from_millis(5_000));
        assert_eq!(settings.retry.policy, RetryPolicyKind::Fixed);
        assert_eq!(settings.delivery.timeout, Duration::from_secs(3));
        assert_eq!(settings.filter.identifier_field, "rewardId");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: RelaySettings = toml::from_str(
            r#"
            [upstream]
            endpoint = "https://events.example.com/stream"

            [upstream.auth]
            scheme = "cookie"
            cookie_name = "session"

            [retry]
            max_attempts = 3
            delay_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(settings.upstream.endpoint, "https://events.example.com/stream");
        assert_eq!(
            settings.upstream.auth,
            AuthScheme::Cookie {
                cookie_name: "session".to_string()
            }
        );
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.delay, Duration::from_millis(250));
        assert_eq!(settings.control.listen_addr, "127.0.0.1:7380");
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("RELAY_MAX_RETRIES", "4"),
            ("RELAY_RETRY_DELAY_MS", "100"),
            ("RELAY_LOG_JSON", "1"),
            ("RELAY_CONTROL_ADDR", "0.0.0.0:9000"),
        ]
        .into_iter()
        .collect();

        let mut settings = RelaySettings::default();
        settings
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.retry.max_attempts, 4);
        assert_eq!(settings.retry.delay, Duration::from_millis(100));
        assert!(settings.logging.json);
        assert_eq!(settings.control.listen_addr, "0.0.0.0:9000");
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut settings = RelaySettings::default();
        let err = settings
            .apply_overrides(|key| (key == "RELAY_MAX_RETRIES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_out_of_range_retries_rejected() {
        let mut settings = RelaySettings::default();
        let err = settings
            .apply_overrides(|key| (key == "RELAY_MAX_RETRIES").then(|| "4294967297".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "RELAY_MAX_RETRIES"
        ));
        assert_eq!(settings.retry.max_attempts, 10);
    }

    #[test]
    fn test_zero_retries_invalid() {
        let mut settings = RelaySettings::default();
        settings.retry.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_exponential_policy_mapping() {
        let mut settings = RelaySettings::default();
        settings.retry.policy = RetryPolicyKind::Exponential;
        assert!(matches!(
            settings.retry.retry_policy(),
            RetryPolicy::Exponential { .. }
        ));
    }
}
