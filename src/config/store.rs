//! Live configuration store and change feed

use crate::credential::Credential;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANGE_FEED_CAPACITY: usize = 64;

/// User-controlled settings that gate the upstream connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub enabled: bool,
    #[serde(alias = "filterId")]
    pub filter_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
}

/// Why the gating precondition does not hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateFailure {
    Disabled,
    MissingCredential,
    MissingFilter,
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateFailure::Disabled => write!(f, "relay disabled"),
            GateFailure::MissingCredential => write!(f, "no usable credential"),
            GateFailure::MissingFilter => write!(f, "filter identifier empty"),
        }
    }
}

/// Outcome of evaluating the gating precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    Permitted,
    Refused(GateFailure),
}

impl Gate {
    /// `enabled && credential usable && filter_id non-empty`
    pub fn evaluate(config: &Configuration, credential: Option<&Credential>, now_ms: u64) -> Gate {
        if !config.enabled {
            return Gate::Refused(GateFailure::Disabled);
        }
        if !credential.is_some_and(|c| c.is_usable(now_ms)) {
            return Gate::Refused(GateFailure::MissingCredential);
        }
        if config.filter_id.is_empty() {
            return Gate::Refused(GateFailure::MissingFilter);
        }
        Gate::Permitted
    }

    pub fn is_permitted(&self) -> bool {
        matches!(self, Gate::Permitted)
    }
}

impl Configuration {
    /// Gate using the credential stored in this configuration
    pub fn gate(&self, now_ms: u64) -> Gate {
        Gate::evaluate(self, self.credential.as_ref(), now_ms)
    }

    /// Fields whose values differ between `self` and `other`
    pub fn diff(&self, other: &Configuration) -> Vec<ConfigField> {
        let mut changed = Vec::new();
        if self.enabled != other.enabled {
            changed.push(ConfigField::Enabled);
        }
        if self.filter_id != other.filter_id {
            changed.push(ConfigField::FilterId);
        }
        if self.credential != other.credential {
            changed.push(ConfigField::Credential);
        }
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigField {
    Enabled,
    FilterId,
    Credential,
}

/// One change notification: the fields that changed and the resulting snapshot
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub changed: Vec<ConfigField>,
    pub snapshot: Configuration,
}

impl ConfigChange {
    pub fn touches(&self, field: ConfigField) -> bool {
        self.changed.contains(&field)
    }

    /// True when only the filter identifier changed
    pub fn is_filter_only(&self) -> bool {
        self.changed == [ConfigField::FilterId]
    }
}

/// Read side of the configuration store
///
/// Readers take snapshots; they never write back.
pub trait ConfigStore: Send + Sync + 'static {
    fn snapshot(&self) -> Configuration;
    fn subscribe(&self) -> broadcast::Receiver<ConfigChange>;
}

/// In-memory store; the write side used by embedders and tests
pub struct InMemoryConfigStore {
    state: RwLock<Configuration>,
    changes: broadcast::Sender<ConfigChange>,
}

impl InMemoryConfigStore {
    pub fn new(initial: Configuration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        InMemoryConfigStore {
            state: RwLock::new(initial),
            changes,
        }
    }

    /// Apply a mutation; notifies subscribers if any field changed
    pub fn update<F>(&self, mutate: F) -> Vec<ConfigField>
    where
        F: FnOnce(&mut Configuration),
    {
        let mut state = self.state.write();
        let before = state.clone();
        mutate(&mut state);
        let changed = before.diff(&state);
        if !changed.is_empty() {
            // Sent under the write lock so notification order matches write order
            let _ = self.changes.send(ConfigChange {
                changed: changed.clone(),
                snapshot: state.clone(),
            });
        }
        changed
    }

    pub fn replace(&self, config: Configuration) -> Vec<ConfigField> {
        self.update(move |current| *current = config)
    }
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn snapshot(&self) -> Configuration {
        self.state.read().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permitted() -> Configuration {
        Configuration {
            enabled: true,
            filter_id: "RWD-1".to_string(),
            credential: Some(Credential::new("token")),
        }
    }

    #[test]
    fn test_default_is_disabled() {
        let config = Configuration::default();
        assert!(!config.enabled);
        assert_eq!(config.gate(0), Gate::Refused(GateFailure::Disabled));
    }

    #[test]
    fn test_gate_requires_all_three() {
        assert_eq!(permitted().gate(0), Gate::Permitted);

        let mut no_cred = permitted();
        no_cred.credential = None;
        assert_eq!(no_cred.gate(0), Gate::Refused(GateFailure::MissingCredential));

        let mut no_filter = permitted();
        no_filter.filter_id.clear();
        assert_eq!(no_filter.gate(0), Gate::Refused(GateFailure::MissingFilter));

        let mut expired = permitted();
        expired.credential = Some(Credential::new("token").with_expiry(10));
        assert_eq!(expired.gate(20), Gate::Refused(GateFailure::MissingCredential));
    }

    #[test]
    fn test_update_reports_changed_fields() {
        let store = InMemoryConfigStore::default();
        let mut rx = store.subscribe();

        let changed = store.update(|c| {
            c.enabled = true;
            c.filter_id = "RWD-1".to_string();
        });
        assert_eq!(changed, vec![ConfigField::Enabled, ConfigField::FilterId]);

        let change = rx.try_recv().unwrap();
        assert!(change.touches(ConfigField::Enabled));
        assert!(!change.is_filter_only());
        assert_eq!(change.snapshot.filter_id, "RWD-1");
    }

    #[test]
    fn test_noop_update_is_silent() {
        let store = InMemoryConfigStore::new(permitted());
        let mut rx = store.subscribe();
        assert!(store.replace(permitted()).is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_filter_only_change() {
        let store = InMemoryConfigStore::new(permitted());
        let mut rx = store.subscribe();
        store.update(|c| c.filter_id = "RWD-2".to_string());
        assert!(rx.try_recv().unwrap().is_filter_only());
    }

    #[test]
    fn test_toml_roundtrip_accepts_camel_case_alias() {
        let parsed: Configuration = toml::from_str("enabled = true\nfilterId = \"X\"\n").unwrap();
        assert!(parsed.enabled);
        assert_eq!(parsed.filter_id, "X");
        assert!(parsed.credential.is_none());
    }
}
