//! TOML-file backed configuration store
//!
//! External tools (a settings UI, an OAuth helper) edit the file; a watcher
//! task polls it and publishes field-level changes through the same feed as
//! `InMemoryConfigStore`. A file that fails to parse is ignored until fixed,
//! so a half-written edit never flips the relay off.

use super::store::{ConfigChange, ConfigField, ConfigStore, Configuration, InMemoryConfigStore};
use super::ConfigError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct FileConfigStore {
    path: PathBuf,
    inner: InMemoryConfigStore,
}

impl FileConfigStore {
    /// Open the store, creating the file with defaults on first launch
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let initial = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            parse(&path, &text)?
        } else {
            let defaults = Configuration::default();
            write_defaults(&path, &defaults)?;
            info!("Created configuration file {} with defaults", path.display());
            defaults
        };

        Ok(FileConfigStore {
            path,
            inner: InMemoryConfigStore::new(initial),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and publish any changed fields
    pub async fn reload(&self) -> Result<Vec<ConfigField>, ConfigError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;
        let config = parse(&self.path, &text)?;
        Ok(self.inner.replace(config))
    }

    /// Poll the file until `shutdown` is cancelled
    pub fn spawn_watcher(
        self: Arc<Self>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.reload().await {
                            Ok(changed) if !changed.is_empty() => {
                                info!(?changed, "Configuration file changed");
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Keeping previous configuration: {}", e),
                        }
                    }
                }
            }
            debug!("Configuration watcher stopped");
        })
    }
}

impl ConfigStore for FileConfigStore {
    fn snapshot(&self) -> Configuration {
        self.inner.snapshot()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.inner.subscribe()
    }
}

fn parse(path: &Path, text: &str) -> Result<Configuration, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn write_defaults(path: &Path, config: &Configuration) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, text).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
