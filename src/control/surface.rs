//! Command execution and configuration-change reactions

use super::ControlError;
use crate::config::{ConfigChange, ConfigField, ConfigStore, Gate};
use crate::connector::{CommandOutcome, ConnectorHandle};
use crate::credential::CredentialProvider;
use crate::io::wall_clock_ms;
use crate::status::QueryStatusResponse;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    QueryStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResponse {
    Command {
        outcome: CommandOutcome,
        status: QueryStatusResponse,
    },
    Status(QueryStatusResponse),
}

pub struct ControlSurface {
    connector: ConnectorHandle,
    store: Arc<dyn ConfigStore>,
    credentials: Arc<dyn CredentialProvider>,
}

impl ControlSurface {
    pub fn new(
        connector: ConnectorHandle,
        store: Arc<dyn ConfigStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        ControlSurface {
            connector,
            store,
            credentials,
        }
    }

    pub fn connector(&self) -> &ConnectorHandle {
        &self.connector
    }

    pub async fn execute(&self, command: ControlCommand) -> Result<ControlResponse, ControlError> {
        let outcome = match command {
            ControlCommand::Start => self.start().await?,
            ControlCommand::Stop => self.stop().await?,
            ControlCommand::QueryStatus => return Ok(ControlResponse::Status(self.query_status())),
        };
        Ok(ControlResponse::Command {
            outcome,
            status: self.query_status(),
        })
    }

    pub async fn start(&self) -> Result<CommandOutcome, ControlError> {
        Ok(self.connector.start().await?)
    }

    pub async fn stop(&self) -> Result<CommandOutcome, ControlError> {
        Ok(self.connector.stop().await?)
    }

    /// Latest published status; never waits
    pub fn query_status(&self) -> QueryStatusResponse {
        self.connector.status().query()
    }

    fn gate(&self) -> Gate {
        let config = self.store.snapshot();
        let credential = self.credentials.current();
        Gate::evaluate(&config, credential.as_ref(), wall_clock_ms())
    }

    /// Start-of-process evaluation, then follow the configuration change feed
    /// until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        // Subscribe before the initial evaluation so no change slips between
        let mut changes = self.store.subscribe();
        tokio::spawn(async move {
            let mut permitted = self.gate().is_permitted();
            match self.start().await {
                Ok(outcome) => info!(outcome = outcome.name(), "Initial start evaluated"),
                Err(e) => {
                    warn!(error = %e, "Connector unavailable at startup");
                    return;
                }
            }

            loop {
                let change = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = changes.recv() => received,
                };
                let change = match change {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Configuration feed lagged, re-evaluating everything");
                        ConfigChange {
                            changed: vec![
                                ConfigField::Enabled,
                                ConfigField::FilterId,
                                ConfigField::Credential,
                            ],
                            snapshot: self.store.snapshot(),
                        }
                    }
                    Err(RecvError::Closed) => break,
                };

                if let Err(e) = self.react(&change, &mut permitted).await {
                    warn!(error = %e, "Connector unavailable, configuration watcher exiting");
                    break;
                }
            }
            debug!("Configuration watcher stopped");
        })
    }

    /// Translate one configuration change into connector commands.
    ///
    /// `enabled` or credential changes re-issue `Start`/`Stop` from the fresh
    /// gate; a new credential also replaces a live connection. A filter-only
    /// change acts only if it flips the gate.
    async fn react(&self, change: &ConfigChange, permitted: &mut bool) -> Result<(), ControlError> {
        let gate = self.gate();
        let was_permitted = std::mem::replace(permitted, gate.is_permitted());

        let act = change.touches(ConfigField::Enabled)
            || change.touches(ConfigField::Credential)
            || (change.touches(ConfigField::FilterId) && was_permitted != gate.is_permitted());
        if !act {
            debug!(changed = ?change.changed, "Configuration change needs no command");
            return Ok(());
        }

        let outcome = match gate {
            Gate::Permitted => {
                if change.touches(ConfigField::Credential) && was_permitted {
                    // The live connection was authenticated with the old credential
                    self.stop().await?;
                }
                self.start().await?
            }
            Gate::Refused(reason) => {
                debug!(%reason, "Gate closed by configuration change");
                self.stop().await?
            }
        };
        info!(
            changed = ?change.changed,
            outcome = outcome.name(),
            "Applied configuration change"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, InMemoryConfigStore};
    use crate::connector::ConnectionState;
    use crate::credential::{Credential, StoreCredentialProvider};
    use crate::delivery::LocalRegistry;
    use crate::relay::{spawn_relay, RelayComponents, RelayHandle, RelayOptions};
    use crate::transport::SimulatedTransport;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryConfigStore>,
        transport: SimulatedTransport,
        relay: RelayHandle,
    }

    fn fixture(initial: Configuration) -> Fixture {
        let store = Arc::new(InMemoryConfigStore::new(initial));
        let transport = SimulatedTransport::new();
        let relay = spawn_relay(
            RelayComponents {
                transport: Arc::new(transport.clone()),
                credentials: Arc::new(StoreCredentialProvider::new(store.clone())),
                store: store.clone(),
                registry: Arc::new(LocalRegistry::new()),
            },
            RelayOptions::default(),
        );
        Fixture {
            store,
            transport,
            relay,
        }
    }

    fn permitted() -> Configuration {
        Configuration {
            enabled: true,
            filter_id: "RWD-1".to_string(),
            credential: Some(Credential::new("token")),
        }
    }

    async fn wait_for_state(relay: &RelayHandle, state: ConnectionState) {
        tokio::time::timeout(
            Duration::from_secs(30),
            relay.status().wait_for(|s| s.state == state),
        )
        .await
        .expect("state reached")
        .expect("connector alive");
    }

    /// Let every spawned task run to quiescence
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_start_when_permitted() {
        let f = fixture(permitted());
        wait_for_state(&f.relay, ConnectionState::Open).await;
        assert!(f.transport.is_connected());
        f.relay.shutdown().await;
        assert!(!f.transport.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_start_refused_when_disabled() {
        let f = fixture(Configuration::default());
        settle().await;
        assert_eq!(f.relay.status().snapshot().state, ConnectionState::Idle);
        assert_eq!(f.transport.stats().connect_attempts, 0);
        f.relay.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_and_disable_follow_config() {
        let mut config = permitted();
        config.enabled = false;
        let f = fixture(config);
        settle().await;

        f.store.update(|c| c.enabled = true);
        wait_for_state(&f.relay, ConnectionState::Open).await;

        f.store.update(|c| c.enabled = false);
        wait_for_state(&f.relay, ConnectionState::Idle).await;
        assert!(!f.transport.is_connected());
        f.relay.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_change_keeps_connection() {
        let f = fixture(permitted());
        wait_for_state(&f.relay, ConnectionState::Open).await;
        let mut transitions = f.relay.connector().subscribe_transitions();

        f.store.update(|c| c.filter_id = "RWD-2".to_string());
        settle().await;

        assert!(transitions.try_recv().is_err());
        assert_eq!(f.transport.stats().connect_attempts, 1);
        assert_eq!(f.relay.status().snapshot().state, ConnectionState::Open);
        f.relay.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_emptied_filter_stops_and_refilled_filter_starts() {
        let f = fixture(permitted());
        wait_for_state(&f.relay, ConnectionState::Open).await;

        f.store.update(|c| c.filter_id.clear());
        wait_for_state(&f.relay, ConnectionState::Idle).await;

        f.store.update(|c| c.filter_id = "RWD-9".to_string());
        wait_for_state(&f.relay, ConnectionState::Open).await;
        assert_eq!(f.transport.stats().connect_attempts, 2);
        f.relay.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_removed_stops() {
        let f = fixture(permitted());
        wait_for_state(&f.relay, ConnectionState::Open).await;

        f.store.update(|c| c.credential = None);
        wait_for_state(&f.relay, ConnectionState::Idle).await;

        let response = f.relay.surface().execute(ControlCommand::Start).await.unwrap();
        assert_eq!(
            response,
            ControlResponse::Command {
                outcome: CommandOutcome::Refused(crate::config::GateFailure::MissingCredential),
                status: QueryStatusResponse {
                    connected: false,
                    retry_attempts: 0
                },
            }
        );
        f.relay.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_rotation_reconnects() {
        let f = fixture(permitted());
        wait_for_state(&f.relay, ConnectionState::Open).await;
        assert_eq!(f.transport.last_token().as_deref(), Some("token"));

        f.store
            .update(|c| c.credential = Some(Credential::new("rotated")));
        settle().await;

        assert_eq!(f.relay.status().snapshot().state, ConnectionState::Open);
        assert_eq!(f.transport.stats().connect_attempts, 2);
        assert_eq!(f.transport.last_token().as_deref(), Some("rotated"));
        f.relay.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_are_idempotent() {
        let f = fixture(Configuration::default());
        settle().await;
        let surface = f.relay.surface();

        assert_eq!(surface.stop().await.unwrap(), CommandOutcome::AlreadyStopped);
        f.store.replace(permitted());
        wait_for_state(&f.relay, ConnectionState::Open).await;

        assert_eq!(surface.start().await.unwrap(), CommandOutcome::AlreadyActive);
        assert_eq!(surface.stop().await.unwrap(), CommandOutcome::Stopped);
        assert_eq!(surface.stop().await.unwrap(), CommandOutcome::AlreadyStopped);
        assert_eq!(
            surface.execute(ControlCommand::QueryStatus).await.unwrap(),
            ControlResponse::Status(QueryStatusResponse {
                connected: false,
                retry_attempts: 0
            })
        );
        f.relay.shutdown().await;
    }
}
