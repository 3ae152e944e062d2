//! Relay assembly
//!
//! Wires the connector actor, delivery router and control surface together
//! and starts the configuration watcher.
//!
//! ```text
//! ConfigStore / CredentialProvider ──► ControlSurface ──► ConnectorActor
//!                                                           │
//!                                   EventFilter ◄───────────┘
//!                                        │
//!                                   DeliveryRouter ──► targets
//! ```

use crate::config::{ConfigStore, RelaySettings};
use crate::connector::{spawn_connector, ConnectorHandle, ConnectorOptions, ConnectorParts};
use crate::control::ControlSurface;
use crate::credential::CredentialProvider;
use crate::delivery::router::DEFAULT_DELIVERY_DEADLINE;
use crate::delivery::{DeliveryRouter, TargetRegistry};
use crate::filter::EventFilter;
use crate::status::StatusReporter;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// External collaborators of a relay
pub struct RelayComponents {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub store: Arc<dyn ConfigStore>,
    pub registry: Arc<dyn TargetRegistry>,
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub connector: ConnectorOptions,
    pub filter: EventFilter,
    pub delivery_deadline: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions {
            connector: ConnectorOptions::default(),
            filter: EventFilter::default(),
            delivery_deadline: DEFAULT_DELIVERY_DEADLINE,
        }
    }
}

impl RelayOptions {
    pub fn from_settings(settings: &RelaySettings) -> Self {
        RelayOptions {
            connector: ConnectorOptions::from_settings(settings),
            filter: EventFilter::from_settings(&settings.filter),
            delivery_deadline: settings.delivery.timeout,
        }
    }
}

pub struct RelayHandle {
    connector: ConnectorHandle,
    surface: Arc<ControlSurface>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    pub fn connector(&self) -> &ConnectorHandle {
        &self.connector
    }

    pub fn surface(&self) -> Arc<ControlSurface> {
        self.surface.clone()
    }

    pub fn status(&self) -> StatusReporter {
        self.connector.status()
    }

    /// Cancelled when the relay shuts down; share it with auxiliary tasks
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop the watcher, close the connection and wait for every task
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        self.connector.shutdown().await;
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
        info!("Relay stopped");
    }
}

impl Drop for RelayHandle {
    /// Dropping the relay without `shutdown` still ends the watcher; the
    /// connector actor follows once its last handle is gone.
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Spawn a relay. The initial `Start` is evaluated immediately.
pub fn spawn_relay(components: RelayComponents, options: RelayOptions) -> RelayHandle {
    let router = DeliveryRouter::new(components.registry, options.delivery_deadline);
    let parts = ConnectorParts {
        transport: components.transport,
        credentials: components.credentials.clone(),
        store: components.store.clone(),
        filter: options.filter,
        router,
    };
    let (connector, connector_task) = spawn_connector(parts, options.connector);

    let surface = Arc::new(ControlSurface::new(
        connector.clone(),
        components.store,
        components.credentials,
    ));
    let shutdown = CancellationToken::new();
    let watcher_task = surface.clone().spawn(shutdown.clone());

    RelayHandle {
        connector,
        surface,
        shutdown,
        tasks: vec![watcher_task, connector_task],
    }
}
