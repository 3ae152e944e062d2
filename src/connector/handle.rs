//! Connector handle - public interface to the connector actor

use super::actor::{ConnectorActor, ConnectorMessage, ConnectorParts};
use super::machine::ConnectorMachine;
use super::state::{ConnectionState, RetryPolicy};
use super::ConnectorError;
use crate::config::{GateFailure, RelaySettings};
use crate::delivery::DeliveryReport;
use crate::status::{StatusReporter, StatusSnapshot};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const OBSERVER_CAPACITY: usize = 256;

/// Result of a `Start` or `Stop` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum CommandOutcome {
    /// A new connection attempt began
    Started,
    /// Already connecting or connected
    AlreadyActive,
    /// Gate refused; state unchanged
    Refused(GateFailure),
    Stopped,
    AlreadyStopped,
}

impl CommandOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            CommandOutcome::Started => "started",
            CommandOutcome::AlreadyActive => "already_active",
            CommandOutcome::Refused(_) => "refused",
            CommandOutcome::Stopped => "stopped",
            CommandOutcome::AlreadyStopped => "already_stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorOptions {
    pub max_attempts: u32,
    pub retry_policy: RetryPolicy,
    pub connect_timeout: Duration,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        ConnectorOptions {
            max_attempts: 10,
            retry_policy: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectorOptions {
    pub fn from_settings(settings: &RelaySettings) -> Self {
        ConnectorOptions {
            max_attempts: settings.retry.max_attempts,
            retry_policy: settings.retry.retry_policy(),
            connect_timeout: settings.upstream.connect_timeout,
        }
    }
}

/// Cloneable front end for the connector actor
#[derive(Clone)]
pub struct ConnectorHandle {
    tx: mpsc::UnboundedSender<ConnectorMessage>,
    status: StatusReporter,
    transitions: broadcast::Sender<Transition>,
    deliveries: broadcast::Sender<DeliveryReport>,
}

impl ConnectorHandle {
    /// Begin connecting if the gate permits. Idempotent.
    pub async fn start(&self) -> Result<CommandOutcome, ConnectorError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ConnectorMessage::Start { response_tx })
            .map_err(|_| ConnectorError::Unavailable)?;
        response_rx.await.map_err(|_| ConnectorError::Unavailable)
    }

    /// Close the connection and cancel any pending reconnect. Returns once the
    /// transport is released. Idempotent.
    pub async fn stop(&self) -> Result<CommandOutcome, ConnectorError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ConnectorMessage::Stop { response_tx })
            .map_err(|_| ConnectorError::Unavailable)?;
        response_rx.await.map_err(|_| ConnectorError::Unavailable)
    }

    pub fn status(&self) -> StatusReporter {
        self.status.clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    pub fn subscribe_deliveries(&self) -> broadcast::Receiver<DeliveryReport> {
        self.deliveries.subscribe()
    }

    /// Stop and end the actor. Safe to call more than once.
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .tx
            .send(ConnectorMessage::Shutdown { response_tx })
            .is_ok()
        {
            let _ = response_rx.await;
        }
    }
}

/// Spawn a connector actor and return its handle + join handle
pub fn spawn_connector(
    parts: ConnectorParts,
    options: ConnectorOptions,
) -> (ConnectorHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(StatusSnapshot::idle(options.max_attempts));
    let (transitions_tx, _) = broadcast::channel(OBSERVER_CAPACITY);
    let (deliveries_tx, _) = broadcast::channel(OBSERVER_CAPACITY);

    let machine = ConnectorMachine::new(options.max_attempts, options.retry_policy);
    let actor = ConnectorActor::new(
        machine,
        parts,
        options.connect_timeout,
        tx.downgrade(),
        rx,
        status_tx,
        transitions_tx.clone(),
        deliveries_tx.clone(),
    );
    let task = tokio::spawn(actor.run());

    let handle = ConnectorHandle {
        tx,
        status: StatusReporter::new(status_rx),
        transitions: transitions_tx,
        deliveries: deliveries_tx,
    };
    (handle, task)
}
