//! Connector actor
//!
//! Owns the [`ConnectorMachine`] and is the only place connection state
//! changes. Commands from the control surface and notifications from the read
//! loop and reconnect timer all arrive on one channel and are applied one at a
//! time, so a `Stop` and a firing reconnect timer can never interleave.
//!
//! ```text
//! ControlSurface ──Start/Stop──┐
//! read loop ──Opened/Frame/Failed──┤──► ConnectorActor ──► machine ──► effects
//! reconnect timer ──ReconnectDue───┘            │
//!                                               ├──► watch<StatusSnapshot>
//!                                               └──► spawn fan-out (DeliveryRouter)
//! ```
//!
//! The read loop and the timer are separate tasks. Closing the transport
//! aborts the read loop and waits for it to finish before the actor moves on,
//! so the upstream connection is released by the time `Stop` replies.
//!
//! Internal tasks only hold weak senders: once every handle is dropped the
//! actor loop ends and releases the transport.

use super::handle::{CommandOutcome, Transition};
use super::machine::{ConnectorMachine, Effect, Generation, Input, TimerId};
use crate::config::{ConfigStore, Gate};
use crate::credential::{Credential, CredentialProvider};
use crate::delivery::{DeliveryReport, DeliveryRouter};
use crate::event::InboundEvent;
use crate::filter::EventFilter;
use crate::io::wall_clock_ms;
use crate::status::StatusSnapshot;
use crate::transport::{SseFrame, Transport, TransportError};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Messages for the connector actor
pub(crate) enum ConnectorMessage {
    Start {
        response_tx: oneshot::Sender<CommandOutcome>,
    },
    Stop {
        response_tx: oneshot::Sender<CommandOutcome>,
    },
    TransportOpened {
        generation: Generation,
    },
    TransportFrame {
        generation: Generation,
        frame: SseFrame,
    },
    TransportFailed {
        generation: Generation,
        error: TransportError,
    },
    ReconnectDue {
        timer: TimerId,
    },
    /// Stop and exit the actor loop
    Shutdown {
        response_tx: oneshot::Sender<()>,
    },
}

/// Collaborators the actor talks to
pub struct ConnectorParts {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub store: Arc<dyn ConfigStore>,
    pub filter: EventFilter,
    pub router: DeliveryRouter,
}

pub(crate) struct ConnectorActor {
    machine: ConnectorMachine,
    parts: ConnectorParts,
    connect_timeout: Duration,
    rx: mpsc::UnboundedReceiver<ConnectorMessage>,
    /// Handed to the read loop and timer tasks
    tx: mpsc::WeakUnboundedSender<ConnectorMessage>,
    read_loop: Option<JoinHandle<()>>,
    reconnect_timer: Option<(TimerId, JoinHandle<()>)>,
    last_error: Option<String>,
    status_tx: watch::Sender<StatusSnapshot>,
    transitions_tx: broadcast::Sender<Transition>,
    deliveries_tx: broadcast::Sender<DeliveryReport>,
}

impl ConnectorActor {
    pub(crate) fn new(
        machine: ConnectorMachine,
        parts: ConnectorParts,
        connect_timeout: Duration,
        tx: mpsc::WeakUnboundedSender<ConnectorMessage>,
        rx: mpsc::UnboundedReceiver<ConnectorMessage>,
        status_tx: watch::Sender<StatusSnapshot>,
        transitions_tx: broadcast::Sender<Transition>,
        deliveries_tx: broadcast::Sender<DeliveryReport>,
    ) -> Self {
        ConnectorActor {
            machine,
            parts,
            connect_timeout,
            rx,
            tx,
            read_loop: None,
            reconnect_timer: None,
            last_error: None,
            status_tx,
            transitions_tx,
            deliveries_tx,
        }
    }

    /// Run the actor loop until shutdown
    pub(crate) async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            match msg {
                ConnectorMessage::Start { response_tx } => {
                    let outcome = self.handle_start().await;
                    let _ = response_tx.send(outcome);
                }
                ConnectorMessage::Stop { response_tx } => {
                    let outcome = self.handle_stop().await;
                    let _ = response_tx.send(outcome);
                }
                ConnectorMessage::TransportOpened { generation } => {
                    if generation == self.machine.generation() {
                        self.last_error = None;
                    }
                    self.apply(Input::TransportOpened { generation }, None).await;
                }
                ConnectorMessage::TransportFrame { generation, frame } => {
                    self.handle_frame(generation, frame);
                }
                ConnectorMessage::TransportFailed { generation, error } => {
                    self.handle_failure(generation, error).await;
                }
                ConnectorMessage::ReconnectDue { timer } => {
                    let (gate, credential) = self.evaluate_gate();
                    self.apply(Input::ReconnectDue { timer, gate }, credential).await;
                }
                ConnectorMessage::Shutdown { response_tx } => {
                    self.apply(Input::Stop, None).await;
                    info!("Connector actor shutting down");
                    let _ = response_tx.send(());
                    break;
                }
            }
        }

        // Nothing may outlive the actor
        if self.machine.transport_live() {
            debug!("All connector handles dropped, closing upstream connection");
        }
        self.close_transport().await;
        if let Some((_, timer)) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    async fn handle_start(&mut self) -> CommandOutcome {
        let (gate, credential) = self.evaluate_gate();
        let effects = self.apply(Input::Start { gate }, credential).await;

        if let Some(reason) = effects.iter().find_map(|e| match e {
            Effect::Refused(reason) => Some(*reason),
            _ => None,
        }) {
            return CommandOutcome::Refused(reason);
        }
        if effects
            .iter()
            .any(|e| matches!(e, Effect::OpenTransport { .. }))
        {
            CommandOutcome::Started
        } else {
            CommandOutcome::AlreadyActive
        }
    }

    async fn handle_stop(&mut self) -> CommandOutcome {
        let effects = self.apply(Input::Stop, None).await;
        if effects.is_empty() {
            CommandOutcome::AlreadyStopped
        } else {
            CommandOutcome::Stopped
        }
    }

    async fn handle_failure(&mut self, generation: Generation, error: TransportError) {
        if generation != self.machine.generation() || !self.machine.transport_live() {
            debug!(%generation, %error, "Ignoring failure from a superseded connection");
            return;
        }
        warn!(
            %generation,
            %error,
            attempts = self.machine.attempts() + 1,
            max = self.machine.max_attempts(),
            "Upstream connection failed"
        );
        self.last_error = Some(error.to_string());
        self.apply(Input::TransportFailed { generation }, None).await;
    }

    fn handle_frame(&mut self, generation: Generation, frame: SseFrame) {
        if !self.machine.accepts_events(generation) {
            debug!(%generation, "Dropping frame from a connection that is no longer open");
            return;
        }

        let event = match InboundEvent::from_frame(&frame, wall_clock_ms()) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, event = ?frame.event, "Discarding malformed event");
                return;
            }
        };

        let filter_id = self.parts.store.snapshot().filter_id;
        let Some(matched) = self.parts.filter.select(event, &filter_id) else {
            debug!(kind = ?frame.event, "Event did not match filter");
            return;
        };

        debug!(identifier = %matched.identifier, "Event matched, fanning out");
        let router = self.parts.router.clone();
        let reports = self.deliveries_tx.clone();
        tokio::spawn(async move {
            let report = router.dispatch(matched).await;
            let _ = reports.send(report);
        });
    }

    /// Gate as of now, plus the credential it was evaluated with
    fn evaluate_gate(&self) -> (Gate, Option<Credential>) {
        let config = self.parts.store.snapshot();
        let credential = self.parts.credentials.current();
        let gate = Gate::evaluate(&config, credential.as_ref(), wall_clock_ms());
        (gate, credential)
    }

    /// Feed one input to the machine and carry out its effects
    async fn apply(&mut self, input: Input, credential: Option<Credential>) -> Vec<Effect> {
        let effects = self.machine.apply(input);
        for effect in &effects {
            match effect {
                Effect::StateChanged { from, to } => {
                    info!(
                        %from,
                        %to,
                        attempts = self.machine.attempts(),
                        "Connector state changed"
                    );
                    let _ = self.transitions_tx.send(Transition {
                        from: *from,
                        to: *to,
                    });
                }
                Effect::OpenTransport { generation } => {
                    self.open_transport(*generation, credential.clone()).await;
                }
                Effect::CloseTransport => self.close_transport().await,
                Effect::ScheduleReconnect { timer, delay } => {
                    self.schedule_reconnect(*timer, *delay);
                }
                Effect::CancelReconnect { timer } => self.cancel_reconnect(*timer),
                Effect::Refused(reason) => {
                    info!(%reason, state = %self.machine.state(), "Connection not permitted");
                }
            }
        }
        self.publish_status();
        effects
    }

    async fn open_transport(&mut self, generation: Generation, credential: Option<Credential>) {
        // A failed read loop may still be winding down
        self.close_transport().await;

        let Some(credential) = credential else {
            error!(%generation, "Connection attempt without a credential");
            notify(
                &self.tx,
                ConnectorMessage::TransportFailed {
                    generation,
                    error: TransportError::Connect("no credential available".to_string()),
                },
            );
            return;
        };

        debug!(%generation, "Opening upstream connection");
        self.read_loop = Some(tokio::spawn(read_loop(
            self.parts.transport.clone(),
            credential,
            generation,
            self.connect_timeout,
            self.tx.clone(),
        )));
    }

    async fn close_transport(&mut self) {
        if let Some(handle) = self.read_loop.take() {
            handle.abort();
            // Cancelled or finished; either way the stream is dropped
            let _ = handle.await;
        }
    }

    fn schedule_reconnect(&mut self, timer: TimerId, delay: Duration) {
        if let Some((_, stale)) = self.reconnect_timer.take() {
            stale.abort();
        }
        info!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            notify(&tx, ConnectorMessage::ReconnectDue { timer });
        });
        self.reconnect_timer = Some((timer, task));
    }

    fn cancel_reconnect(&mut self, timer: TimerId) {
        if let Some((id, task)) = self.reconnect_timer.take() {
            debug_assert_eq!(id, timer);
            task.abort();
            debug!("Pending reconnect cancelled");
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(StatusSnapshot {
            state: self.machine.state(),
            retry_attempts: self.machine.attempts(),
            max_attempts: self.machine.max_attempts(),
            last_error: self.last_error.clone(),
        });
    }
}

/// Deliver to the actor if it is still running
fn notify(tx: &mpsc::WeakUnboundedSender<ConnectorMessage>, msg: ConnectorMessage) -> bool {
    match tx.upgrade() {
        Some(tx) => tx.send(msg).is_ok(),
        None => false,
    }
}

/// Connect, forward frames, and report how the connection ended.
///
/// Never mutates connector state. When aborted, the frame stream is dropped
/// and nothing is reported.
async fn read_loop(
    transport: Arc<dyn Transport>,
    credential: Credential,
    generation: Generation,
    connect_timeout: Duration,
    tx: mpsc::WeakUnboundedSender<ConnectorMessage>,
) {
    let connected = tokio::time::timeout(connect_timeout, transport.connect(&credential)).await;
    let mut frames = match connected {
        Ok(Ok(frames)) => frames,
        Ok(Err(error)) => {
            notify(&tx, ConnectorMessage::TransportFailed { generation, error });
            return;
        }
        Err(_) => {
            notify(
                &tx,
                ConnectorMessage::TransportFailed {
                    generation,
                    error: TransportError::ConnectTimeout(connect_timeout),
                },
            );
            return;
        }
    };

    if !notify(&tx, ConnectorMessage::TransportOpened { generation }) {
        return;
    }

    let error = loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                if !notify(&tx, ConnectorMessage::TransportFrame { generation, frame }) {
                    return;
                }
            }
            Some(Err(error)) => break error,
            None => break TransportError::Closed,
        }
    };
    notify(&tx, ConnectorMessage::TransportFailed { generation, error });
}
