//! Simulated upstream with scripted outcomes and fault injection
//!
//! Each `connect` consumes the next `ConnectScript` (default: accept). With an
//! RNG attached, buggify may additionally fail connects, reject credentials,
//! garble frames or sever the stream. Tests push frames into the live
//! connection with `emit` and break it with `sever`.

use super::{ConnectFuture, FrameStream, SseFrame, Transport, TransportError};
use crate::buggify::faults::transport as faults;
use crate::credential::Credential;
use crate::io::simulation::SimulatedRng;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

type FrameSender = mpsc::UnboundedSender<Result<SseFrame, TransportError>>;

/// Outcome of one connect attempt
#[derive(Debug, Clone)]
pub enum ConnectScript {
    Accept,
    Fail(TransportError),
    /// Never resolves; the attempt stays in flight until cancelled
    Hang,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedTransportStats {
    pub connect_attempts: u64,
    pub connects_accepted: u64,
    pub connects_failed: u64,
    pub frames_emitted: u64,
    pub frames_garbled: u64,
    pub severed: u64,
}

struct SimulatedState {
    scripts: VecDeque<ConnectScript>,
    rng: Option<SimulatedRng>,
    live: Option<FrameSender>,
    last_token: Option<String>,
    stats: SimulatedTransportStats,
}

#[derive(Clone)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedTransport {
    /// Accepts every connect unless scripted otherwise
    pub fn new() -> Self {
        SimulatedTransport {
            state: Arc::new(Mutex::new(SimulatedState {
                scripts: VecDeque::new(),
                rng: None,
                live: None,
                last_token: None,
                stats: SimulatedTransportStats::default(),
            })),
        }
    }

    /// Also consult buggify (with this RNG) on every connect and emit
    pub fn with_faults(rng: SimulatedRng) -> Self {
        let transport = Self::new();
        transport.state.lock().rng = Some(rng);
        transport
    }

    pub fn script(&self, outcome: ConnectScript) {
        self.state.lock().scripts.push_back(outcome);
    }

    /// Fail the next `count` connects with `error`
    pub fn fail_next(&self, count: usize, error: TransportError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.scripts.push_back(ConnectScript::Fail(error.clone()));
        }
    }

    /// Push a frame to the live connection. Returns false if none is open
    /// (or an injected fault severed it instead).
    pub fn emit(&self, frame: SseFrame) -> bool {
        let mut state = self.state.lock();
        let state = &mut *state;
        let Some(tx) = state.live.as_ref().filter(|tx| !tx.is_closed()) else {
            return false;
        };

        let mut frame = frame;
        if let Some(rng) = state.rng.as_mut() {
            if crate::buggify!(rng, faults::STREAM_DROP) {
                let _ = tx.send(Err(TransportError::Stream("injected stream drop".to_string())));
                state.live = None;
                state.stats.severed += 1;
                return false;
            }
            if crate::buggify!(rng, faults::MALFORMED_FRAME) {
                frame.data = "{\"garbled".to_string();
                state.stats.frames_garbled += 1;
            }
        }

        let sent = tx.send(Ok(frame)).is_ok();
        if sent {
            state.stats.frames_emitted += 1;
        }
        sent
    }

    /// Break the live connection with `error`
    pub fn sever(&self, error: TransportError) -> bool {
        let mut state = self.state.lock();
        match state.live.take() {
            Some(tx) => {
                let delivered = tx.send(Err(error)).is_ok();
                state.stats.severed += 1;
                delivered
            }
            None => false,
        }
    }

    /// End the live stream as if the upstream closed it
    pub fn close(&self) -> bool {
        self.state.lock().live.take().is_some()
    }

    /// True while a connection is open and its reader still holds it
    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .live
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn last_token(&self) -> Option<String> {
        self.state.lock().last_token.clone()
    }

    pub fn stats(&self) -> SimulatedTransportStats {
        self.state.lock().stats.clone()
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedTransport {
    fn connect(&self, credential: &Credential) -> ConnectFuture {
        let mut state = self.state.lock();
        state.stats.connect_attempts += 1;
        state.last_token = Some(credential.token.clone());

        let mut outcome = state.scripts.pop_front().unwrap_or(ConnectScript::Accept);
        if matches!(outcome, ConnectScript::Accept) {
            if let Some(rng) = state.rng.as_mut() {
                if crate::buggify!(rng, faults::CONNECT_FAIL) {
                    outcome = ConnectScript::Fail(TransportError::Connect(
                        "injected connect failure".to_string(),
                    ));
                } else if crate::buggify!(rng, faults::AUTH_REJECT) {
                    outcome = ConnectScript::Fail(TransportError::AuthRejected { status: 401 });
                }
            }
        }

        match outcome {
            ConnectScript::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                state.live = Some(tx);
                state.stats.connects_accepted += 1;
                let frames: FrameStream = Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                }));
                Box::pin(async move { Ok(frames) })
            }
            ConnectScript::Fail(error) => {
                state.stats.connects_failed += 1;
                Box::pin(async move { Err(error) })
            }
            ConnectScript::Hang => Box::pin(futures::future::pending()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scripted_failures_then_accept() {
        let transport = SimulatedTransport::new();
        transport.fail_next(2, TransportError::Closed);
        let credential = Credential::new("t");

        assert!(transport.connect(&credential).await.is_err());
        assert!(transport.connect(&credential).await.is_err());
        assert!(transport.connect(&credential).await.is_ok());

        let stats = transport.stats();
        assert_eq!(stats.connect_attempts, 3);
        assert_eq!(stats.connects_failed, 2);
        assert_eq!(stats.connects_accepted, 1);
        assert_eq!(transport.last_token().as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn test_emit_and_sever() {
        let transport = SimulatedTransport::new();
        assert!(!transport.emit(SseFrame::named("x", "{}")));

        let mut frames = transport.connect(&Credential::new("t")).await.unwrap();
        assert!(transport.is_connected());
        assert!(transport.emit(SseFrame::named("x", "{}")));
        assert_eq!(frames.next().await.unwrap().unwrap().data, "{}");

        assert!(transport.sever(TransportError::Stream("boom".into())));
        assert!(frames.next().await.unwrap().is_err());
        assert!(frames.next().await.is_none());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_dropping_reader_releases_connection() {
        let transport = SimulatedTransport::new();
        let frames = transport.connect(&Credential::new("t")).await.unwrap();
        assert!(transport.is_connected());
        drop(frames);
        assert!(!transport.is_connected());
    }
}
