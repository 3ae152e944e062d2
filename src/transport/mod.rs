//! Upstream transport
//!
//! The connector only sees the `Transport` trait: connect with a credential,
//! get back a stream of SSE frames. A stream that ends or yields an error is a
//! transport failure; the relay's own teardown drops the stream instead and
//! never reports one.
//!
//! ## Implementations
//!
//! - `HttpTransport`: production, server-sent events over reqwest
//! - `SimulatedTransport`: scripted outcomes plus buggify faults for tests/DST

#[cfg(feature = "http")]
pub mod http;
pub mod simulated;
pub mod sse;

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use simulated::{ConnectScript, SimulatedTransport, SimulatedTransportStats};
pub use sse::{frame_stream, LineTooLong, SseDecoder, SseFrame, MAX_LINE_BYTES};

use crate::credential::Credential;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("credential rejected by upstream (HTTP {status})")]
    AuthRejected { status: u16 },
    #[error("unexpected upstream status {0}")]
    Status(u16),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("stream closed by upstream")]
    Closed,
}

impl TransportError {
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, TransportError::AuthRejected { .. })
    }
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, TransportError>> + Send>>;

pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<FrameStream, TransportError>> + Send>>;

pub trait Transport: Send + Sync + 'static {
    /// Open the upstream stream authenticated with `credential`
    fn connect(&self, credential: &Credential) -> ConnectFuture;
}
