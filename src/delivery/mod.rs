//! Delivery fan-out
//!
//! A matched event is offered to every target the registry reports at that
//! moment. Targets are never cached between events; membership may change at
//! any time. Each target answers independently and a failure stays local to
//! that target.
//!
//! ## Wire form
//!
//! ```text
//! request:  {"type": "deliver", "payload": <MatchedEvent>}
//! response: {"success": true}
//! ```

#[cfg(feature = "http")]
pub mod http;
pub mod local;
pub mod router;
pub mod simulated;

#[cfg(feature = "http")]
pub use http::{HttpTarget, HttpTargetRegistry};
pub use local::{ChannelTarget, Delivery, LocalRegistry};
pub use router::DeliveryRouter;
pub use simulated::{SimulatedTarget, TargetBehaviour};

use crate::event::MatchedEvent;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        TargetId(id.into())
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeliverRequest {
    Deliver { payload: MatchedEvent },
}

impl DeliverRequest {
    pub fn new(payload: MatchedEvent) -> Self {
        DeliverRequest::Deliver { payload }
    }

    pub fn payload(&self) -> &MatchedEvent {
        match self {
            DeliverRequest::Deliver { payload } => payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAck {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
    #[error("target is gone")]
    TargetGone,
    #[error("target declined the event")]
    Rejected,
    #[error("target error: {0}")]
    Transport(String),
    #[error("target discovery failed: {0}")]
    Registry(String),
}

pub type DeliveryFuture = Pin<Box<dyn Future<Output = Result<DeliveryAck, DeliveryError>> + Send>>;

pub type DiscoverFuture =
    Pin<Box<dyn Future<Output = Result<Vec<Arc<dyn DeliveryTarget>>, DeliveryError>> + Send>>;

/// An addressable local consumer
pub trait DeliveryTarget: Send + Sync + 'static {
    fn id(&self) -> &TargetId;

    fn deliver(&self, request: DeliverRequest) -> DeliveryFuture;

    /// Whether the registry should still offer this target
    fn is_available(&self) -> bool {
        true
    }
}

/// Live view of the targets currently able to receive events
pub trait TargetRegistry: Send + Sync + 'static {
    fn discover(&self) -> DiscoverFuture;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub target: TargetId,
    pub error: Option<DeliveryError>,
}

impl TargetOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of fanning out one matched event
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub event: MatchedEvent,
    pub outcomes: Vec<TargetOutcome>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn outcome_for(&self, target: &TargetId) -> Option<&TargetOutcome> {
        self.outcomes.iter().find(|o| &o.target == target)
    }
}
