//! StreamConnector
//!
//! Lifecycle of the single upstream event stream: gated start, stop, bounded
//! reconnection and forwarding of matched events to delivery.
//!
//! - `state`: connection states, retry budget and delay policy
//! - `machine`: pure transition logic
//! - `actor`: tokio task that owns the machine and performs its effects
//! - `handle`: cloneable front end used by the control surface

pub mod actor;
pub mod handle;
pub mod machine;
pub mod state;

pub use actor::ConnectorParts;
pub use handle::{spawn_connector, CommandOutcome, ConnectorHandle, ConnectorOptions, Transition};
pub use machine::{ConnectorMachine, Effect, Generation, Input, TimerId};
pub use state::{ConnectionState, RetryBudget, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    #[error("connector is not running")]
    Unavailable,
}
