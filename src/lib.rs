pub mod io;
pub mod buggify;
pub mod config;
pub mod credential;
pub mod event;
pub mod filter;
pub mod transport;
pub mod connector;
pub mod delivery;
pub mod status;
pub mod control;
pub mod relay;
pub mod dst;

#[cfg(test)]
mod stateright;

pub use config::{Configuration, ConfigStore, FileConfigStore, InMemoryConfigStore, RelaySettings};
pub use connector::{CommandOutcome, ConnectionState, ConnectorHandle};
pub use control::{ControlCommand, ControlServer, ControlSurface};
pub use relay::{spawn_relay, RelayComponents, RelayHandle, RelayOptions};
pub use status::{QueryStatusResponse, StatusReporter, StatusSnapshot};
