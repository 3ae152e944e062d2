//! ControlSurface
//!
//! The only entry point that issues connector commands. It serves explicit
//! `Start`/`Stop`/`QueryStatus` requests and reacts to configuration changes.
//!
//! - `surface`: command execution and the config-change reaction task
//! - `protocol`: line-oriented text protocol used over TCP
//! - `server`: TCP listener for the protocol
//! - `client`: client side of the protocol (used by `relay-ctl`)

pub mod client;
pub mod protocol;
pub mod server;
pub mod surface;

pub use client::ControlClient;
pub use protocol::{parse_command, render_error, render_response};
pub use server::ControlServer;
pub use surface::{ControlCommand, ControlResponse, ControlSurface};

use crate::connector::ConnectorError;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
    #[error("control connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed control line: {0}")]
    Codec(String),
    #[error("connection closed before a response arrived")]
    NoResponse,
}

impl From<tokio_util::codec::LinesCodecError> for ControlError {
    fn from(e: tokio_util::codec::LinesCodecError) -> Self {
        match e {
            tokio_util::codec::LinesCodecError::Io(io) => ControlError::Io(io),
            other => ControlError::Codec(other.to_string()),
        }
    }
}
