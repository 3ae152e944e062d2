//! Stateright model checking
//!
//! Exhaustive exploration of the connector state machine under every
//! interleaving of commands, gate flips and (possibly stale) transport and
//! timer notifications.
//!
//! ## Running
//!
//! ```bash
//! # Marked #[ignore] to keep the default test run fast
//! cargo test stateright_connector -- --ignored --nocapture
//! ```
//!
//! | Model | Key properties |
//! |-------|----------------|
//! | `ConnectorModel` | connected only while permitted, bounded retries, no timer after `Failed` |

pub mod connector;

pub use connector::ConnectorModel;
