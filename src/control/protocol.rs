//! Control line protocol
//!
//! One command per line (`START`, `STOP`, `STATUS`; case-insensitive), one
//! JSON object per response line:
//!
//! ```text
//! START   -> {"ok":true,"outcome":"started","connected":false,"retryAttempts":0}
//! STATUS  -> {"connected":true,"retryAttempts":0}
//! BOGUS   -> {"ok":false,"error":"unknown command: \"BOGUS\""}
//! ```

use super::surface::{ControlCommand, ControlResponse};
use super::ControlError;
use crate::config::GateFailure;
use serde::Serialize;

pub fn parse_command(line: &str) -> Result<ControlCommand, ControlError> {
    let word = line.trim();
    if word.eq_ignore_ascii_case("start") {
        Ok(ControlCommand::Start)
    } else if word.eq_ignore_ascii_case("stop") {
        Ok(ControlCommand::Stop)
    } else if word.eq_ignore_ascii_case("status") || word.eq_ignore_ascii_case("query_status") {
        Ok(ControlCommand::QueryStatus)
    } else {
        Err(ControlError::UnknownCommand(word.to_string()))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandReply {
    ok: bool,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<GateFailure>,
    connected: bool,
    retry_attempts: u32,
}

#[derive(Serialize)]
struct ErrorReply<'a> {
    ok: bool,
    error: &'a str,
}

pub fn render_response(response: &ControlResponse) -> String {
    let rendered = match response {
        ControlResponse::Command { outcome, status } => {
            let reason = match outcome {
                crate::connector::CommandOutcome::Refused(reason) => Some(*reason),
                _ => None,
            };
            serde_json::to_string(&CommandReply {
                ok: true,
                outcome: outcome.name(),
                reason,
                connected: status.connected,
                retry_attempts: status.retry_attempts,
            })
        }
        ControlResponse::Status(status) => serde_json::to_string(status),
    };
    // Plain structs of strings, bools and integers always serialize
    rendered.unwrap_or_else(|e| render_error(&e.to_string()))
}

pub fn render_error(message: &str) -> String {
    serde_json::to_string(&ErrorReply {
        ok: false,
        error: message,
    })
    .unwrap_or_else(|_| r#"{"ok":false}"#.to_string())
}
