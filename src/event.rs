//! Inbound and matched events
//!
//! Events are ephemeral: parsed once from an upstream frame, filtered, fanned
//! out, and dropped. Nothing here is persisted or retried.

use crate::transport::SseFrame;
use serde::{Deserialize, Serialize};

/// SSE event name used when the frame carries no `event:` field
pub const DEFAULT_EVENT_NAME: &str = "message";

#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: String,
    pub payload: serde_json::Value,
    pub received_at_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedEvent {
    #[error("payload is not JSON: {0}")]
    NotJson(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
}

impl InboundEvent {
    /// Parse an upstream frame
    ///
    /// The kind is the SSE event name; unnamed frames fall back to a `kind`
    /// or `type` field in the payload.
    pub fn from_frame(frame: &SseFrame, received_at_ms: u64) -> Result<Self, MalformedEvent> {
        let payload: serde_json::Value = serde_json::from_str(&frame.data)?;
        if !payload.is_object() {
            return Err(MalformedEvent::NotAnObject);
        }

        let kind = match frame.event.as_deref() {
            Some(name) if name != DEFAULT_EVENT_NAME => name.to_string(),
            _ => payload
                .get("kind")
                .or_else(|| payload.get("type"))
                .and_then(|v| v.as_str())
                .unwrap_or(DEFAULT_EVENT_NAME)
                .to_string(),
        };

        Ok(InboundEvent {
            kind,
            payload,
            received_at_ms,
        })
    }

    /// String value of a top-level payload field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(|v| v.as_str())
    }
}

/// An inbound event that passed the filter; the unit of delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedEvent {
    pub kind: String,
    pub identifier: String,
    pub payload: serde_json::Value,
    pub received_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: Option<&str>, data: &str) -> SseFrame {
        SseFrame {
            event: event.map(str::to_string),
            data: data.to_string(),
            id: None,
        }
    }

    #[test]
    fn test_named_frame_kind() {
        let event =
            InboundEvent::from_frame(&frame(Some("pause-equivalent"), r#"{"rewardId":"RWD-1"}"#), 5)
                .unwrap();
        assert_eq!(event.kind, "pause-equivalent");
        assert_eq!(event.field("rewardId"), Some("RWD-1"));
        assert_eq!(event.received_at_ms, 5);
    }

    #[test]
    fn test_unnamed_frame_uses_payload_kind() {
        let event = InboundEvent::from_frame(
            &frame(None, r#"{"kind":"pause-equivalent","rewardId":"RWD-1"}"#),
            0,
        )
        .unwrap();
        assert_eq!(event.kind, "pause-equivalent");

        let plain = InboundEvent::from_frame(&frame(None, r#"{"rewardId":"x"}"#), 0).unwrap();
        assert_eq!(plain.kind, DEFAULT_EVENT_NAME);
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            InboundEvent::from_frame(&frame(None, "{not json"), 0),
            Err(MalformedEvent::NotJson(_))
        ));
        assert!(matches!(
            InboundEvent::from_frame(&frame(None, "[1,2]"), 0),
            Err(MalformedEvent::NotAnObject)
        ));
    }

    #[test]
    fn test_non_string_field_is_absent() {
        let event = InboundEvent::from_frame(&frame(None, r#"{"rewardId":42}"#), 0).unwrap();
        assert_eq!(event.field("rewardId"), None);
    }

    #[test]
    fn test_matched_event_wire_names() {
        let matched = MatchedEvent {
            kind: "pause-equivalent".to_string(),
            identifier: "RWD-1".to_string(),
            payload: serde_json::json!({"rewardId": "RWD-1"}),
            received_at_ms: 7,
        };
        let json = serde_json::to_value(&matched).unwrap();
        assert_eq!(json["receivedAtMs"], 7);
        assert_eq!(json["identifier"], "RWD-1");
    }
}
