//! Event filtering against the configured identifier

use crate::config::FilterSettings;
use crate::event::{InboundEvent, MatchedEvent};

/// Pure matcher: same event and `filter_id` always give the same answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    kind: String,
    identifier_field: String,
}

impl EventFilter {
    pub fn new(kind: impl Into<String>, identifier_field: impl Into<String>) -> Self {
        EventFilter {
            kind: kind.into(),
            identifier_field: identifier_field.into(),
        }
    }

    pub fn from_settings(settings: &FilterSettings) -> Self {
        EventFilter::new(&settings.event_kind, &settings.identifier_field)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn identifier_field(&self) -> &str {
        &self.identifier_field
    }

    /// Exact match of the payload identifier against `filter_id`.
    /// An empty `filter_id` or a missing identifier never matches.
    pub fn matches(&self, event: &InboundEvent, filter_id: &str) -> bool {
        if filter_id.is_empty() || event.kind != self.kind {
            return false;
        }
        event.field(&self.identifier_field) == Some(filter_id)
    }

    pub fn select(&self, event: InboundEvent, filter_id: &str) -> Option<MatchedEvent> {
        if !self.matches(&event, filter_id) {
            return None;
        }
        Some(MatchedEvent {
            kind: event.kind,
            identifier: filter_id.to_string(),
            payload: event.payload,
            received_at_ms: event.received_at_ms,
        })
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        EventFilter::from_settings(&FilterSettings::default())
    }
}
