//! State publication: entity updates and change events.
//!
//! The poller reports through the [`StateSink`] trait. Every tick refreshes
//! the entity states; change events fire only when a signal's value differs
//! from the previous tick. [`TracingSink`] is the built-in backend and
//! writes both as structured log lines, with the full attribute payload
//! serialized as JSON.

use serde_json::Value;
use tracing::info;

/// Receiver for entity state updates and change events.
#[cfg_attr(test, mockall::automock)]
pub trait StateSink: Send {
    /// Records the current state of one entity. Called every tick whether
    /// or not the value changed.
    fn publish(&mut self, entity_id: &str, state: &str, attributes: Value);

    /// Announces that a signal transitioned. Called only on change.
    fn emit_event(&mut self, event: &str, payload: Value);
}

/// Sink that logs states and events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl StateSink for TracingSink {
    fn publish(&mut self, entity_id: &str, state: &str, attributes: Value) {
        info!(target: "tvstate::state", entity_id, state, attributes = %attributes, "state");
    }

    fn emit_event(&mut self, event: &str, payload: Value) {
        info!(target: "tvstate::event", event, payload = %payload, "event");
    }
}

/// ISO-8601 UTC timestamp used in entity attributes.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
