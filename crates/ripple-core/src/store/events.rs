//! Fire-and-forget user notifications.
//!
//! Delivery (WebSocket fan-out, pub/sub) lives outside this crate; the
//! engine only emits `(user, event, payload)` triples through an
//! [`EventSink`].

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::info;

pub const PROJECT_FILES_READY: &str = "project:files_ready";
pub const IMPACT_PARSER_COMPLETE: &str = "impact:parser_complete";
pub const IMPACT_LLM_COMPLETE: &str = "impact:llm_complete";
pub const IMPACT_LLM_FAILED: &str = "impact:llm_failed";
pub const CHANGE_PENDING_REVIEW: &str = "change:pending_review";
pub const CHANGE_APPROVED: &str = "change:approved";
pub const CHANGE_REJECTED: &str = "change:rejected";

pub trait EventSink: Send + Sync {
    /// Must not fail the caller; sinks swallow their own delivery errors.
    fn publish(&self, user_id: &str, event: &str, payload: Value);
}

pub fn change_payload(change_request_id: &str) -> Value {
    json!({ "change_request_id": change_request_id })
}

pub fn project_payload(project_id: &str) -> Value {
    json!({ "project_id": project_id })
}

/// Logs each event.
#[derive(Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, user_id: &str, event: &str, payload: Value) {
        info!(user_id, event, %payload, "event");
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub user_id: String,
    pub event: String,
    pub payload: Value,
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Users that received `event`, in emission order.
    pub fn recipients(&self, event: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event == event)
            .map(|e| e.user_id.clone())
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, user_id: &str, event: &str, payload: Value) {
        self.events.lock().push(RecordedEvent {
            user_id: user_id.to_string(),
            event: event.to_string(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingEventSink::new();
        sink.publish("alice", IMPACT_PARSER_COMPLETE, change_payload("cr1"));
        sink.publish("bob", IMPACT_PARSER_COMPLETE, change_payload("cr1"));
        sink.publish("alice", PROJECT_FILES_READY, project_payload("p1"));

        assert_eq!(sink.recipients(IMPACT_PARSER_COMPLETE), vec!["alice", "bob"]);
        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].payload["project_id"], "p1");
        assert_eq!(events[0].payload["change_request_id"], "cr1");
    }

    #[test]
    fn test_tracing_sink_accepts_events() {
        TracingEventSink.publish("alice", CHANGE_APPROVED, change_payload("cr1"));
    }
}
