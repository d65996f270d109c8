//! Event bus: trait for emitting flow lifecycle events from the publisher
//! and the execution monitor.
//!
//! Components accept an `Arc<dyn EventSink>`; the CLI wires a logging sink,
//! tests use [`CaptureSink`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    FlowPublished,
    FlowPublishFailed,
    ExecutionStarted,
    ExecutionStateChanged,
    ExecutionControlRequested,
    ExecutionFinished,
}

/// A single lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NurtureEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub flow_id: String,
    pub execution_id: Option<String>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Trait for emitting lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: NurtureEvent);
}

/// No-op sink for callers that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: NurtureEvent) {}
}

/// Sink that forwards every event to `tracing` at info level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: NurtureEvent) {
        tracing::info!(
            event_type = ?event.event_type,
            flow_id = %event.flow_id,
            execution_id = ?event.execution_id,
            detail = ?event.detail,
            "flow event"
        );
    }
}

/// Records every event in memory. Used by tests to assert what a component
/// emitted.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<NurtureEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NurtureEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.of_type(event_type).len()
    }

    /// Events of one type, oldest first.
    pub fn of_type(&self, event_type: EventType) -> Vec<NurtureEvent> {
        let events = self.events.lock();
        events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Events recorded for one execution, oldest first.
    pub fn for_execution(&self, execution_id: &str) -> Vec<NurtureEvent> {
        let events = self.events.lock();
        events
            .iter()
            .filter(|e| e.execution_id.as_deref() == Some(execution_id))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: NurtureEvent) {
        self.events.lock().push(event);
    }
}

/// Builds an event stamped with a fresh id and the current time.
pub fn make_event(
    event_type: EventType,
    flow_id: impl Into<String>,
    execution_id: Option<String>,
    detail: Option<String>,
) -> NurtureEvent {
    NurtureEvent {
        event_id: Uuid::new_v4(),
        event_type,
        flow_id: flow_id.into(),
        execution_id,
        detail,
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
