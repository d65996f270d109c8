use tracing::{debug, warn};

use crate::batching::summarize_batching;
use crate::state_machine::ExecutionLifecycle;
use crate::types::{
    BatchingReport, BatchingSummary, ExecutionEvent, ExecutionMetrics, ExecutionState,
    ExecutionStatus,
};

/// What happened to a poll response handed to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Stored. `status_changed` is set when `estado` moved.
    Applied { status_changed: bool },
    /// A response issued after this one has already been stored.
    Stale,
    /// The execution already reached a terminal state.
    Finished,
}

/// Latest known state of one execution, reconciled from poll responses.
///
/// Each response carries the sequence number its request was issued with;
/// once a response has been stored, anything issued earlier is discarded.
/// All read methods are pure projections of what is stored.
#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    flow_id: String,
    execution_id: String,
    lifecycle: ExecutionLifecycle,
    snapshot: Option<ExecutionState>,
    events: Option<Vec<ExecutionEvent>>,
    batching: Option<BatchingReport>,
    status_seq: u64,
    events_seq: u64,
    batching_seq: u64,
}

impl ExecutionTracker {
    pub fn new(flow_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            execution_id: execution_id.into(),
            lifecycle: ExecutionLifecycle::new(),
            snapshot: None,
            events: None,
            batching: None,
            status_seq: 0,
            events_seq: 0,
            batching_seq: 0,
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn apply_status(&mut self, seq: u64, state: ExecutionState) -> ApplyOutcome {
        if seq <= self.status_seq {
            debug!(execution_id = %self.execution_id, seq, latest = self.status_seq, "Discarding stale status");
            return ApplyOutcome::Stale;
        }
        let status_changed = match self.lifecycle.observe(state.estado) {
            Ok(changed) => changed,
            Err(e) => {
                debug!(execution_id = %self.execution_id, error = %e, "Ignoring status after finish");
                return ApplyOutcome::Finished;
            }
        };
        if state.id != self.execution_id {
            warn!(expected = %self.execution_id, got = %state.id, "Status response for another execution");
        }
        self.status_seq = seq;
        self.snapshot = Some(state);
        ApplyOutcome::Applied { status_changed }
    }

    pub fn apply_events(&mut self, seq: u64, events: Vec<ExecutionEvent>) -> ApplyOutcome {
        if seq <= self.events_seq {
            return ApplyOutcome::Stale;
        }
        self.events_seq = seq;
        self.events = Some(events);
        ApplyOutcome::Applied {
            status_changed: false,
        }
    }

    pub fn apply_batching(&mut self, seq: u64, report: BatchingReport) -> ApplyOutcome {
        if seq <= self.batching_seq {
            return ApplyOutcome::Stale;
        }
        self.batching_seq = seq;
        self.batching = Some(report);
        ApplyOutcome::Applied {
            status_changed: false,
        }
    }

    /// Latest snapshot, if any poll has landed.
    pub fn snapshot(&self) -> Option<&ExecutionState> {
        self.snapshot.as_ref()
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        self.snapshot.as_ref().map(|s| s.estado)
    }

    pub fn metrics(&self) -> Option<&ExecutionMetrics> {
        self.snapshot.as_ref().map(|s| &s.metrics)
    }

    /// Event log: the dedicated events poll when available, otherwise the
    /// events embedded in the status snapshot.
    pub fn events(&self) -> &[ExecutionEvent] {
        match (&self.events, &self.snapshot) {
            (Some(events), _) => events.as_slice(),
            (None, Some(snapshot)) => snapshot.events.as_slice(),
            (None, None) => &[],
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.snapshot.as_ref().and_then(|s| s.error_mensaje.as_deref())
    }

    pub fn is_running(&self) -> bool {
        self.status().is_some_and(|s| s.is_in_progress())
    }

    pub fn is_finished(&self) -> bool {
        self.lifecycle.is_terminal()
    }

    pub fn batching(&self) -> Option<&BatchingReport> {
        self.batching.as_ref()
    }

    pub fn batching_summary(&self) -> BatchingSummary {
        self.batching
            .as_ref()
            .map(summarize_batching)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn poll(estado: ExecutionStatus, sent: u64) -> ExecutionState {
        ExecutionState {
            id: "exec-1".into(),
            flow_id: "flow-1".into(),
            estado,
            metrics: ExecutionMetrics {
                total_recipients: 50,
                sent,
                pending: 50 - sent,
                ..Default::default()
            },
            events: vec![],
            error_mensaje: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    #[test]
    fn test_progress_then_completion() {
        let mut tracker = ExecutionTracker::new("flow-1", "exec-1");
        assert_eq!(tracker.status(), None);
        assert!(!tracker.is_running());

        let out = tracker.apply_status(1, poll(ExecutionStatus::EnProgreso, 10));
        assert_eq!(out, ApplyOutcome::Applied { status_changed: true });
        assert!(tracker.is_running());
        assert_eq!(tracker.metrics().unwrap().sent, 10);

        tracker.apply_status(2, poll(ExecutionStatus::Completado, 50));
        assert!(!tracker.is_running());
        assert!(tracker.is_finished());
        assert_eq!(tracker.metrics().unwrap().sent, 50);
    }

    #[test]
    fn test_stale_response_is_discarded() {
        let mut tracker = ExecutionTracker::new("flow-1", "exec-1");
        tracker.apply_status(2, poll(ExecutionStatus::EnProgreso, 30));
        let out = tracker.apply_status(1, poll(ExecutionStatus::EnProgreso, 10));
        assert_eq!(out, ApplyOutcome::Stale);
        assert_eq!(tracker.metrics().unwrap().sent, 30);
    }

    #[test]
    fn test_terminal_state_sticks() {
        let mut tracker = ExecutionTracker::new("flow-1", "exec-1");
        tracker.apply_status(1, poll(ExecutionStatus::Cancelado, 5));
        let out = tracker.apply_status(2, poll(ExecutionStatus::EnProgreso, 6));
        assert_eq!(out, ApplyOutcome::Finished);
        assert_eq!(tracker.status(), Some(ExecutionStatus::Cancelado));
    }

    #[test]
    fn test_error_message_is_business_outcome() {
        let mut tracker = ExecutionTracker::new("flow-1", "exec-1");
        let mut state = poll(ExecutionStatus::Error, 0);
        state.error_mensaje = Some("SMS provider rejected the batch".into());
        tracker.apply_status(1, state);
        assert_eq!(tracker.error_message(), Some("SMS provider rejected the batch"));
        assert!(tracker.is_finished());
    }

    #[test]
    fn test_events_prefer_dedicated_poll() {
        let mut tracker = ExecutionTracker::new("flow-1", "exec-1");
        let event = ExecutionEvent {
            id: "ev-1".into(),
            event_type: "stage_started".into(),
            level: Default::default(),
            message: "Stage 1 started".into(),
            stage_id: Some("stage-1".into()),
            created_at: Utc::now(),
        };
        let mut state = poll(ExecutionStatus::EnProgreso, 1);
        state.events = vec![event.clone()];
        tracker.apply_status(1, state);
        assert_eq!(tracker.events().len(), 1);

        tracker.apply_events(1, vec![]);
        assert!(tracker.events().is_empty());
        assert_eq!(tracker.apply_events(1, vec![event]), ApplyOutcome::Stale);
    }
}
