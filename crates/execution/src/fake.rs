//! In-memory backend used by the monitor and publisher tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use nurture_core::{NurtureError, NurtureResult};
use nurture_journey::FlowConfiguration;

use crate::backend::FlowBackend;
use crate::types::{
    BatchingReport, ControlResponse, ExecutionEvent, ExecutionMetrics, ExecutionState,
    ExecutionStatus, PersistedFlow, StartExecutionRequest, StartedExecution,
};

/// Replays a script of status responses; the last one repeats forever.
#[derive(Default)]
pub struct ScriptedBackend {
    statuses: Mutex<VecDeque<NurtureResult<ExecutionState>>>,
    last_status: Mutex<Option<ExecutionState>>,
    status_delays: Mutex<VecDeque<Duration>>,
    pub status_calls: AtomicUsize,
    pub batching_calls: AtomicUsize,
    pub persist_calls: AtomicUsize,
    pub persisted: Mutex<Vec<FlowConfiguration>>,
    pub started: Mutex<Vec<StartExecutionRequest>>,
    pub cancelled: Mutex<Vec<String>>,
    pub persist_delay: Option<Duration>,
    pub fail_persist: bool,
}

pub fn state(estado: ExecutionStatus, sent: u64) -> ExecutionState {
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
        started_at: None,
        finished_at: None,
    }
}

impl ScriptedBackend {
    pub fn with_statuses(statuses: Vec<NurtureResult<ExecutionState>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            ..Default::default()
        }
    }

    /// Delays the responses of the first status polls, one entry per call.
    pub fn with_status_delays(self, delays: Vec<Duration>) -> Self {
        *self.status_delays.lock() = delays.into();
        self
    }

    pub fn with_persist_delay(mut self, delay: Duration) -> Self {
        self.persist_delay = Some(delay);
        self
    }

    pub fn failing_persist(mut self) -> Self {
        self.fail_persist = true;
        self
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn next_status(&self) -> NurtureResult<ExecutionState> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().pop_front() {
            Some(Ok(state)) => {
                *self.last_status.lock() = Some(state.clone());
                Ok(state)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last_status
                .lock()
                .clone()
                .ok_or_else(|| NurtureError::Transport("no scripted status".into())),
        }
    }

    /// Makes every following poll report `estado`.
    pub fn push_status(&self, estado: ExecutionStatus, sent: u64) {
        self.statuses.lock().push_back(Ok(state(estado, sent)));
    }
}

impl FlowBackend for ScriptedBackend {
    fn persist_flow<'a>(
        &'a self,
        flow_id: Option<&'a str>,
        config: &'a FlowConfiguration,
    ) -> BoxFuture<'a, NurtureResult<PersistedFlow>> {
        Box::pin(async move {
            self.persist_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.persist_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_persist {
                return Err(NurtureError::Backend {
                    status: 500,
                    message: "database unavailable".into(),
                });
            }
            self.persisted.lock().push(config.clone());
            Ok(PersistedFlow {
                id: flow_id.unwrap_or("flow-1").to_string(),
            })
        })
    }

    fn fetch_execution_status<'a>(
        &'a self,
        _flow_id: &'a str,
        _execution_id: Option<&'a str>,
    ) -> BoxFuture<'a, NurtureResult<ExecutionState>> {
        Box::pin(async move {
            let delay = self.status_delays.lock().pop_front();
            let result = self.next_status();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn fetch_execution_events<'a>(
        &'a self,
        _flow_id: &'a str,
        _execution_id: &'a str,
        _limit: u32,
        _offset: u32,
    ) -> BoxFuture<'a, NurtureResult<Vec<ExecutionEvent>>> {
        Box::pin(async move { Ok(vec![]) })
    }

    fn fetch_batching_status<'a>(
        &'a self,
        _flow_id: &'a str,
        execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<BatchingReport>> {
        Box::pin(async move {
            self.batching_calls.fetch_add(1, Ordering::SeqCst);
            Ok(BatchingReport {
                execution_id: execution_id.to_string(),
                stages: vec![],
            })
        })
    }

    fn start_execution<'a>(
        &'a self,
        request: &'a StartExecutionRequest,
    ) -> BoxFuture<'a, NurtureResult<StartedExecution>> {
        Box::pin(async move {
            self.started.lock().push(request.clone());
            Ok(StartedExecution {
                execution_id: "exec-1".into(),
                estado: ExecutionStatus::Pendiente,
            })
        })
    }

    fn cancel_execution<'a>(
        &'a self,
        _flow_id: &'a str,
        execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<ControlResponse>> {
        Box::pin(async move {
            self.cancelled.lock().push(execution_id.to_string());
            self.push_status(ExecutionStatus::Cancelado, 0);
            Ok(ControlResponse {
                estado: ExecutionStatus::Cancelado,
            })
        })
    }

    fn pause_execution<'a>(
        &'a self,
        _flow_id: &'a str,
        _execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<ControlResponse>> {
        Box::pin(async move {
            self.push_status(ExecutionStatus::Pausado, 0);
            Ok(ControlResponse {
                estado: ExecutionStatus::Pausado,
            })
        })
    }

    fn resume_execution<'a>(
        &'a self,
        _flow_id: &'a str,
        _execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<ControlResponse>> {
        Box::pin(async move {
            self.push_status(ExecutionStatus::EnProgreso, 0);
            Ok(ControlResponse {
                estado: ExecutionStatus::EnProgreso,
            })
        })
    }
}
