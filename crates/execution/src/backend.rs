use futures::future::BoxFuture;

use nurture_core::NurtureResult;
use nurture_journey::FlowConfiguration;

use crate::types::{
    BatchingReport, ControlResponse, ExecutionEvent, ExecutionState, PersistedFlow,
    StartExecutionRequest, StartedExecution,
};

/// Remote collaborator that stores flows and runs them.
///
/// Failures are returned as-is; retrying is left to the implementation.
pub trait FlowBackend: Send + Sync + 'static {
    /// Creates a flow, or replaces it when `flow_id` is given.
    fn persist_flow<'a>(
        &'a self,
        flow_id: Option<&'a str>,
        config: &'a FlowConfiguration,
    ) -> BoxFuture<'a, NurtureResult<PersistedFlow>>;

    /// Latest snapshot of an execution; without `execution_id` the backend
    /// reports the flow's most recent one.
    fn fetch_execution_status<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: Option<&'a str>,
    ) -> BoxFuture<'a, NurtureResult<ExecutionState>>;

    fn fetch_execution_events<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: &'a str,
        limit: u32,
        offset: u32,
    ) -> BoxFuture<'a, NurtureResult<Vec<ExecutionEvent>>>;

    /// Per-stage batch records of an execution. The backend reports raw
    /// batches rather than a ready-made summary; callers aggregate them with
    /// [`summarize_batching`](crate::batching::summarize_batching).
    fn fetch_batching_status<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<BatchingReport>>;

    fn start_execution<'a>(
        &'a self,
        request: &'a StartExecutionRequest,
    ) -> BoxFuture<'a, NurtureResult<StartedExecution>>;

    fn cancel_execution<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<ControlResponse>>;

    fn pause_execution<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<ControlResponse>>;

    fn resume_execution<'a>(
        &'a self,
        flow_id: &'a str,
        execution_id: &'a str,
    ) -> BoxFuture<'a, NurtureResult<ControlResponse>>;
}
