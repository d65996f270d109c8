use std::sync::Arc;

use dashmap::DashSet;
use tracing::{info, warn};

use nurture_core::event_bus::{make_event, noop_sink, EventSink, EventType};
use nurture_core::{NurtureError, NurtureResult};
use nurture_journey::{build_flow_configuration, validate_flow, FlowBuilderState, FlowConfiguration};

use crate::backend::FlowBackend;

/// Result of a successful publish.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub flow_id: String,
    /// Advisory findings from validation; they never block publishing.
    pub warnings: Vec<String>,
    pub configuration: FlowConfiguration,
}

/// Releases the draft's in-flight slot when the submission ends, whatever
/// the outcome.
struct InFlightGuard {
    drafts: Arc<DashSet<String>>,
    key: String,
}

impl InFlightGuard {
    fn acquire(drafts: &Arc<DashSet<String>>, key: &str) -> NurtureResult<Self> {
        if !drafts.insert(key.to_string()) {
            return Err(NurtureError::SubmissionInFlight(key.to_string()));
        }
        Ok(Self {
            drafts: Arc::clone(drafts),
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.drafts.remove(&self.key);
    }
}

/// Validates and submits builder drafts. At most one submission per draft
/// key is outstanding at a time; failures are not retried.
pub struct FlowPublisher<B: FlowBackend> {
    backend: Arc<B>,
    in_flight: Arc<DashSet<String>>,
    event_sink: Arc<dyn EventSink>,
}

impl<B: FlowBackend> FlowPublisher<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            in_flight: Arc::new(DashSet::new()),
            event_sink: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn is_in_flight(&self, draft_key: &str) -> bool {
        self.in_flight.contains(draft_key)
    }

    /// Creates the flow, or replaces `existing_flow_id` when editing.
    pub async fn publish(
        &self,
        draft_key: &str,
        state: &FlowBuilderState,
        existing_flow_id: Option<&str>,
    ) -> NurtureResult<PublishOutcome> {
        let validation = validate_flow(state);
        if !validation.is_valid {
            warn!(
                draft = %draft_key,
                errors = validation.errors.len(),
                "Refusing to publish invalid flow"
            );
            return Err(NurtureError::InvalidFlow(validation.errors));
        }

        let _guard = InFlightGuard::acquire(&self.in_flight, draft_key)?;
        let configuration = build_flow_configuration(state);

        match self.backend.persist_flow(existing_flow_id, &configuration).await {
            Ok(persisted) => {
                metrics::counter!("flow.published").increment(1);
                info!(
                    draft = %draft_key,
                    flow_id = %persisted.id,
                    stages = configuration.structure_config.stages.len(),
                    updated = existing_flow_id.is_some(),
                    "Flow published"
                );
                self.event_sink.emit(make_event(
                    EventType::FlowPublished,
                    persisted.id.clone(),
                    None,
                    Some(configuration.name.clone()),
                ));
                Ok(PublishOutcome {
                    flow_id: persisted.id,
                    warnings: validation.warnings,
                    configuration,
                })
            }
            Err(e) => {
                metrics::counter!("flow.publish_failures").increment(1);
                warn!(draft = %draft_key, error = %e, "Flow publish failed");
                self.event_sink.emit(make_event(
                    EventType::FlowPublishFailed,
                    existing_flow_id.unwrap_or(draft_key),
                    None,
                    Some(e.to_string()),
                ));
                Err(e)
            }
        }
    }
}
