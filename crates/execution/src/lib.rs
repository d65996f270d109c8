//! Execution side of nurture flows: publishing a validated draft, launching
//! it, and tracking a running instance by polling the backend.

pub mod backend;
pub mod batching;
pub mod http;
pub mod monitor;
pub mod publisher;
pub mod state_machine;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod fake;

pub use backend::FlowBackend;
pub use batching::summarize_batching;
pub use http::HttpFlowBackend;
pub use monitor::{ExecutionMonitor, ExecutionWatch};
pub use publisher::{FlowPublisher, PublishOutcome};
pub use tracker::{ApplyOutcome, ExecutionTracker};
pub use types::{ExecutionState, ExecutionStatus};
