use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an execution instance, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pendiente,
    EnProgreso,
    Pausado,
    Completado,
    Cancelado,
    Error,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completado | ExecutionStatus::Cancelado | ExecutionStatus::Error
        )
    }

    pub fn is_in_progress(&self) -> bool {
        *self == ExecutionStatus::EnProgreso
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pendiente => "pendiente",
            ExecutionStatus::EnProgreso => "en_progreso",
            ExecutionStatus::Pausado => "pausado",
            ExecutionStatus::Completado => "completado",
            ExecutionStatus::Cancelado => "cancelado",
            ExecutionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate delivery counters for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionMetrics {
    pub total_recipients: u64,
    pub sent: u64,
    pub failed: u64,
    pub pending: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub est_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// One entry of an execution's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub level: EventLevel,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stage_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of a running or finished flow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: String,
    pub flow_id: String,
    pub estado: ExecutionStatus,
    #[serde(default)]
    pub metrics: ExecutionMetrics,
    #[serde(default)]
    pub events: Vec<ExecutionEvent>,
    /// Set when `estado` is `error`.
    #[serde(default)]
    pub error_mensaje: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One sub-batch of a stage's send-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_number: u32,
    #[serde(default)]
    pub status: BatchStatus,
    #[serde(default)]
    pub recipients: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageBatching {
    pub stage_id: String,
    #[serde(default)]
    pub total_recipients: u64,
    #[serde(default)]
    pub batches: Vec<BatchRecord>,
}

impl StageBatching {
    pub fn uses_batching(&self) -> bool {
        !self.batches.is_empty()
    }
}

/// Per-stage batching progress of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchingReport {
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub stages: Vec<StageBatching>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchingPhase {
    /// No stage of the execution is batched.
    #[default]
    None,
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientCounts {
    pub total: u64,
    pub sent: u64,
    pub pending: u64,
}

/// Batching progress aggregated across every stage of an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchingSummary {
    pub status: BatchingPhase,
    pub batches: BatchCounts,
    pub recipients: RecipientCounts,
}

/// Payload for launching a flow. Without `recipient_ids` the backend runs
/// the flow for all of its recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartExecutionRequest {
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedExecution {
    pub execution_id: String,
    pub estado: ExecutionStatus,
}

/// Reply to cancel/pause/resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub estado: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedFlow {
    pub id: String,
}
