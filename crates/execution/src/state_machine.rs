use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::types::ExecutionStatus;

/// Describes a single expected state transition of an execution instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
    pub trigger: String,
}

/// Tracks the lifecycle of an execution as echoed by the backend.
///
/// Terminal states (`completado`, `cancelado`, `error`) are absorbing: no
/// transition leaves them.
#[derive(Debug, Clone)]
pub struct ExecutionLifecycle {
    pub state: ExecutionStatus,
    pub transitions: Vec<StateTransition>,
}

impl ExecutionLifecycle {
    /// Creates a lifecycle starting in `pendiente` with the expected
    /// transitions pre-configured.
    pub fn new() -> Self {
        Self::starting_at(ExecutionStatus::Pendiente)
    }

    pub fn starting_at(state: ExecutionStatus) -> Self {
        use ExecutionStatus::*;

        let table = [
            // pendiente ->
            (Pendiente, EnProgreso, "batch_started"),
            (Pendiente, Completado, "nothing_to_send"),
            (Pendiente, Cancelado, "cancelled_before_start"),
            (Pendiente, Error, "start_failed"),
            // en_progreso ->
            (EnProgreso, Pausado, "paused"),
            (EnProgreso, Completado, "all_stages_sent"),
            (EnProgreso, Cancelado, "cancelled"),
            (EnProgreso, Error, "send_failed"),
            // pausado ->
            (Pausado, EnProgreso, "resumed"),
            (Pausado, Cancelado, "cancelled_while_paused"),
            (Pausado, Error, "pause_failed"),
        ];

        let transitions = table
            .iter()
            .map(|(from, to, trigger)| StateTransition {
                from: *from,
                to: *to,
                trigger: trigger.to_string(),
            })
            .collect();

        Self { state, transitions }
    }

    /// Returns `true` if the transition is listed. Staying in the same state
    /// is always allowed.
    pub fn can_transition(&self, from: &ExecutionStatus, to: &ExecutionStatus) -> bool {
        from == to || self.transitions.iter().any(|t| t.from == *from && t.to == *to)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves to `to` if the transition is listed.
    pub fn transition(&mut self, to: ExecutionStatus) -> Result<()> {
        if self.can_transition(&self.state, &to) {
            self.state = to;
            Ok(())
        } else {
            Err(anyhow!(
                "Invalid execution transition from {} to {}",
                self.state,
                to
            ))
        }
    }

    /// Records a state reported by the backend. Unlisted transitions between
    /// non-terminal states are still taken (a poll can skip intermediate
    /// states); leaving a terminal state is refused.
    pub fn observe(&mut self, to: ExecutionStatus) -> Result<bool> {
        if self.state == to {
            return Ok(false);
        }
        if self.is_terminal() {
            return Err(anyhow!(
                "Execution already finished as {}; ignoring {}",
                self.state,
                to
            ));
        }
        if !self.can_transition(&self.state, &to) {
            tracing::warn!(from = %self.state, to = %to, "Unexpected execution transition");
        }
        self.state = to;
        Ok(true)
    }
}

impl Default for ExecutionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
