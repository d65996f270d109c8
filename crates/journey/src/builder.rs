use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GraphError;
use crate::types::{DistributionConfig, Edge, FlowBuilderState, Node, NodeKind, NodePatch, Position};

/// Every mutation the editor can perform on a [`FlowBuilderState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BuilderAction {
    AddNode { node: Node },
    RemoveNode { id: String },
    UpdateNode { id: String, patch: NodePatch },
    AddEdge { edge: Edge },
    RemoveEdge { id: String },
    SetNodePosition { id: String, position: Position },
    SetFlowName { name: String },
    SetFlowDescription { description: String },
    SetTipoDeudor { tipo_deudor: Option<String> },
    SelectOrigin { origin_id: Option<String> },
    ToggleProspecto { id: String },
    SetProspectos { ids: Vec<String> },
    SetDistribution { config: DistributionConfig },
    Load { state: Box<FlowBuilderState> },
    Reset,
}

impl BuilderAction {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            BuilderAction::AddNode { .. } => "add_node",
            BuilderAction::RemoveNode { .. } => "remove_node",
            BuilderAction::UpdateNode { .. } => "update_node",
            BuilderAction::AddEdge { .. } => "add_edge",
            BuilderAction::RemoveEdge { .. } => "remove_edge",
            BuilderAction::SetNodePosition { .. } => "set_node_position",
            BuilderAction::SetFlowName { .. } => "set_flow_name",
            BuilderAction::SetFlowDescription { .. } => "set_flow_description",
            BuilderAction::SetTipoDeudor { .. } => "set_tipo_deudor",
            BuilderAction::SelectOrigin { .. } => "select_origin",
            BuilderAction::ToggleProspecto { .. } => "toggle_prospecto",
            BuilderAction::SetProspectos { .. } => "set_prospectos",
            BuilderAction::SetDistribution { .. } => "set_distribution",
            BuilderAction::Load { .. } => "load",
            BuilderAction::Reset => "reset",
        }
    }
}

/// Applies `action` to `state` and returns the resulting aggregate. The input
/// is never modified; on error no new state is produced.
pub fn reduce(state: &FlowBuilderState, action: BuilderAction) -> Result<FlowBuilderState, GraphError> {
    let mut next = state.clone();
    apply(&mut next, action)?;
    Ok(next)
}

fn apply(state: &mut FlowBuilderState, action: BuilderAction) -> Result<(), GraphError> {
    match action {
        BuilderAction::AddNode { node } => {
            if state.contains_node(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            state.nodes.push(node);
        }
        BuilderAction::RemoveNode { id } => {
            state.nodes.retain(|n| n.id != id);
            state.edges.retain(|e| e.source != id && e.target != id);
        }
        BuilderAction::UpdateNode { id, patch } => {
            if let Some(node) = state.nodes.iter_mut().find(|n| n.id == id) {
                patch.apply_to(node)?;
            }
        }
        BuilderAction::AddEdge { edge } => {
            check_edge(state, &edge)?;
            state.edges.push(edge);
        }
        BuilderAction::RemoveEdge { id } => {
            state.edges.retain(|e| e.id != id);
        }
        BuilderAction::SetNodePosition { id, position } => {
            if let Some(node) = state.nodes.iter_mut().find(|n| n.id == id) {
                node.position = position;
            }
        }
        BuilderAction::SetFlowName { name } => state.flow_name = name,
        BuilderAction::SetFlowDescription { description } => state.flow_description = description,
        BuilderAction::SetTipoDeudor { tipo_deudor } => state.tipo_deudor = tipo_deudor,
        BuilderAction::SelectOrigin { origin_id } => {
            // Prospects belong to an origin; switching origin drops them.
            if origin_id != state.selected_origin_id {
                state.selected_prospectos.clear();
            }
            state.selected_origin_id = origin_id;
        }
        BuilderAction::ToggleProspecto { id } => {
            if !state.selected_prospectos.remove(&id) {
                state.selected_prospectos.insert(id);
            }
        }
        BuilderAction::SetProspectos { ids } => {
            state.selected_prospectos = ids.into_iter().collect();
        }
        BuilderAction::SetDistribution { config } => state.distribution_config = config,
        BuilderAction::Load { state: loaded } => *state = *loaded,
        BuilderAction::Reset => *state = FlowBuilderState::default(),
    }
    Ok(())
}

fn check_edge(state: &FlowBuilderState, edge: &Edge) -> Result<(), GraphError> {
    let source = state
        .node(&edge.source)
        .ok_or_else(|| GraphError::UnknownNode(edge.source.clone()))?;
    if !state.contains_node(&edge.target) {
        return Err(GraphError::UnknownNode(edge.target.clone()));
    }
    if source.kind() == NodeKind::Conditional && edge.source_handle.is_none() {
        return Err(GraphError::MissingBranchHandle(edge.source.clone()));
    }
    if state.edges.iter().any(|e| e.same_link(edge)) {
        return Err(GraphError::DuplicateEdge {
            from: edge.source.clone(),
            to: edge.target.clone(),
            handle: edge
                .source_handle
                .map(|h| h.as_str().to_string())
                .unwrap_or_else(|| "-".to_string()),
        });
    }
    if state.edges.iter().any(|e| e.id == edge.id) {
        return Err(GraphError::DuplicateEdgeId(edge.id.clone()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Builder with optimistic reconciliation
// ---------------------------------------------------------------------------

/// Identifier of an optimistically applied action awaiting confirmation.
pub type ActionId = u64;

/// One entry of the action log. Entries stay in dispatch order; `confirmed`
/// entries are only folded into the confirmed base once every entry before
/// them is confirmed too.
#[derive(Debug, Clone)]
struct LoggedAction {
    id: ActionId,
    action: BuilderAction,
    confirmed: bool,
}

/// Owns the aggregate and funnels every mutation through [`reduce`].
///
/// Actions can be applied directly or optimistically. Optimistic actions are
/// visible in [`FlowBuilder::state`] immediately but are kept in a log until
/// the server confirms or rejects them. The current state is always the
/// confirmed base with the log replayed on top of it.
#[derive(Debug, Clone, Default)]
pub struct FlowBuilder {
    confirmed: FlowBuilderState,
    current: FlowBuilderState,
    log: Vec<LoggedAction>,
    next_action_id: ActionId,
}

impl FlowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing aggregate, e.g. one rebuilt from a saved
    /// flow configuration.
    pub fn from_state(state: FlowBuilderState) -> Self {
        Self {
            confirmed: state.clone(),
            current: state,
            log: Vec::new(),
            next_action_id: 0,
        }
    }

    /// Current state including any unconfirmed optimistic actions.
    pub fn state(&self) -> &FlowBuilderState {
        &self.current
    }

    /// State as last acknowledged, without pending optimistic actions.
    pub fn confirmed_state(&self) -> &FlowBuilderState {
        &self.confirmed
    }

    /// Optimistic actions still awaiting confirmation or rollback.
    pub fn pending_count(&self) -> usize {
        self.log.iter().filter(|a| !a.confirmed).count()
    }

    pub fn has_pending(&self) -> bool {
        self.log.iter().any(|a| !a.confirmed)
    }

    /// Applies an action that needs no confirmation.
    ///
    /// While optimistic actions are pending the action is logged behind them
    /// as already confirmed, so a later rollback replays it in order.
    pub fn dispatch(&mut self, action: BuilderAction) -> Result<(), GraphError> {
        let name = action.name();
        let current = reduce(&self.current, action.clone())?;
        if self.log.is_empty() {
            self.confirmed = current.clone();
        } else {
            let id = self.next_id();
            self.log.push(LoggedAction {
                id,
                action,
                confirmed: true,
            });
        }
        self.current = current;
        debug!(action = name, nodes = self.current.nodes.len(), edges = self.current.edges.len(), "Applied builder action");
        Ok(())
    }

    /// Applies an action locally and records it until [`confirm`] or
    /// [`rollback`] is called with the returned id.
    ///
    /// [`confirm`]: FlowBuilder::confirm
    /// [`rollback`]: FlowBuilder::rollback
    pub fn apply_optimistic(&mut self, action: BuilderAction) -> Result<ActionId, GraphError> {
        let name = action.name();
        self.current = reduce(&self.current, action.clone())?;
        let id = self.next_id();
        self.log.push(LoggedAction {
            id,
            action,
            confirmed: false,
        });
        debug!(action = name, action_id = id, pending = self.pending_count(), "Applied optimistic action");
        Ok(id)
    }

    /// Marks a pending action as accepted by the server. Confirmations may
    /// arrive in any order.
    pub fn confirm(&mut self, id: ActionId) -> Result<(), GraphError> {
        let idx = self.position_of(id)?;
        self.log[idx].confirmed = true;
        self.advance_confirmed();
        debug!(action_id = id, pending = self.pending_count(), "Confirmed optimistic action");
        Ok(())
    }

    /// Discards a pending action and rebuilds the current state by replaying
    /// the rest of the log over the confirmed base. Logged actions that no
    /// longer apply are dropped with it.
    pub fn rollback(&mut self, id: ActionId) -> Result<(), GraphError> {
        let idx = self.position_of(id)?;
        self.log.remove(idx);
        self.replay();
        debug!(action_id = id, pending = self.pending_count(), "Rolled back optimistic action");
        Ok(())
    }

    /// Drops every pending action, keeping the confirmed ones that still
    /// apply without them.
    pub fn rollback_all(&mut self) {
        self.log.retain(|a| a.confirmed);
        self.replay();
    }

    fn next_id(&mut self) -> ActionId {
        let id = self.next_action_id;
        self.next_action_id += 1;
        id
    }

    fn position_of(&self, id: ActionId) -> Result<usize, GraphError> {
        self.log
            .iter()
            .position(|a| a.id == id && !a.confirmed)
            .ok_or(GraphError::UnknownAction(id))
    }

    /// Folds the confirmed prefix of the log into the confirmed base.
    fn advance_confirmed(&mut self) {
        let prefix = self.log.iter().take_while(|a| a.confirmed).count();
        for entry in self.log.drain(..prefix) {
            match reduce(&self.confirmed, entry.action) {
                Ok(next) => self.confirmed = next,
                Err(e) => warn!(action_id = entry.id, error = %e, "Logged action does not apply to confirmed base"),
            }
        }
    }

    fn replay(&mut self) {
        let mut state = self.confirmed.clone();
        let mut kept = Vec::with_capacity(self.log.len());
        for entry in self.log.drain(..) {
            match reduce(&state, entry.action.clone()) {
                Ok(next) => {
                    state = next;
                    kept.push(entry);
                }
                Err(e) => {
                    warn!(action_id = entry.id, error = %e, "Dropping logged action that no longer applies");
                }
            }
        }
        self.log = kept;
        self.current = state;
        self.advance_confirmed();
    }
}
