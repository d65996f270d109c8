use thiserror::Error;

use crate::types::NodeKind;

/// Graph-integrity failures. These signal a UI bug (an action the editor
/// should never have offered); the aggregate is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node {0} does not exist")]
    UnknownNode(String),

    #[error("Node {0} already exists")]
    DuplicateNode(String),

    #[error("Edge {from} -> {to} ({handle}) already exists")]
    DuplicateEdge {
        from: String,
        to: String,
        handle: String,
    },

    #[error("Edge {0} already exists")]
    DuplicateEdgeId(String),

    #[error("Edges leaving conditional node {0} need a yes/no handle")]
    MissingBranchHandle(String),

    #[error("Cannot apply a {patch} patch to {node_id} ({kind})")]
    KindMismatch {
        node_id: String,
        kind: NodeKind,
        patch: NodeKind,
    },

    #[error("No pending action with id {0}")]
    UnknownAction(u64),
}
