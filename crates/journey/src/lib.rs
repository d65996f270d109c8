//! Nurture flow builder: the graph model for multi-stage nurturing
//! campaigns, the reducer that mutates it, pre-submission validation and the
//! visual/structural serializers consumed by the backend scheduler.

pub mod builder;
pub mod error;
pub mod serializer;
pub mod types;
pub mod validator;

pub use builder::{reduce, ActionId, BuilderAction, FlowBuilder};
pub use error::GraphError;
pub use serializer::{
    build_flow_configuration, build_structure_config, build_visual_config,
    load_flow_configuration, FlowConfiguration, StructureConfig, VisualConfig,
};
pub use types::{Edge, FlowBuilderState, Node, NodeData, NodeKind};
pub use validator::{validate_flow, ValidationResult};
