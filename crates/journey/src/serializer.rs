//! Projections of the builder aggregate.
//!
//! * The visual config mirrors nodes and edges 1:1 so the editor can be
//!   rebuilt later.
//! * The structure config is what the backend scheduler executes: stages,
//!   typed conditions, yes/no branch records, the entry node, terminal nodes
//!   and a successor map.
//!
//! None of the functions here mutate their input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{
    BranchHandle, Channel, ContentSource, DistributionConfig, Edge, FlowBuilderState,
    FlowCondition, Node, NodeData,
};

/// Wait time (days) written for stages that never set one.
pub const DEFAULT_WAIT_TIME: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualConfig {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Discriminator telling the backend where a stage's content lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlantillaType {
    Reference,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineContent {
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
}

/// Executable description of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureStage {
    pub id: String,
    /// 1-based position among the stages, in graph order.
    pub order: u32,
    pub label: String,
    pub channel: Channel,
    pub wait_time: u32,
    pub condition_check_delay: Option<u32>,
    pub plantilla_type: Option<PlantillaType>,
    pub plantilla_id: Option<String>,
    pub plantilla_inline: Option<InlineContent>,
    pub offer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureCondition {
    pub id: String,
    /// Label of the conditional node itself.
    pub name: String,
    #[serde(flatten)]
    pub condition: FlowCondition,
}

/// Yes/no successors of one conditional node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub condition_node_id: String,
    pub condition: FlowCondition,
    pub true_stage_ids: Vec<String>,
    pub false_stage_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndNodeRecord {
    pub id: String,
    pub label: String,
    pub description: String,
}

/// Backend-executable, graph-order-independent form of a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureConfig {
    pub stages: Vec<StructureStage>,
    pub conditions: Vec<StructureCondition>,
    pub branches: Vec<Branch>,
    pub initial_node: Option<String>,
    pub end_nodes: Vec<EndNodeRecord>,
    /// Direct successors of every node, keyed by node id.
    pub node_map: BTreeMap<String, Vec<String>>,
}

/// Everything handed to the persistence collaborator for one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfiguration {
    pub name: String,
    pub description: String,
    pub tipo_deudor: Option<String>,
    pub origin_id: Option<String>,
    /// Selected prospects, sorted.
    pub prospect_ids: Vec<String>,
    pub distribution: DistributionConfig,
    pub visual_config: VisualConfig,
    pub structure_config: StructureConfig,
}

/// Maps nodes and edges 1:1 into a storage-friendly shape.
pub fn build_visual_config(state: &FlowBuilderState) -> VisualConfig {
    VisualConfig {
        nodes: state.nodes.clone(),
        edges: state.edges.clone(),
    }
}

/// Builds the backend-executable structure.
pub fn build_structure_config(state: &FlowBuilderState) -> StructureConfig {
    let mut config = StructureConfig::default();

    for node in &state.nodes {
        match &node.data {
            NodeData::Stage(stage) => {
                let (plantilla_type, plantilla_id, plantilla_inline) = match &stage.content {
                    Some(ContentSource::Template { template_id }) => {
                        (Some(PlantillaType::Reference), Some(template_id.clone()), None)
                    }
                    Some(ContentSource::Inline { subject, body }) => (
                        Some(PlantillaType::Inline),
                        None,
                        Some(InlineContent {
                            subject: subject.clone(),
                            body: body.clone(),
                        }),
                    ),
                    None => (None, None, None),
                };
                config.stages.push(StructureStage {
                    id: node.id.clone(),
                    order: config.stages.len() as u32 + 1,
                    label: stage.label.clone(),
                    channel: stage.channel.unwrap_or_default(),
                    wait_time: stage.wait_time.unwrap_or(DEFAULT_WAIT_TIME),
                    condition_check_delay: stage.condition_check_delay,
                    plantilla_type,
                    plantilla_id,
                    plantilla_inline,
                    offer_id: stage.offer_id.clone(),
                });
            }
            NodeData::Conditional(cond) => {
                config.conditions.push(StructureCondition {
                    id: node.id.clone(),
                    name: cond.label.clone(),
                    condition: cond.condition.clone(),
                });

                let mut true_stage_ids = Vec::new();
                let mut false_stage_ids = Vec::new();
                for edge in state.outgoing(&node.id) {
                    match edge.source_handle {
                        Some(BranchHandle::Yes) => true_stage_ids.push(edge.target.clone()),
                        Some(BranchHandle::No) => false_stage_ids.push(edge.target.clone()),
                        None => {}
                    }
                }
                config.branches.push(Branch {
                    condition_node_id: node.id.clone(),
                    condition: cond.condition.clone(),
                    true_stage_ids,
                    false_stage_ids,
                });
            }
            NodeData::Initial(_) => {
                if config.initial_node.is_none() {
                    config.initial_node = Some(node.id.clone());
                }
            }
            NodeData::End(end) => config.end_nodes.push(EndNodeRecord {
                id: node.id.clone(),
                label: end.label.clone(),
                description: end.description.clone(),
            }),
            NodeData::Offer(_) => {}
        }

        let successors = state.outgoing(&node.id).map(|e| e.target.clone()).collect();
        config.node_map.insert(node.id.clone(), successors);
    }

    debug!(
        stages = config.stages.len(),
        conditions = config.conditions.len(),
        end_nodes = config.end_nodes.len(),
        "Built structure config"
    );
    config
}

/// Combines metadata and both projections into one persistable object.
pub fn build_flow_configuration(state: &FlowBuilderState) -> FlowConfiguration {
    let mut prospect_ids: Vec<String> = state.selected_prospectos.iter().cloned().collect();
    prospect_ids.sort();

    FlowConfiguration {
        name: state.flow_name.clone(),
        description: state.flow_description.clone(),
        tipo_deudor: state.tipo_deudor.clone(),
        origin_id: state.selected_origin_id.clone(),
        prospect_ids,
        distribution: state.distribution_config.clone(),
        visual_config: build_visual_config(state),
        structure_config: build_structure_config(state),
    }
}

/// Rebuilds an editable aggregate from a saved configuration. The structure
/// projection is derived data and is ignored.
pub fn load_flow_configuration(config: &FlowConfiguration) -> FlowBuilderState {
    FlowBuilderState {
        nodes: config.visual_config.nodes.clone(),
        edges: config.visual_config.edges.clone(),
        flow_name: config.name.clone(),
        flow_description: config.description.clone(),
        tipo_deudor: config.tipo_deudor.clone(),
        selected_origin_id: config.origin_id.clone(),
        selected_prospectos: config.prospect_ids.iter().cloned().collect(),
        distribution_config: config.distribution.clone(),
    }
}
