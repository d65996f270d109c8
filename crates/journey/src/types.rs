use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GraphError;

/// Kind of a node in the flow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Initial,
    Stage,
    Conditional,
    End,
    Offer,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Initial => "initial",
            NodeKind::Stage => "stage",
            NodeKind::Conditional => "conditional",
            NodeKind::End => "end",
            NodeKind::Offer => "offer",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generates a globally unique node id, prefixed with the node kind
/// (e.g. `stage-3f2a9c1b7e04`).
pub fn new_node_id(kind: NodeKind) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", kind, &suffix[..12])
}

/// Generates an edge id from its endpoints and handle.
pub fn edge_id(source: &str, target: &str, handle: Option<BranchHandle>) -> String {
    match handle {
        Some(h) => format!("e-{}-{}-{}", source, h.as_str(), target),
        None => format!("e-{}-{}", source, target),
    }
}

/// Canvas coordinates; only the editor reads them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A node of the flow graph. On the wire the kind travels as `type` next to
/// its `data`, and is always derived from the data variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub position: Position,
    #[serde(flatten)]
    pub data: NodeData,
}

impl Node {
    pub fn new(id: impl Into<String>, position: Position, data: NodeData) -> Self {
        Self {
            id: id.into(),
            position,
            data,
        }
    }

    /// Builds a node with a freshly generated id.
    pub fn with_generated_id(position: Position, data: NodeData) -> Self {
        let id = new_node_id(data.kind());
        Self::new(id, position, data)
    }

    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }
}

/// Per-kind node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NodeData {
    Initial(InitialData),
    Stage(StageData),
    Conditional(ConditionalData),
    End(EndData),
    Offer(OfferData),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Initial(_) => NodeKind::Initial,
            NodeData::Stage(_) => NodeKind::Stage,
            NodeData::Conditional(_) => NodeKind::Conditional,
            NodeData::End(_) => NodeKind::End,
            NodeData::Offer(_) => NodeKind::Offer,
        }
    }
}

/// Entry point of the flow: where the prospects come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub origin_id: Option<String>,
    #[serde(default)]
    pub prospect_count: u32,
}

/// Delivery channel of a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Email,
    Sms,
    Both,
}

/// Where a stage's message comes from. A stage holds at most one source, so
/// picking a template drops any inline text and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ContentSource {
    Template {
        template_id: String,
    },
    Inline {
        #[serde(default)]
        subject: Option<String>,
        body: String,
    },
}

impl ContentSource {
    /// A template with an empty id or inline text that is only whitespace
    /// does not count as content.
    pub fn is_present(&self) -> bool {
        match self {
            ContentSource::Template { template_id } => !template_id.trim().is_empty(),
            ContentSource::Inline { body, .. } => !body.trim().is_empty(),
        }
    }
}

/// A message-sending step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub channel: Option<Channel>,
    /// Days to wait before the stage runs.
    #[serde(default)]
    pub wait_time: Option<u32>,
    /// Hours to wait after sending before downstream conditions are checked.
    #[serde(default)]
    pub condition_check_delay: Option<u32>,
    #[serde(default)]
    pub content: Option<ContentSource>,
    #[serde(default)]
    pub offer_id: Option<String>,
}

impl StageData {
    pub fn has_content(&self) -> bool {
        self.content.as_ref().is_some_and(ContentSource::is_present)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    #[default]
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Between,
}

/// A metric test evaluated by the backend. `check_param` is a backend-defined
/// metric name (opens, clicks, bounces, ...) and is passed through as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowCondition {
    pub check_param: String,
    #[serde(default)]
    pub operator: ComparisonOperator,
    #[serde(default)]
    pub value: f64,
    /// Upper bound, only meaningful for `between`.
    #[serde(default)]
    pub value_to: Option<f64>,
    #[serde(default)]
    pub label: String,
}

fn default_yes_label() -> String {
    "yes".to_string()
}
fn default_no_label() -> String {
    "no".to_string()
}

/// A branch point with a `yes` and a `no` exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalData {
    #[serde(default)]
    pub label: String,
    pub condition: FlowCondition,
    #[serde(default = "default_yes_label")]
    pub yes_label: String,
    #[serde(default = "default_no_label")]
    pub no_label: String,
}

impl Default for ConditionalData {
    fn default() -> Self {
        Self {
            label: String::new(),
            condition: FlowCondition::default(),
            yes_label: default_yes_label(),
            no_label: default_no_label(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// Annotation linking an offer to the canvas; not part of the executable
/// structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferData {
    pub offer_id: String,
    #[serde(default)]
    pub label: String,
}

/// Which exit of a conditional node an edge leaves from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchHandle {
    Yes,
    No,
}

impl BranchHandle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchHandle::Yes => "yes",
            BranchHandle::No => "no",
        }
    }
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<BranchHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    /// Builds an edge whose id is derived from its endpoints.
    pub fn connect(
        source: impl Into<String>,
        target: impl Into<String>,
        source_handle: Option<BranchHandle>,
    ) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: edge_id(&source, &target, source_handle),
            source,
            target,
            source_handle,
            label: source_handle.map(|h| h.as_str().to_string()),
        }
    }

    /// True when both edges describe the same `(source, target, handle)`.
    pub fn same_link(&self, other: &Edge) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.source_handle == other.source_handle
    }
}

/// Batching of each stage's send-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
}

fn default_batch_size() -> u32 {
    100
}
fn default_interval_minutes() -> u32 {
    15
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: default_batch_size(),
            interval_minutes: default_interval_minutes(),
        }
    }
}

/// The single mutable aggregate edited by the flow builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowBuilderState {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub flow_name: String,
    #[serde(default)]
    pub flow_description: String,
    /// Debtor segment the flow targets.
    #[serde(default)]
    pub tipo_deudor: Option<String>,
    #[serde(default)]
    pub selected_origin_id: Option<String>,
    #[serde(default)]
    pub selected_prospectos: HashSet<String>,
    #[serde(default)]
    pub distribution_config: DistributionConfig,
}

impl FlowBuilderState {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind() == kind)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.source == id)
    }
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// A shallow, per-kind partial update. `None` leaves a field untouched;
/// nullable fields use `Some(None)` to clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodePatch {
    Initial {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        origin_id: Option<Option<String>>,
        #[serde(default)]
        prospect_count: Option<u32>,
    },
    Stage {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        channel: Option<Channel>,
        #[serde(default)]
        wait_time: Option<u32>,
        #[serde(default)]
        condition_check_delay: Option<u32>,
        #[serde(default)]
        content: Option<Option<ContentSource>>,
        #[serde(default)]
        offer_id: Option<Option<String>>,
    },
    Conditional {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        condition: Option<FlowCondition>,
        #[serde(default)]
        yes_label: Option<String>,
        #[serde(default)]
        no_label: Option<String>,
    },
    End {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    Offer {
        #[serde(default)]
        offer_id: Option<String>,
        #[serde(default)]
        label: Option<String>,
    },
}

impl NodePatch {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodePatch::Initial { .. } => NodeKind::Initial,
            NodePatch::Stage { .. } => NodeKind::Stage,
            NodePatch::Conditional { .. } => NodeKind::Conditional,
            NodePatch::End { .. } => NodeKind::End,
            NodePatch::Offer { .. } => NodeKind::Offer,
        }
    }

    /// Patch that selects a saved template, clearing inline content.
    pub fn stage_template(template_id: impl Into<String>) -> Self {
        Self::stage_content(ContentSource::Template {
            template_id: template_id.into(),
        })
    }

    /// Patch that writes inline content, clearing any template reference.
    pub fn stage_inline(subject: Option<String>, body: impl Into<String>) -> Self {
        Self::stage_content(ContentSource::Inline {
            subject,
            body: body.into(),
        })
    }

    fn stage_content(content: ContentSource) -> Self {
        NodePatch::Stage {
            label: None,
            channel: None,
            wait_time: None,
            condition_check_delay: None,
            content: Some(Some(content)),
            offer_id: None,
        }
    }

    /// Merges this patch into `node`'s data.
    pub fn apply_to(self, node: &mut Node) -> Result<(), GraphError> {
        let kind = node.kind();
        match (self, &mut node.data) {
            (
                NodePatch::Initial {
                    label,
                    origin_id,
                    prospect_count,
                },
                NodeData::Initial(d),
            ) => {
                set(&mut d.label, label);
                set(&mut d.origin_id, origin_id);
                set(&mut d.prospect_count, prospect_count);
            }
            (
                NodePatch::Stage {
                    label,
                    channel,
                    wait_time,
                    condition_check_delay,
                    content,
                    offer_id,
                },
                NodeData::Stage(d),
            ) => {
                set(&mut d.label, label);
                if channel.is_some() {
                    d.channel = channel;
                }
                if wait_time.is_some() {
                    d.wait_time = wait_time;
                }
                if condition_check_delay.is_some() {
                    d.condition_check_delay = condition_check_delay;
                }
                set(&mut d.content, content);
                set(&mut d.offer_id, offer_id);
            }
            (
                NodePatch::Conditional {
                    label,
                    condition,
                    yes_label,
                    no_label,
                },
                NodeData::Conditional(d),
            ) => {
                set(&mut d.label, label);
                set(&mut d.condition, condition);
                set(&mut d.yes_label, yes_label);
                set(&mut d.no_label, no_label);
            }
            (NodePatch::End { label, description }, NodeData::End(d)) => {
                set(&mut d.label, label);
                set(&mut d.description, description);
            }
            (NodePatch::Offer { offer_id, label }, NodeData::Offer(d)) => {
                set(&mut d.offer_id, offer_id);
                set(&mut d.label, label);
            }
            (patch, _) => {
                return Err(GraphError::KindMismatch {
                    node_id: node.id.clone(),
                    kind,
                    patch: patch.kind(),
                })
            }
        }
        Ok(())
    }
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *field = v;
    }
}
