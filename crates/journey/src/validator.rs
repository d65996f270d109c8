//! Pre-submission checks. Errors block publishing; warnings are advisory.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ComparisonOperator, FlowBuilderState, NodeData, NodeKind};

/// Outcome of [`validate_flow`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Inspects the aggregate. Pure; safe to call before every submission.
pub fn validate_flow(state: &FlowBuilderState) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if state.flow_name.trim().is_empty() {
        errors.push("Flow name is required".to_string());
    }

    let mut stage_count = 0usize;
    let mut condition_count = 0usize;
    for node in &state.nodes {
        match &node.data {
            NodeData::Stage(stage) => {
                stage_count += 1;
                if !stage.has_content() {
                    errors.push(format!(
                        "Stage {} has no content: select a template or write the message inline",
                        stage_count
                    ));
                }
            }
            NodeData::Conditional(cond) => {
                condition_count += 1;
                if cond.condition.check_param.trim().is_empty() {
                    errors.push(format!("Condition {} has no metric to check", condition_count));
                }
                if cond.condition.operator == ComparisonOperator::Between
                    && cond.condition.value_to.is_none()
                {
                    errors.push(format!(
                        "Condition {} uses 'between' without an upper bound",
                        condition_count
                    ));
                }
            }
            _ => {}
        }
    }

    if stage_count == 0 {
        errors.push("The flow needs at least one stage".to_string());
    }

    let initial_count = state.nodes_of_kind(NodeKind::Initial).count();
    if initial_count > 0 && state.edges.is_empty() {
        warnings.push("The flow has no connections between nodes".to_string());
    }
    match initial_count {
        0 => warnings.push("The flow has no initial node".to_string()),
        1 => {}
        n => warnings.push(format!("The flow has {} initial nodes; only the first is used", n)),
    }
    if state.nodes_of_kind(NodeKind::End).next().is_none() {
        warnings.push("The flow has no end node".to_string());
    }
    if state.selected_prospectos.is_empty() {
        warnings.push("No prospects selected".to_string());
    }

    let result = ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    };
    debug!(
        is_valid = result.is_valid,
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "Validated flow"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ConditionalData, ContentSource, Edge, EndData, FlowCondition, InitialData, Node, Position,
        StageData,
    };

    fn node(id: &str, data: NodeData) -> Node {
        Node::new(id, Position::default(), data)
    }

    fn stage_with(content: Option<ContentSource>) -> NodeData {
        NodeData::Stage(StageData {
            content,
            ..Default::default()
        })
    }

    #[test]
    fn test_stage_without_content_is_reported_by_order() {
        let state = FlowBuilderState {
            flow_name: "Reminder".into(),
            nodes: vec![node("stage-a", stage_with(None))],
            ..Default::default()
        };
        let result = validate_flow(&state);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Stage 1"));
    }

    #[test]
    fn test_second_stage_index() {
        let state = FlowBuilderState {
            flow_name: "Reminder".into(),
            nodes: vec![
                node(
                    "stage-a",
                    stage_with(Some(ContentSource::Template {
                        template_id: "tpl-1".into(),
                    })),
                ),
                node(
                    "stage-b",
                    stage_with(Some(ContentSource::Inline {
                        subject: None,
                        body: "".into(),
                    })),
                ),
            ],
            ..Default::default()
        };
        let result = validate_flow(&state);
        assert_eq!(result.errors, vec![
            "Stage 2 has no content: select a template or write the message inline".to_string()
        ]);
    }

    #[test]
    fn test_empty_flow_errors() {
        let result = validate_flow(&FlowBuilderState {
            flow_name: "   ".into(),
            ..Default::default()
        });
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("name")));
        assert!(result.errors.iter().any(|e| e.contains("at least one stage")));
    }

    #[test]
    fn test_warnings_do_not_block() {
        let state = FlowBuilderState {
            flow_name: "Welcome".into(),
            nodes: vec![
                node("initial-1", NodeData::Initial(InitialData::default())),
                node(
                    "stage-1",
                    stage_with(Some(ContentSource::Inline {
                        subject: Some("Hi".into()),
                        body: "Welcome aboard".into(),
                    })),
                ),
            ],
            ..Default::default()
        };
        let result = validate_flow(&state);
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("no connections")));
        assert!(result.warnings.iter().any(|w| w.contains("No prospects")));
        assert!(result.warnings.iter().any(|w| w.contains("no end node")));
    }

    #[test]
    fn test_conditional_metric_required() {
        let mut state = FlowBuilderState {
            flow_name: "Branchy".into(),
            nodes: vec![
                node("stage-1", stage_with(Some(ContentSource::Template { template_id: "t".into() }))),
                node("cond-1", NodeData::Conditional(ConditionalData::default())),
                node("end-1", NodeData::End(EndData::default())),
            ],
            ..Default::default()
        };
        state.edges.push(Edge::connect("stage-1", "cond-1", None));
        let result = validate_flow(&state);
        assert!(result.errors.iter().any(|e| e.contains("Condition 1")));

        if let NodeData::Conditional(c) = &mut state.nodes[1].data {
            c.condition = FlowCondition {
                check_param: "email_opens".into(),
                operator: ComparisonOperator::Between,
                value: 1.0,
                value_to: None,
                label: "Opened 1-3 times".into(),
            };
        }
        let result = validate_flow(&state);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("upper bound"));
    }
}
