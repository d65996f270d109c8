//! Reading flow drafts from disk.

use std::path::Path;

use anyhow::Context;
use serde_json::Value;

use nurture_journey::{load_flow_configuration, FlowBuilderState, FlowConfiguration};

/// Accepts either a saved `FlowConfiguration` or a raw builder state.
pub fn parse_draft(raw: &str) -> anyhow::Result<FlowBuilderState> {
    let value: Value = serde_json::from_str(raw).context("draft is not valid JSON")?;
    if value.get("visual_config").is_some() {
        let config: FlowConfiguration =
            serde_json::from_value(value).context("malformed flow configuration")?;
        Ok(load_flow_configuration(&config))
    } else {
        serde_json::from_value(value).context("malformed builder state")
    }
}

pub fn read_draft(path: &Path) -> anyhow::Result<FlowBuilderState> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_draft(&raw).with_context(|| format!("in {}", path.display()))
}

/// Key used to serialize submissions of the same draft file.
pub fn draft_key(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
