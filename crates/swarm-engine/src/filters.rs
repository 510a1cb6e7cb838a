//! Per-tool metadata filters, run after a tool turn is built.
//!
//! A filter inspects the turn and may write fields into the
//! conversation-level metadata object (e.g. the fetch-issues filter
//! lifts the issue title out of the arguments so later dispatches can
//! carry it).

use std::collections::HashMap;

use swarm_store::Turn;

pub type MetadataObject = serde_json::Map<String, serde_json::Value>;
pub type MetadataFilter = fn(&Turn, &mut MetadataObject);

/// Registry of filters keyed by tool name.
#[derive(Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Vec<MetadataFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in filter set.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("fetch_issues", fetch_issues_filter);
        registry
    }

    pub fn register(&mut self, tool_name: impl Into<String>, filter: MetadataFilter) {
        self.filters.entry(tool_name.into()).or_default().push(filter);
    }

    /// Run every filter registered for this turn's tool, if any.
    pub fn apply(&self, turn: &Turn, metadata: &mut MetadataObject) {
        let Some(tool_name) = turn.tool_meta.as_ref().map(|tm| tm.tool_name.as_str()) else {
            return;
        };
        let Some(filters) = self.filters.get(tool_name) else {
            return;
        };
        for filter in filters {
            filter(turn, metadata);
        }
    }
}

/// Lift `title` and `users`/`assignees` from fetch-issues arguments into
/// the conversation metadata.
fn fetch_issues_filter(turn: &Turn, metadata: &mut MetadataObject) {
    let Some(args) = turn.tool_meta.as_ref().map(|tm| &tm.input_args) else {
        return;
    };
    if let Some(title) = args.get("title").and_then(|v| v.as_str()) {
        metadata.insert("issue_title".into(), serde_json::json!(title));
    }
    let users = args.get("users").or_else(|| args.get("assignees"));
    if let Some(users) = users.filter(|v| !v.is_null()) {
        metadata.insert("issue_assignees".into(), users.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_store::ToolMeta;

    fn issue_turn(args: serde_json::Value) -> Turn {
        let mut turn = Turn::new(3);
        let mut tm = ToolMeta::new("fetch_issues");
        tm.input_args = args;
        turn.tool_meta = Some(tm);
        turn
    }

    #[test]
    fn fetch_issues_extracts_title_and_assignees() {
        let registry = FilterRegistry::with_defaults();
        let turn = issue_turn(serde_json::json!({
            "title": "Build broken on main",
            "assignees": ["alice"],
        }));
        let mut metadata = MetadataObject::new();
        registry.apply(&turn, &mut metadata);
        assert_eq!(metadata["issue_title"], "Build broken on main");
        assert_eq!(metadata["issue_assignees"], serde_json::json!(["alice"]));
    }

    #[test]
    fn unrelated_tools_leave_metadata_alone() {
        let registry = FilterRegistry::with_defaults();
        let mut turn = issue_turn(serde_json::json!({"title": "x"}));
        turn.tool_meta.as_mut().unwrap().tool_name = "read_file".into();
        let mut metadata = MetadataObject::new();
        registry.apply(&turn, &mut metadata);
        assert!(metadata.is_empty());
    }
}
