//! Transforms stored history into the outbound provider payload.

use std::collections::HashMap;

use swarm_registry::ToolSpec;
use swarm_store::Turn;

/// Flatten every message of every turn, in order, into wire form.
/// Tool messages are passed through unchanged (role `tool`), and each
/// provider-specific extra field is preserved via the raw message.
pub fn outbound_messages(history: &[Turn]) -> Vec<serde_json::Value> {
    history
        .iter()
        .flat_map(|turn| turn.messages.iter().map(|m| m.outbound()))
        .collect()
}

/// Project the catalog to the role's allowed set, in the allowed-list
/// order, as `{type: function, function: {…}}` entries.
pub fn tools_metadata(
    tools: &HashMap<String, ToolSpec>,
    allowed: &[String],
) -> Vec<serde_json::Value> {
    allowed
        .iter()
        .filter_map(|name| tools.get(name))
        .map(|spec| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.schema,
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::{MessageRole, PreservationPolicy, ToolKind};
    use swarm_store::Message;

    #[test]
    fn raw_messages_pass_through_unchanged() {
        let mut turn = Turn::new(0);
        turn.push_message(
            Message::new(MessageRole::Tool, "result", 0).with_raw(serde_json::json!({
                "role": "tool",
                "tool_call_id": "call_1",
                "content": "result",
            })),
        );
        turn.push_message(Message::new(MessageRole::User, "hi", 1));

        let out = outbound_messages(&[turn]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["tool_call_id"], "call_1");
        assert_eq!(out[1], serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn metadata_respects_allowed_order_and_set() {
        let mut tools = HashMap::new();
        for name in ["echo", "read_file", "write_file"] {
            tools.insert(
                name.to_string(),
                ToolSpec {
                    name: name.to_string(),
                    description: String::new(),
                    schema: serde_json::json!({"type": "object"}),
                    kind: ToolKind::ReadOnly,
                    preservation_policy: PreservationPolicy::Always,
                },
            );
        }
        let allowed = vec!["read_file".to_string(), "echo".to_string(), "ghost".to_string()];
        let meta = tools_metadata(&tools, &allowed);
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[0]["function"]["name"], "read_file");
        assert_eq!(meta[1]["function"]["name"], "echo");
        assert_eq!(meta[0]["type"], "function");
    }
}
