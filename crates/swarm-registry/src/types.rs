use serde::{Deserialize, Deserializer, Serialize};

use swarm_core::{PreservationPolicy, ToolKind};

/// Behavioural configuration of one agent role, as served by the
/// agent-manager registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    pub agent_role: String,
    #[serde(default)]
    pub agent_description: String,
    /// The registry sometimes returns this as a JSON-encoded string
    /// rather than a list; both forms are accepted.
    #[serde(deserialize_with = "list_or_json_string")]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub default_developer_prompt: String,
    #[serde(default, deserialize_with = "none_when_blank")]
    pub model_name: Option<String>,
    #[serde(default, deserialize_with = "none_when_blank")]
    pub reasoning_level: Option<String>,
    #[serde(default, deserialize_with = "none_when_blank")]
    pub tool_choice: Option<String>,
}

/// One entry of the tool catalog: everything the engine needs to project
/// tools metadata and run the dedup scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_schema")]
    pub schema: serde_json::Value,
    #[serde(default, rename = "type")]
    pub kind: ToolKind,
    #[serde(default = "default_policy")]
    pub preservation_policy: PreservationPolicy,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({})
}

fn default_policy() -> PreservationPolicy {
    PreservationPolicy::Always
}

fn list_or_json_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        Json(String),
    }

    match ListOrString::deserialize(deserializer)? {
        ListOrString::List(list) => Ok(list),
        ListOrString::Json(s) => {
            serde_json::from_str::<Vec<String>>(&s).map_err(serde::de::Error::custom)
        }
    }
}

fn none_when_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
