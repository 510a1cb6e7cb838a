use serde::{Deserialize, Serialize};

use crate::error::{Result, SwarmError};

/// The full identity of an agent conversation.
///
/// `agent_role` selects behavioural configuration (prompt, allowed tools),
/// `agent_id` names one conversation under that role, and `repo_url`
/// namespaces all state so the same role+id can run concurrently against
/// different repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentKey {
    pub agent_role: String,
    pub agent_id: String,
    pub repo_url: String,
}

impl AgentKey {
    pub fn new(
        agent_role: impl Into<String>,
        agent_id: impl Into<String>,
        repo_url: impl Into<String>,
    ) -> Self {
        Self {
            agent_role: agent_role.into(),
            agent_id: agent_id.into(),
            repo_url: repo_url.into(),
        }
    }

    /// The `(role, id)` pair used by the spawn graph, where repo scoping
    /// does not apply.
    pub fn pair(&self) -> (String, String) {
        (self.agent_role.clone(), self.agent_id.clone())
    }

    /// Short alias used by graph emitters: `{role}_{id[:8]}`.
    pub fn alias(&self) -> String {
        let short: String = self.agent_id.chars().take(8).collect();
        format!("{}_{}", self.agent_role, short)
    }
}

impl std::fmt::Display for AgentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.agent_role, self.agent_id, self.repo_url)
    }
}

/// Derive a deterministic agent id from the initiating user prompt.
///
/// The system never fabricates ids server-side; when the caller does not
/// supply one, the id is the hex MD5 of the trimmed prompt so retries of
/// the same task land on the same conversation.
pub fn agent_id_for_prompt(prompt: &str) -> String {
    format!("{:x}", md5::compute(prompt.trim().as_bytes()))
}

/// Role tag of a single conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::Developer => "developer",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "developer" => Ok(MessageRole::Developer),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(SwarmError::InvalidValue {
                what: "message role",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one tool invocation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Failure,
    Error,
    Rejected,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Failure => "failure",
            ToolStatus::Error => "error",
            ToolStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ToolStatus {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(ToolStatus::Success),
            "failure" => Ok(ToolStatus::Failure),
            "error" => Ok(ToolStatus::Error),
            "rejected" => Ok(ToolStatus::Rejected),
            other => Err(SwarmError::InvalidValue {
                what: "tool status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tool rule governing duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreservationPolicy {
    OneTime,
    UntilBuild,
    UntilUpdate,
    OneOf,
    Always,
    Build,
}

impl PreservationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreservationPolicy::OneTime => "one-time",
            PreservationPolicy::UntilBuild => "until-build",
            PreservationPolicy::UntilUpdate => "until-update",
            PreservationPolicy::OneOf => "one-of",
            PreservationPolicy::Always => "always",
            PreservationPolicy::Build => "build",
        }
    }
}

impl std::str::FromStr for PreservationPolicy {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one-time" => Ok(PreservationPolicy::OneTime),
            "until-build" => Ok(PreservationPolicy::UntilBuild),
            "until-update" => Ok(PreservationPolicy::UntilUpdate),
            "one-of" => Ok(PreservationPolicy::OneOf),
            "always" => Ok(PreservationPolicy::Always),
            "build" => Ok(PreservationPolicy::Build),
            other => Err(SwarmError::InvalidValue {
                what: "preservation policy",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for PreservationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared side-effect class of a tool.
///
/// `run_bash` is special-cased by the dedup scan as always mutating
/// regardless of its declared kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    #[default]
    ReadOnly,
    Mutating,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::ReadOnly => "read-only",
            ToolKind::Mutating => "mutating",
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self, ToolKind::Mutating)
    }
}

impl std::str::FromStr for ToolKind {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read-only" | "read_only" | "readonly" => Ok(ToolKind::ReadOnly),
            "mutating" => Ok(ToolKind::Mutating),
            other => Err(SwarmError::InvalidValue {
                what: "tool kind",
                value: other.to_string(),
            }),
        }
    }
}

/// How the model is told to pick tools; passed through to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
    Named(String),
}

impl ToolChoice {
    /// Parse the configured value: `auto`, `required`, or a tool name.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => ToolChoice::Auto,
            "required" => ToolChoice::Required,
            _ => ToolChoice::Named(s.trim().to_string()),
        }
    }

    /// Provider-payload encoding: a bare string for the modes, a function
    /// selector object for an explicit tool name.
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            ToolChoice::Auto => serde_json::Value::String("auto".into()),
            ToolChoice::Required => serde_json::Value::String("required".into()),
            ToolChoice::Named(name) => serde_json::json!({
                "type": "function",
                "function": { "name": name },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn agent_id_is_stable_for_same_prompt() {
        let a = agent_id_for_prompt("Please echo this back.");
        let b = agent_id_for_prompt("  Please echo this back.  ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn policy_roundtrip() {
        for p in [
            PreservationPolicy::OneTime,
            PreservationPolicy::UntilBuild,
            PreservationPolicy::UntilUpdate,
            PreservationPolicy::OneOf,
            PreservationPolicy::Always,
            PreservationPolicy::Build,
        ] {
            assert_eq!(PreservationPolicy::from_str(p.as_str()).unwrap(), p);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(ToolStatus::from_str("pending").is_err());
    }

    #[test]
    fn tool_choice_parse() {
        assert_eq!(ToolChoice::parse("auto"), ToolChoice::Auto);
        assert_eq!(ToolChoice::parse("required"), ToolChoice::Required);
        assert_eq!(
            ToolChoice::parse("read_file"),
            ToolChoice::Named("read_file".into())
        );
    }

    #[test]
    fn alias_truncates_long_ids() {
        let key = AgentKey::new("worker", "bbbbbbbbbbbb", "repo");
        assert_eq!(key.alias(), "worker_bbbbbbbb");
    }
}
