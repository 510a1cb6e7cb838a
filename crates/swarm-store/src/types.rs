use serde::{Deserialize, Serialize};

use swarm_core::{MessageRole, PreservationPolicy, ToolStatus};

/// A role-tagged content block belonging to exactly one turn.
///
/// `raw` carries the provider's message verbatim (tool-call blocks,
/// reasoning fields, anything not modeled as a column) so the outbound
/// history can replay it unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    /// RFC3339 emission timestamp.
    pub timestamp: String,
    /// Monotonic per conversation, stable across re-persistence.
    pub original_message_id: i64,
    pub char_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl Message {
    /// Build a plain message with a fresh timestamp.
    pub fn new(role: MessageRole, content: impl Into<String>, original_message_id: i64) -> Self {
        let content = content.into();
        Self {
            role,
            char_count: content.chars().count() as i64,
            content,
            timestamp: chrono::Utc::now().to_rfc3339(),
            original_message_id,
            raw: None,
        }
    }

    /// Same as [`Message::new`] but preserving the provider's raw form.
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// The wire form sent back to the provider: the preserved raw message
    /// when present, else a minimal `{role, content}` object.
    pub fn outbound(&self) -> serde_json::Value {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => serde_json::json!({
                "role": self.role.as_str(),
                "content": self.content,
            }),
        }
    }
}

/// Tool-invocation record, present exactly when a turn is a tool turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMeta {
    pub tool_name: String,
    /// Wall-clock seconds the invocation took.
    pub execution_time: f64,
    pub pending_deletion: bool,
    pub deleted: bool,
    /// Rejection reason; `Some` marks the turn as rejected by dedup.
    pub rejection: Option<String>,
    pub status: Option<ToolStatus>,
    /// Compact base64 MD5 of the normalised argument blob; empty when the
    /// arguments are blank or `{}`.
    pub args_hash: String,
    pub preservation_policy: Option<PreservationPolicy>,
    pub normalized_args: serde_json::Value,
    /// Lowercased canonical file key extracted from the arguments, or
    /// empty when not applicable.
    pub normalized_filename: String,
    pub input_args: serde_json::Value,
}

impl ToolMeta {
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            execution_time: 0.0,
            pending_deletion: false,
            deleted: false,
            rejection: None,
            status: None,
            args_hash: String::new(),
            preservation_policy: None,
            normalized_args: serde_json::Value::Object(Default::default()),
            normalized_filename: String::new(),
            input_args: serde_json::Value::Object(Default::default()),
        }
    }

    /// A tool turn counts for dedup scans only when it was neither
    /// rejected nor (pending-)deleted.
    pub fn is_live(&self) -> bool {
        self.rejection.is_none() && !self.deleted && !self.pending_deletion
    }
}

/// The atomic unit of conversation progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_idx: i64,
    pub total_char_count: i64,
    /// A finalized turn is safe to persist and terminates the engine loop.
    pub finalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns_to_purge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_meta: Option<ToolMeta>,
    pub messages: Vec<Message>,
}

impl Turn {
    pub fn new(turn_idx: i64) -> Self {
        Self {
            turn_idx,
            total_char_count: 0,
            finalized: false,
            invocation_reason: None,
            turns_to_purge: None,
            tool_meta: None,
            messages: Vec::new(),
        }
    }

    /// Append a message and keep the running char count current.
    pub fn push_message(&mut self, message: Message) {
        self.total_char_count += message.char_count;
        self.messages.push(message);
    }

    /// First message with the given role, if any.
    pub fn message_with_role(&self, role: MessageRole) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == role)
    }

    fn has_tool_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == MessageRole::Tool)
    }

    /// True when this turn is a live tool turn with an actual tool
    /// message, the only kind the dedup scan looks at.
    pub fn is_live_tool_turn(&self) -> bool {
        self.tool_meta.as_ref().is_some_and(|tm| tm.is_live()) && self.has_tool_message()
    }
}

/// One entry of the external invocation log consulted by the
/// `until-build` preservation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub tool_name: String,
    pub status: String,
    pub args_hash: String,
    pub turn: i64,
}

/// Filters for [`crate::ConversationStore::query_turns`]. A `None` field
/// matches everything; the time window matches a turn when any of its
/// message timestamps falls inside.
#[derive(Debug, Clone, Default)]
pub struct TurnFilter {
    pub status: Option<ToolStatus>,
    pub tool_name: Option<String>,
    pub deleted: Option<bool>,
    /// Inclusive RFC3339 lower bound.
    pub since: Option<String>,
    /// Inclusive RFC3339 upper bound.
    pub until: Option<String>,
}

/// Sortable columns of the denormalised turn/tool-meta join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    TurnIdx,
    TotalCharCount,
    Status,
    ToolName,
    ExecutionTime,
}

impl SortField {
    /// Qualified column name inside the join query. Closed enum, so this
    /// can never inject arbitrary SQL.
    pub(crate) fn column(&self) -> &'static str {
        match self {
            SortField::TurnIdx => "t.turn_idx",
            SortField::TotalCharCount => "t.total_char_count",
            SortField::Status => "m.status",
            SortField::ToolName => "m.tool_name",
            SortField::ExecutionTime => "m.execution_time",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Result of appending messages as one new turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendResult {
    pub turn_idx: i64,
    pub message_ids: Vec<i64>,
}

/// A registered (live) agent row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningAgent {
    pub agent_role: String,
    pub agent_id: String,
    pub repo_url: String,
    pub created_at: String,
}
