//! Turn-zero seeding: the bootstrap turn holding the system prompt, the
//! registry-supplied developer prompt, and the optional initial user
//! prompt. Created exactly once per conversation.

use tracing::info;

use swarm_core::{AgentKey, MessageRole};
use swarm_store::{ConversationStore, Message, Turn};

use crate::error::{EngineError, Result};

/// Downstream APIs require the system prompt to mention `json`; this
/// fallback is substituted when the configured prompt does not.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Always respond with a valid json object.";

/// The effective system prompt: the configured one when it mentions
/// `json`, else the default.
pub fn system_prompt_content(configured: &str) -> &str {
    if !configured.is_empty() && configured.to_ascii_lowercase().contains("json") {
        configured
    } else {
        DEFAULT_SYSTEM_PROMPT
    }
}

/// Create turn-zero for an empty conversation and persist it.
///
/// Fails with [`EngineError::TurnZeroExists`] when the history already
/// holds any turn.
pub fn seed_turn_zero(
    store: &ConversationStore,
    key: &AgentKey,
    configured_system_prompt: &str,
    developer_prompt: &str,
    initial_user: Option<&str>,
) -> Result<()> {
    if !store.load_turns(key)?.is_empty() {
        return Err(EngineError::TurnZeroExists {
            key: key.to_string(),
        });
    }

    let system_content = system_prompt_content(configured_system_prompt);

    let turn_idx = store.allocate_next_turn_idx(key)?;
    let mut turn = Turn::new(turn_idx);
    turn.finalized = true;
    turn.push_message(Message::new(
        MessageRole::System,
        system_content,
        store.allocate_next_message_id(key)?,
    ));
    turn.push_message(Message::new(
        MessageRole::Developer,
        developer_prompt,
        store.allocate_next_message_id(key)?,
    ));
    if let Some(user) = initial_user.filter(|u| !u.is_empty()) {
        turn.push_message(Message::new(
            MessageRole::User,
            user,
            store.allocate_next_message_id(key)?,
        ));
    }

    store.save_turns(key, &[turn])?;
    info!(key = %key, "turn-zero seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_without_json_token_falls_back() {
        assert_eq!(system_prompt_content("Be terse."), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(system_prompt_content(""), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(
            system_prompt_content("Reply in JSON only."),
            "Reply in JSON only."
        );
    }

    #[test]
    fn seed_creates_exactly_one_turn() {
        let store = ConversationStore::open_in_memory().unwrap();
        let key = AgentKey::new("role", "id", "repo");

        seed_turn_zero(&store, &key, "", "You fix builds.", Some("go")).unwrap();
        let turns = store.load_turns(&key).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].turn_idx, 0);
        assert!(turns[0].finalized);
        assert_eq!(turns[0].messages.len(), 3);
        assert_eq!(turns[0].messages[0].role, MessageRole::System);
        assert!(turns[0].messages[0].content.contains("json"));

        // Seeding twice must fail.
        let err = seed_turn_zero(&store, &key, "", "x", None).unwrap_err();
        assert!(matches!(err, EngineError::TurnZeroExists { .. }));
    }
}
