//! History compaction: when the body of the conversation outgrows the
//! configured threshold, the oldest body turns are condensed into one
//! summary turn by the model.
//!
//! A pure `history → history` transformation invoked at the top of the
//! engine's loop; any model or parse failure leaves the history
//! untouched.

use tracing::{debug, info, warn};

use swarm_core::{AgentKey, MessageRole};
use swarm_store::{ConversationStore, Message, Turn};

use crate::error::Result;
use crate::provider::{ChatRequest, ModelProvider};

const SUMMARY_SYSTEM_PROMPT: &str = "You are a chat history summarization assistant.";

/// Summarise and prune old turns when the body exceeds `max_body_turns`.
///
/// The new history is `[turn-zero, summary_turn, ...last N body turns]`,
/// re-indexed contiguously. Counters are untouched beyond the summary
/// message's own id allocation: they track the highest allocated value,
/// not the present length.
pub async fn summarize_and_prune(
    store: &ConversationStore,
    provider: &dyn ModelProvider,
    key: &AgentKey,
    max_body_turns: usize,
    model: &str,
) -> Result<()> {
    let history = store.load_turns(key)?;
    if history.len() <= 1 + max_body_turns {
        debug!(
            total = history.len(),
            max_body_turns, "no summarisation needed"
        );
        return Ok(());
    }

    let initial = history[0].clone();
    let body = &history[1..];
    let prune_count = body.len() - max_body_turns;
    let pruned = &body[..prune_count];
    let kept = &body[prune_count..];

    let prompt = build_summary_prompt(pruned);
    let request = ChatRequest {
        model: model.to_string(),
        messages: vec![
            serde_json::json!({"role": "system", "content": SUMMARY_SYSTEM_PROMPT}),
            serde_json::json!({"role": "user", "content": prompt}),
        ],
        tools: Vec::new(),
        tool_choice: serde_json::Value::String("auto".into()),
        reasoning_effort: None,
    };

    let reply = match provider.complete(&request).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, key = %key, "summarisation model call failed; skipping");
            return Ok(());
        }
    };

    let summary_text = extract_summary(&reply.content);
    if summary_text.is_empty() {
        warn!(key = %key, "summarisation produced no text; skipping");
        return Ok(());
    }

    let mut summary_turn = Turn::new(0);
    summary_turn.finalized = true;
    summary_turn.push_message(Message::new(
        MessageRole::User,
        summary_text,
        store.allocate_next_message_id(key)?,
    ));

    let mut new_history = Vec::with_capacity(2 + kept.len());
    new_history.push(initial);
    new_history.push(summary_turn);
    new_history.extend(kept.iter().cloned());
    for (idx, turn) in new_history.iter_mut().enumerate() {
        turn.turn_idx = idx as i64;
    }

    store.save_turns(key, &new_history)?;
    info!(
        key = %key,
        pruned = prune_count,
        kept = max_body_turns,
        "history summarised and pruned"
    );
    Ok(())
}

/// Serialize only the assistant/tool messages of the pruned turns as
/// `[turn <i>][<role>]: <content>` lines under the JSON instruction.
fn build_summary_prompt(turns: &[Turn]) -> String {
    let mut lines = Vec::new();
    for turn in turns {
        for msg in &turn.messages {
            if !matches!(msg.role, MessageRole::Assistant | MessageRole::Tool) {
                continue;
            }
            lines.push(format!(
                "[turn {}][{}]: {}",
                turn.turn_idx, msg.role, msg.content
            ));
        }
    }

    format!(
        "Condense the above assistant and tool messages into a brief summary, \
         capturing key facts and decisions.  Reply with valid JSON:\n\
         {{ \"summary\": \"<your summary here>\" }}\n\n{}",
        lines.join("\n")
    )
}

/// Parse `{"summary": "…"}`, falling back to the raw text.
fn extract_summary(raw: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(raw) {
        if let Some(summary) = parsed.get("summary").and_then(|s| s.as_str()) {
            let summary = summary.trim();
            if !summary.is_empty() {
                return summary.to_string();
            }
        }
    }
    raw.trim().to_string()
}
