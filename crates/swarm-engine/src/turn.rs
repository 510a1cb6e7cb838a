//! The per-agent turn loop: assemble the outbound history, call the
//! model, dispatch tool calls, persist, and decide when the agent is
//! finished.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use swarm_bus::{ExecRequest, ExecResponse, ExecStatus};
use swarm_core::config::EngineConfig;
use swarm_core::{AgentKey, MessageRole, ToolChoice, ToolStatus};
use swarm_registry::ToolSpec;
use swarm_store::dedup::{check_duplicate, compute_args_hash, normalized_file_key, ToolProfile};
use swarm_store::{ConversationStore, InvocationRecord, Message, StoreError, ToolMeta, Turn};

use crate::dispatch::ToolDispatch;
use crate::error::{EngineError, Result};
use crate::filters::FilterRegistry;
use crate::outbound::{outbound_messages, tools_metadata};
use crate::prompts::seed_turn_zero;
use crate::provider::{ChatRequest, ModelProvider, ToolCall};
use crate::summarize::summarize_and_prune;

/// Everything one turn needs to know about the agent being driven.
pub struct TurnContext<'a> {
    pub key: &'a AgentKey,
    /// The global tool catalog snapshot.
    pub tools: &'a HashMap<String, ToolSpec>,
    /// The role's allowed subset, in registry order.
    pub allowed_tools: &'a [String],
    pub model: &'a str,
    pub tool_choice: ToolChoice,
    pub reasoning_effort: Option<&'a str>,
    pub repo_owner: Option<&'a str>,
    pub repo_name: Option<&'a str>,
    /// External invocation log consulted by the `until-build` policy.
    /// Empty when the caller keeps no such log.
    pub invocation_log: &'a [InvocationRecord],
}

/// Overall outcome of driving an agent to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub task_result: serde_json::Value,
}

/// Drives one agent, one turn at a time. Turns within a conversation
/// are strictly sequential; distinct agents run engines in parallel on
/// the runtime's worker pool.
pub struct ExecutionEngine {
    store: Arc<ConversationStore>,
    provider: Arc<dyn ModelProvider>,
    dispatch: Arc<dyn ToolDispatch>,
    filters: FilterRegistry,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<ConversationStore>,
        provider: Arc<dyn ModelProvider>,
        dispatch: Arc<dyn ToolDispatch>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            dispatch,
            filters: FilterRegistry::with_defaults(),
            config,
        }
    }

    pub fn with_filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute one full cycle: history → model call → tool dispatch →
    /// persist. Returns the index to use for the next turn.
    #[instrument(skip(self, ctx), fields(key = %ctx.key, model = %ctx.model))]
    pub async fn run_single_turn(&self, ctx: &TurnContext<'_>) -> Result<i64> {
        let mut history = self.store.load_turns(ctx.key)?;
        if history.is_empty() {
            return Err(EngineError::MissingInitialTurn {
                key: ctx.key.to_string(),
            });
        }

        let turn_counter = history.iter().map(|t| t.turn_idx).max().unwrap_or(-1) + 1;

        let messages = outbound_messages(&history);
        let tools = tools_metadata(ctx.tools, ctx.allowed_tools);

        debug!(
            turn = turn_counter,
            messages = messages.len(),
            tools = tools.len(),
            "sending model request"
        );
        let started = Instant::now();
        let reply = self
            .provider
            .complete(&ChatRequest {
                model: ctx.model.to_string(),
                messages,
                tools,
                tool_choice: ctx.tool_choice.to_payload(),
                reasoning_effort: ctx.reasoning_effort.map(String::from),
            })
            .await?;
        let model_time = started.elapsed().as_secs_f64();
        debug!(
            turn = turn_counter,
            secs = model_time,
            tool_calls = reply.tool_calls.len(),
            "model responded"
        );

        // The assistant message becomes its own turn; with no tool calls
        // it is the terminal turn.
        let mut assistant_turn = Turn::new(turn_counter);
        assistant_turn.finalized = reply.tool_calls.is_empty();
        let assistant_id = self.store.allocate_next_message_id(ctx.key)?;
        assistant_turn.push_message(
            Message::new(MessageRole::Assistant, reply.content.clone(), assistant_id)
                .with_raw(reply.raw.clone()),
        );
        history.push(assistant_turn);

        // One tool call ↔ one turn record, in emission order.
        let profiles = dedup_profiles(ctx.tools);
        for (offset, call) in reply.tool_calls.iter().enumerate() {
            let child_idx = turn_counter + 1 + offset as i64;
            let turn = self
                .run_tool_call(ctx, &history, child_idx, call, &profiles)
                .await?;
            self.apply_metadata_filters(ctx.key, &turn)?;
            history.push(turn);
        }

        self.store.save_turns(ctx.key, &history)?;

        let last_idx = history.last().map(|t| t.turn_idx).unwrap_or(turn_counter);
        Ok(last_idx + 1)
    }

    /// Loop turns until the most recent turn is finalized, the iteration
    /// cap is reached, or a fatal error escapes. Model failures classify
    /// the outcome; storage failures propagate.
    #[instrument(skip(self, ctx, developer_prompt, initial_user_prompt), fields(key = %ctx.key))]
    pub async fn run_to_completion(
        &self,
        ctx: &TurnContext<'_>,
        developer_prompt: &str,
        initial_user_prompt: Option<&str>,
    ) -> Result<RunOutcome> {
        match initial_user_prompt {
            Some(prompt) => {
                seed_turn_zero(
                    &self.store,
                    ctx.key,
                    &self.config.system_prompt,
                    developer_prompt,
                    Some(prompt),
                )?;
            }
            None => {
                if self.store.load_turns(ctx.key)?.is_empty() {
                    return Err(EngineError::MissingInitialTurn {
                        key: ctx.key.to_string(),
                    });
                }
            }
        }

        for iteration in 0..self.config.max_iterations {
            summarize_and_prune(
                &self.store,
                self.provider.as_ref(),
                ctx.key,
                self.config.max_body_turns,
                &self.config.summary_model,
            )
            .await?;

            match self.run_single_turn(ctx).await {
                Ok(_) => {}
                Err(EngineError::Provider(e)) => {
                    warn!(iteration, error = %e, "model call failed; run classified as error");
                    return Ok(RunOutcome {
                        success: false,
                        task_result: serde_json::json!(e.to_string()),
                    });
                }
                Err(e) => return Err(e),
            }

            let history = self.store.load_turns(ctx.key)?;
            if history.last().is_some_and(|t| t.finalized) {
                info!(iteration, "agent finalized");
                return Ok(RunOutcome {
                    success: true,
                    task_result: serde_json::json!(final_assistant_content(&history)),
                });
            }
        }

        warn!(cap = self.config.max_iterations, "iteration cap reached");
        Ok(RunOutcome {
            success: false,
            task_result: serde_json::json!(format!(
                "max iterations ({}) reached without a finalized turn",
                self.config.max_iterations
            )),
        })
    }

    /// Build one tool turn: dedup scan, dispatch (unless rejected), and
    /// the tool-role message carrying the result.
    async fn run_tool_call(
        &self,
        ctx: &TurnContext<'_>,
        history: &[Turn],
        child_idx: i64,
        call: &ToolCall,
        profiles: &HashMap<String, ToolProfile>,
    ) -> Result<Turn> {
        let spec = ctx
            .tools
            .get(&call.name)
            .ok_or_else(|| EngineError::UnknownTool {
                name: call.name.clone(),
            })?;

        let parsed_args: serde_json::Value = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()));

        let mut tm = ToolMeta::new(&call.name);
        tm.preservation_policy = Some(spec.preservation_policy);
        tm.args_hash = compute_args_hash(&call.arguments);
        tm.normalized_filename = normalized_file_key(&call.arguments);
        tm.normalized_args = parsed_args.clone();
        tm.input_args = parsed_args.clone();

        let duplicate = match check_duplicate(
            history,
            child_idx,
            &call.name,
            &call.arguments,
            ctx.invocation_log,
            profiles,
        ) {
            Ok(dup) => dup,
            Err(StoreError::UnknownTool { name }) => {
                return Err(EngineError::UnknownTool { name })
            }
            Err(e) => return Err(e.into()),
        };

        let content = match duplicate {
            Some(dup_turn) => {
                info!(
                    tool = %call.name,
                    turn = child_idx,
                    duplicate_of = dup_turn,
                    "tool call rejected as duplicate"
                );
                tm.status = Some(ToolStatus::Rejected);
                tm.rejection = Some(format!(
                    "Duplicate invocation; result already available in turn {dup_turn}"
                ));
                format!("Rejected: duplicate of turn {dup_turn}")
            }
            None => {
                let request = ExecRequest {
                    tool_name: call.name.clone(),
                    input_args: parsed_args,
                    repo_url: ctx.key.repo_url.clone(),
                    repo_name: ctx.repo_name.map(String::from),
                    repo_owner: ctx.repo_owner.map(String::from),
                    metadata: self.dispatch_metadata(ctx.key)?,
                    turn_id: Some(child_idx.to_string()),
                    reply_to: String::new(),
                };
                let timeout = Duration::from_secs_f64(self.config.turn_exec_timeout_secs);
                let started = Instant::now();
                match self.dispatch.execute_and_wait(request, timeout).await {
                    Ok(resp) => {
                        tm.execution_time = resp.meta.exec_time;
                        tm.status = Some(match resp.status {
                            ExecStatus::Ok => ToolStatus::Success,
                            ExecStatus::Failure => ToolStatus::Failure,
                            ExecStatus::Error => ToolStatus::Error,
                        });
                        render_response(&resp)
                    }
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "tool dispatch failed");
                        tm.execution_time = started.elapsed().as_secs_f64();
                        tm.status = Some(ToolStatus::Error);
                        tm.rejection = Some(format!("Tool dispatch failed: {e}"));
                        format!("Tool dispatch failed: {e}")
                    }
                }
            }
        };

        let mut turn = Turn::new(child_idx);
        let message_id = self.store.allocate_next_message_id(ctx.key)?;
        let raw = serde_json::json!({
            "role": "tool",
            "tool_call_id": call.id,
            "content": content,
        });
        turn.push_message(Message::new(MessageRole::Tool, content, message_id).with_raw(raw));
        turn.tool_meta = Some(tm);
        Ok(turn)
    }

    /// Dispatch metadata carried with every request: currently the issue
    /// title, when a metadata filter has recorded one.
    fn dispatch_metadata(&self, key: &AgentKey) -> Result<serde_json::Value> {
        let conv_meta = self.store.get_metadata(key)?;
        let mut metadata = serde_json::Map::new();
        if let Some(title) = conv_meta.get("issue_title") {
            metadata.insert("issue_title".into(), title.clone());
        }
        Ok(serde_json::Value::Object(metadata))
    }

    /// Run registered metadata filters for this tool turn and persist any
    /// fields they add or change.
    fn apply_metadata_filters(&self, key: &AgentKey, turn: &Turn) -> Result<()> {
        let mut metadata = match self.store.get_metadata(key)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        let before = metadata.clone();
        self.filters.apply(turn, &mut metadata);
        for (field, value) in metadata {
            if before.get(&field) != Some(&value) {
                self.store.update_metadata(key, &field, value)?;
            }
        }
        Ok(())
    }
}

fn dedup_profiles(tools: &HashMap<String, ToolSpec>) -> HashMap<String, ToolProfile> {
    tools
        .iter()
        .map(|(name, spec)| {
            (
                name.clone(),
                ToolProfile {
                    kind: spec.kind,
                    policy: spec.preservation_policy,
                },
            )
        })
        .collect()
}

fn render_response(resp: &ExecResponse) -> String {
    match (&resp.response, &resp.error) {
        (Some(serde_json::Value::String(s)), _) => s.clone(),
        (Some(value), _) => value.to_string(),
        (None, Some(err)) => format!("{}: {}", err.code, err.message),
        (None, None) => String::new(),
    }
}

/// Content of the last assistant message, used as the run's result.
fn final_assistant_content(history: &[Turn]) -> String {
    history
        .iter()
        .rev()
        .flat_map(|t| t.messages.iter().rev())
        .find(|m| m.role == MessageRole::Assistant)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_prefers_string_responses() {
        let ok = ExecResponse::ok(serde_json::json!("plain text"));
        assert_eq!(render_response(&ok), "plain text");

        let obj = ExecResponse::ok(serde_json::json!({"echo": "hi"}));
        assert_eq!(render_response(&obj), r#"{"echo":"hi"}"#);

        let err = ExecResponse::error("TOOL_NOT_FOUND", "no such tool");
        assert_eq!(render_response(&err), "TOOL_NOT_FOUND: no such tool");
    }
}
