//! The agent runtime: live-agent registry, per-worker call stacks, the
//! spawn graph, and the bounded worker pool that drives agents to
//! completion while propagating parent context.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use swarm_core::config::RuntimeConfig;
use swarm_core::{agent_id_for_prompt, AgentKey, ToolChoice};
use swarm_engine::{ExecutionEngine, RunOutcome, TurnContext};
use swarm_registry::{RoleEntry, RoleRegistryClient, ToolCatalogCache};
use swarm_store::{ConversationStore, RunningAgent, StoreError};

use crate::broadcast::{broadcast_message_to_agents, BroadcastResult};
use crate::error::{Result, RuntimeError};
use crate::graph::SpawnGraph;
use crate::stack::{CallStacks, WorkerId};

/// Where role configuration comes from. The production impl is the HTTP
/// registry client; tests plug in an in-memory one.
#[async_trait]
pub trait RoleSource: Send + Sync {
    async fn get_role(&self, agent_role: &str) -> swarm_registry::Result<Arc<RoleEntry>>;
}

#[async_trait]
impl RoleSource for RoleRegistryClient {
    async fn get_role(&self, agent_role: &str) -> swarm_registry::Result<Arc<RoleEntry>> {
        RoleRegistryClient::get_role(self, agent_role).await
    }
}

/// Parameters of one agent task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub agent_role: String,
    pub repo_url: String,
    pub user_prompt: String,
    pub agent_id: Option<String>,
    pub repo_owner: Option<String>,
    pub repo_name: Option<String>,
}

/// Result returned to the caller of [`Runtime::run_agent_task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub agent_id: Option<String>,
    pub task_result: serde_json::Value,
}

/// One frame of a worker's call stack, with parent linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrame {
    pub agent_role: String,
    pub agent_id: String,
    pub repo_url: String,
    pub parent_role: String,
    pub parent_id: String,
}

pub struct Runtime {
    store: Arc<ConversationStore>,
    engine: Arc<ExecutionEngine>,
    roles: Arc<dyn RoleSource>,
    catalog: Arc<ToolCatalogCache>,
    stacks: CallStacks,
    graph: SpawnGraph,
    pool: Arc<Semaphore>,
}

impl Runtime {
    pub fn new(
        store: Arc<ConversationStore>,
        engine: Arc<ExecutionEngine>,
        roles: Arc<dyn RoleSource>,
        catalog: Arc<ToolCatalogCache>,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            engine,
            roles,
            catalog,
            stacks: CallStacks::new(),
            graph: SpawnGraph::new(),
            pool: Arc::new(Semaphore::new(config.max_agent_tasks.max(1))),
        })
    }

    /// Allocate a worker identity for an external execution path.
    pub fn worker(&self) -> WorkerId {
        self.stacks.new_worker()
    }

    pub fn drop_worker(&self, worker: WorkerId) {
        self.stacks.drop_worker(worker);
    }

    // ------------------------------------------------------------------
    // Worker-scoped agent context
    // ------------------------------------------------------------------

    /// Idempotently register the agent, push it onto the worker's stack,
    /// and make it the worker's current agent. The id must be non-empty.
    #[instrument(skip(self), fields(key = %key))]
    pub fn seed_agent(&self, worker: WorkerId, key: AgentKey) -> Result<String> {
        if key.agent_id.trim().is_empty() {
            return Err(RuntimeError::Validation(format!(
                "seed_agent: agent_id is required and must be non-empty (role={}, repo_url={})",
                key.agent_role, key.repo_url
            )));
        }
        self.store.add_agent(&key)?;
        let agent_id = key.agent_id.clone();
        self.stacks.push(worker, key);
        Ok(agent_id)
    }

    /// Pop the worker's top frame; the previous frame becomes current.
    pub fn pop_current_agent(&self, worker: WorkerId) {
        self.stacks.pop(worker);
    }

    /// The worker's current agent tuple, if any.
    pub fn current_agent(&self, worker: WorkerId) -> Option<AgentKey> {
        self.stacks.current(worker)
    }

    /// Make an already-registered agent the worker's current one.
    pub fn set_current_agent(&self, worker: WorkerId, key: AgentKey) -> Result<()> {
        if !self.store.agent_exists(&key)? {
            return Err(RuntimeError::AgentNotFound {
                key: key.to_string(),
            });
        }
        self.stacks.push(worker, key);
        Ok(())
    }

    /// Bottom→top snapshot of the worker's stack with parent linkage.
    pub fn get_agent_stack(&self, worker: WorkerId) -> Vec<StackFrame> {
        let frames = self.stacks.frames(worker);
        frames
            .iter()
            .enumerate()
            .map(|(idx, key)| {
                let (parent_role, parent_id) = if idx > 0 {
                    (frames[idx - 1].agent_role.clone(), frames[idx - 1].agent_id.clone())
                } else {
                    (String::new(), String::new())
                };
                StackFrame {
                    agent_role: key.agent_role.clone(),
                    agent_id: key.agent_id.clone(),
                    repo_url: key.repo_url.clone(),
                    parent_role,
                    parent_id,
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Agent tasks
    // ------------------------------------------------------------------

    /// Run one agent to completion on the worker pool.
    ///
    /// Seeds the agent on the caller's worker, hands the captured parent
    /// context to a pool worker by value, and pops the seed once the
    /// task resolves. A missing `agent_id` is derived as the hex MD5 of
    /// the prompt.
    #[instrument(skip(self, request), fields(role = %request.agent_role, repo = %request.repo_url))]
    pub async fn run_agent_task(
        self: &Arc<Self>,
        worker: WorkerId,
        request: TaskRequest,
    ) -> Result<TaskResult> {
        let prompt = request.user_prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(RuntimeError::Validation(
                "run_agent_task: user_prompt is required and must be non-empty".into(),
            ));
        }

        let agent_id = request
            .agent_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .unwrap_or_else(|| agent_id_for_prompt(&prompt));
        let key = AgentKey::new(&request.agent_role, &agent_id, &request.repo_url);

        // Capture the caller's context before seeding, then seed here so
        // the agent is current for the caller too.
        let parent_ctx = self.stacks.current(worker);
        self.seed_agent(worker, key.clone())?;

        let runtime = Arc::clone(self);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            runtime
                .worker_task(
                    task_key,
                    prompt,
                    parent_ctx,
                    request.repo_owner,
                    request.repo_name,
                )
                .await
        });

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "agent task join failed");
                TaskResult {
                    success: false,
                    agent_id: Some(agent_id),
                    task_result: serde_json::json!(e.to_string()),
                }
            }
        };

        self.pop_current_agent(worker);
        Ok(result)
    }

    /// Body of one pool worker. Worker-local state is not inherited: the
    /// parent context arrives by value and is re-installed here.
    async fn worker_task(
        self: Arc<Self>,
        key: AgentKey,
        prompt: String,
        parent_ctx: Option<AgentKey>,
        repo_owner: Option<String>,
        repo_name: Option<String>,
    ) -> TaskResult {
        let permit = Arc::clone(&self.pool).acquire_owned().await;
        if permit.is_err() {
            return TaskResult {
                success: false,
                agent_id: Some(key.agent_id.clone()),
                task_result: serde_json::json!("worker pool closed"),
            };
        }

        let worker = self.stacks.new_worker();
        if let Some(parent) = &parent_ctx {
            self.stacks.push(worker, parent.clone());
        }
        if let Err(e) = self.seed_agent(worker, key.clone()) {
            self.stacks.drop_worker(worker);
            return TaskResult {
                success: false,
                agent_id: Some(key.agent_id.clone()),
                task_result: serde_json::json!(e.to_string()),
            };
        }

        if let Some(parent) = &parent_ctx {
            if parent.pair() != key.pair() {
                self.graph.record_spawn(parent.pair(), key.pair());
                debug!(parent = %parent, child = %key, "spawn recorded");
            }
        }

        if let Err(e) = self
            .store
            .update_metadata(&key, "state", serde_json::json!("running"))
        {
            warn!(error = %e, "failed to mark agent running");
        }

        let outcome = self
            .drive(&key, &prompt, repo_owner.as_deref(), repo_name.as_deref())
            .await;

        if let Err(e) = self
            .store
            .update_metadata(&key, "state", serde_json::json!("idle"))
        {
            warn!(error = %e, "failed to mark agent idle");
        }
        self.stacks.drop_worker(worker);

        match outcome {
            Ok(run) => TaskResult {
                success: run.success,
                agent_id: Some(key.agent_id.clone()),
                task_result: run.task_result,
            },
            Err(e) => {
                error!(key = %key, error = %e, "run_to_completion failed");
                TaskResult {
                    success: false,
                    agent_id: Some(key.agent_id.clone()),
                    task_result: serde_json::json!(e.to_string()),
                }
            }
        }
    }

    /// Resolve role + catalog and drive the engine to completion.
    async fn drive(
        &self,
        key: &AgentKey,
        prompt: &str,
        repo_owner: Option<&str>,
        repo_name: Option<&str>,
    ) -> Result<RunOutcome> {
        let role = self.roles.get_role(&key.agent_role).await?;
        let tools = self.catalog.snapshot().await?;
        let config = self.engine.config();

        let model = role
            .model_name
            .clone()
            .unwrap_or_else(|| config.default_model.clone());
        let tool_choice = ToolChoice::parse(
            role.tool_choice.as_deref().unwrap_or(&config.tool_choice),
        );

        let ctx = TurnContext {
            key,
            tools: &tools,
            allowed_tools: &role.allowed_tools,
            model: &model,
            tool_choice,
            reasoning_effort: role.reasoning_level.as_deref(),
            repo_owner,
            repo_name,
            invocation_log: &[],
        };
        info!(key = %key, model = %model, "driving agent to completion");
        Ok(self
            .engine
            .run_to_completion(&ctx, &role.default_developer_prompt, Some(prompt))
            .await?)
    }

    // ------------------------------------------------------------------
    // Registry views and removal
    // ------------------------------------------------------------------

    pub fn list_running_agents(&self, repo_url: Option<&str>) -> Result<Vec<RunningAgent>> {
        Ok(self.store.list_agents(repo_url)?)
    }

    /// The agent row matching the worker's current pointer, if any.
    pub fn get_current_running_agent(&self, worker: WorkerId) -> Result<Option<RunningAgent>> {
        let Some(current) = self.stacks.current(worker) else {
            return Ok(None);
        };
        Ok(self
            .store
            .list_agents(Some(&current.repo_url))?
            .into_iter()
            .find(|a| a.agent_role == current.agent_role && a.agent_id == current.agent_id))
    }

    /// Delete the agent record and purge its entire conversation.
    /// Refused while the key is on any live worker's stack.
    #[instrument(skip(self), fields(key = %key))]
    pub fn remove_running_agent(&self, key: &AgentKey) -> Result<()> {
        if self.stacks.contains(key) {
            return Err(RuntimeError::AgentInCallStack {
                key: key.to_string(),
            });
        }

        match self.store.remove_agent(key) {
            Ok(()) => {}
            Err(StoreError::AgentNotFound { key }) => {
                return Err(RuntimeError::AgentNotFound { key })
            }
            Err(e) => return Err(e.into()),
        }
        self.store.delete_conversation(key)?;
        info!(key = %key, "agent removed and conversation purged");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Spawn graph
    // ------------------------------------------------------------------

    pub fn get_graph_edges(&self) -> Vec<(crate::graph::AgentPair, crate::graph::AgentPair)> {
        self.graph.edges()
    }

    pub fn format_mermaid_sequence(&self) -> String {
        self.graph.format_mermaid_sequence()
    }

    pub fn format_dot(&self) -> String {
        self.graph.format_dot()
    }

    // ------------------------------------------------------------------
    // Broadcast
    // ------------------------------------------------------------------

    /// Broadcast `contents` as one user turn to the repo's running
    /// agents; an empty role set targets all of them.
    pub fn broadcast(
        &self,
        agent_roles: &[String],
        contents: &[String],
        repo_url: &str,
    ) -> Result<BroadcastResult> {
        broadcast_message_to_agents(&self.store, agent_roles, contents, repo_url)
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }
}
