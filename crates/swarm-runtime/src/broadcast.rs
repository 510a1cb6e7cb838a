//! Broadcast a message as one user turn to running agents of a repo.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use swarm_core::MessageRole;
use swarm_store::ConversationStore;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub success_count: usize,
    pub errors: Vec<String>,
}

/// Send `contents` as a single user turn to every running agent in
/// `repo_url` whose role is in `agent_roles`. An empty role set
/// broadcasts to all running agents of the repo.
#[instrument(skip(store, contents), fields(repo = repo_url, roles = agent_roles.len(), n = contents.len()))]
pub fn broadcast_message_to_agents(
    store: &ConversationStore,
    agent_roles: &[String],
    contents: &[String],
    repo_url: &str,
) -> Result<BroadcastResult> {
    let agents = store.list_agents(Some(repo_url))?;

    let mut success_count = 0;
    let mut errors = Vec::new();

    for agent in agents {
        if !agent_roles.is_empty() && !agent_roles.contains(&agent.agent_role) {
            continue;
        }
        let key = swarm_core::AgentKey::new(&agent.agent_role, &agent.agent_id, repo_url);
        match store.append_messages(&key, MessageRole::User, contents) {
            Ok(_) => success_count += 1,
            Err(e) => errors.push(format!("{}:{} - {e}", agent.agent_role, agent.agent_id)),
        }
    }

    debug!(success_count, errors = errors.len(), "broadcast delivered");
    Ok(BroadcastResult {
        success_count,
        errors,
    })
}
