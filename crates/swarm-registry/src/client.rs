use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::error::{RegistryError, Result};
use crate::types::RoleEntry;

/// HTTP client for the agent-manager role registry, with an
/// opportunistic per-role cache. Registry writes are out of scope; this
/// client only reads.
pub struct RoleRegistryClient {
    http: reqwest::Client,
    base_url: String,
    cache: DashMap<String, Arc<RoleEntry>>,
}

impl RoleRegistryClient {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: api_url.into(),
            cache: DashMap::new(),
        }
    }

    fn roles_endpoint(&self) -> String {
        format!("{}/api/agent-roles", self.base_url.trim_end_matches('/'))
    }

    /// Fetch one role entry, serving repeat lookups from the cache.
    #[instrument(skip(self))]
    pub async fn get_role(&self, agent_role: &str) -> Result<Arc<RoleEntry>> {
        if let Some(entry) = self.cache.get(agent_role) {
            debug!(role = agent_role, "registry cache hit");
            return Ok(Arc::clone(&entry));
        }

        let body: serde_json::Value = self
            .http
            .get(self.roles_endpoint())
            .query(&[("agent_role", agent_role)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let entry = Arc::new(parse_role_response(agent_role, body)?);
        self.cache.insert(agent_role.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Fetch every registered role. Results are cached individually.
    #[instrument(skip(self))]
    pub async fn list_roles(&self) -> Result<Vec<Arc<RoleEntry>>> {
        let body: serde_json::Value = self
            .http
            .get(self.roles_endpoint())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let entries = parse_role_list(body)?;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = Arc::new(entry);
            self.cache
                .insert(entry.agent_role.clone(), Arc::clone(&entry));
            out.push(entry);
        }
        Ok(out)
    }

    /// Drop a cached role so the next lookup refetches.
    pub fn invalidate(&self, agent_role: &str) {
        self.cache.remove(agent_role);
    }
}

/// Unwrap the single-role response. The remote API answers either
/// `{"agent": {…}}` or a one-element list.
pub(crate) fn parse_role_response(
    agent_role: &str,
    body: serde_json::Value,
) -> Result<RoleEntry> {
    let raw = if let Some(agent) = body.get("agent") {
        agent.clone()
    } else if let Some(list) = body.as_array() {
        match list.len() {
            0 => {
                return Err(RegistryError::RoleNotFound {
                    role: agent_role.to_string(),
                })
            }
            1 => list[0].clone(),
            n => {
                return Err(RegistryError::UnexpectedShape(format!(
                    "{n} entries for role '{agent_role}'"
                )))
            }
        }
    } else {
        return Err(RegistryError::UnexpectedShape(body.to_string()));
    };

    Ok(serde_json::from_value(raw)?)
}

/// Unwrap the role-list response: either `{"agentTypes": […]}` or a bare
/// list.
pub(crate) fn parse_role_list(body: serde_json::Value) -> Result<Vec<RoleEntry>> {
    let raw = if let Some(list) = body.get("agentTypes").and_then(|v| v.as_array()) {
        list.clone()
    } else if let Some(list) = body.as_array() {
        list.clone()
    } else {
        return Err(RegistryError::UnexpectedShape(body.to_string()));
    };

    raw.into_iter()
        .map(|v| serde_json::from_value(v).map_err(RegistryError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_single_role_parses() {
        let body = serde_json::json!({
            "agent": {
                "agent_role": "builder",
                "allowed_tools": ["run_bash"],
                "default_developer_prompt": "Fix the build.",
                "model_name": "gpt-4",
            }
        });
        let entry = parse_role_response("builder", body).unwrap();
        assert_eq!(entry.agent_role, "builder");
        assert_eq!(entry.model_name.as_deref(), Some("gpt-4"));
    }

    #[test]
    fn single_element_list_parses() {
        let body = serde_json::json!([
            {"agent_role": "builder", "allowed_tools": []}
        ]);
        assert!(parse_role_response("builder", body).is_ok());
    }

    #[test]
    fn empty_list_is_not_found() {
        let err = parse_role_response("ghost", serde_json::json!([])).unwrap_err();
        assert!(matches!(err, RegistryError::RoleNotFound { .. }));
    }

    #[test]
    fn agent_types_wrapper_parses() {
        let body = serde_json::json!({
            "agentTypes": [
                {"agent_role": "a", "allowed_tools": []},
                {"agent_role": "b", "allowed_tools": ["echo"]},
            ]
        });
        let roles = parse_role_list(body).unwrap();
        assert_eq!(roles.len(), 2);
        assert_eq!(roles[1].allowed_tools, vec!["echo"]);
    }
}
