use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (swarm.toml + SWARM_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SwarmConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the single SQLite file holding all agents-and-turns data.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the agent-manager registry API.
    #[serde(default = "default_registry_url")]
    pub api_url: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api_url: default_registry_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Subject all execution requests are published on.
    #[serde(default = "default_exec_req_subject")]
    pub exec_req_subject: String,
    /// Prefix for per-request reply inboxes; the full subject is
    /// `{prefix}.{uuid-hex}`.
    #[serde(default = "default_exec_resp_prefix")]
    pub exec_resp_prefix: String,
    /// Name of the stream backing the request subject.
    #[serde(default = "default_exec_stream")]
    pub exec_stream: String,
    /// Durable consumer name on the request stream.
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    /// Seconds to wait for a publish ack before surfacing a retryable error.
    #[serde(default = "default_publish_ack_timeout")]
    pub publish_ack_timeout_secs: f64,
    /// Seconds before an unacked request is redelivered.
    #[serde(default = "default_ack_wait")]
    pub ack_wait_secs: f64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            exec_req_subject: default_exec_req_subject(),
            exec_resp_prefix: default_exec_resp_prefix(),
            exec_stream: default_exec_stream(),
            consumer_name: default_consumer_name(),
            publish_ack_timeout_secs: default_publish_ack_timeout(),
            ack_wait_secs: default_ack_wait(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// System prompt for turn-zero. Must mention `json`; a fallback that
    /// does is substituted otherwise.
    #[serde(default)]
    pub system_prompt: String,
    /// Tool-choice passthrough: "auto", "required", or an explicit tool name.
    #[serde(default = "default_tool_choice")]
    pub tool_choice: String,
    /// Model used when the role entry does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Soft cap on run_to_completion iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Seconds to wait for one tool dispatch before synthesising an error.
    #[serde(default = "default_turn_exec_timeout")]
    pub turn_exec_timeout_secs: f64,
    /// Number of body turns to keep before summarisation kicks in.
    #[serde(default = "default_max_body_turns")]
    pub max_body_turns: usize,
    /// Model used for history summarisation.
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            tool_choice: default_tool_choice(),
            default_model: default_model(),
            max_iterations: default_max_iterations(),
            turn_exec_timeout_secs: default_turn_exec_timeout(),
            max_body_turns: default_max_body_turns(),
            summary_model: default_summary_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum concurrent agent tasks on the worker pool.
    #[serde(default = "default_max_agent_tasks")]
    pub max_agent_tasks: usize,
    /// Seconds between background tool-catalog refreshes.
    #[serde(default = "default_catalog_refresh")]
    pub catalog_refresh_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_agent_tasks: default_max_agent_tasks(),
            catalog_refresh_secs: default_catalog_refresh(),
        }
    }
}

impl SwarmConfig {
    /// Load config from a TOML file with SWARM_* env var overrides.
    ///
    /// Falls back to `./swarm.toml` when no explicit path is given; a
    /// missing file yields pure defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("swarm.toml");

        let config: SwarmConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SWARM_").split("__"))
            .extract()
            .map_err(|e| crate::error::SwarmError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.swarm/agents.db", home)
}
fn default_registry_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_exec_req_subject() -> String {
    "tools.execute.request".to_string()
}
fn default_exec_resp_prefix() -> String {
    "tools.execute.response".to_string()
}
fn default_exec_stream() -> String {
    "TOOLS_EXEC".to_string()
}
fn default_consumer_name() -> String {
    "TOOLS_EXEC_REQ".to_string()
}
fn default_publish_ack_timeout() -> f64 {
    5.0
}
fn default_ack_wait() -> f64 {
    30.0
}
fn default_tool_choice() -> String {
    "required".to_string()
}
fn default_model() -> String {
    "gpt-4".to_string()
}
fn default_max_iterations() -> u32 {
    25
}
fn default_turn_exec_timeout() -> f64 {
    10.0
}
fn default_max_body_turns() -> usize {
    10
}
fn default_summary_model() -> String {
    "gpt-4".to_string()
}
fn default_max_agent_tasks() -> usize {
    5
}
fn default_catalog_refresh() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = SwarmConfig::default();
        assert_eq!(cfg.engine.max_iterations, 25);
        assert_eq!(cfg.runtime.max_agent_tasks, 5);
        assert!(cfg.bus.exec_resp_prefix.starts_with("tools.execute"));
        assert!(cfg.database.path.ends_with("agents.db"));
    }
}
