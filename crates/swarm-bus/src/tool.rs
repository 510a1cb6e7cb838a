//! The tool seam of the dispatch bus.
//!
//! Only the request/response contract lives here; real tool
//! implementations run behind the responder, out of the engine's
//! process. The bundled [`EchoTool`] exists for wiring tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

use swarm_core::{PreservationPolicy, ToolKind};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    Execution(String),
}

/// A tool reachable through the dispatch bus.
#[async_trait]
pub trait BusTool: Send + Sync {
    /// Unique name, e.g. `read_file`.
    fn name(&self) -> &str;
    /// Human-readable description shown to the model.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn schema(&self) -> serde_json::Value;
    /// Declared side-effect class.
    fn kind(&self) -> ToolKind {
        ToolKind::ReadOnly
    }
    /// Dedup rule for repeated invocations.
    fn policy(&self) -> PreservationPolicy {
        PreservationPolicy::Always
    }
    /// Execute with the given input; the result becomes the envelope's
    /// `response` field.
    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Name-addressed set of tools served by one responder.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn BusTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn BusTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BusTool>> {
        self.tools.get(name).map(|t| Arc::clone(&t))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every registered tool.
    pub fn all(&self) -> Vec<Arc<dyn BusTool>> {
        self.tools.iter().map(|e| Arc::clone(&e)).collect()
    }
}

/// Echoes its `text` argument back. Used by wiring tests end to end.
pub struct EchoTool;

#[async_trait]
impl BusTool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back unchanged"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let text = input
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing 'text'".into()))?;
        Ok(serde_json::json!({ "echo": text }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_roundtrip() {
        let tool = EchoTool;
        let out = tool
            .execute(serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(out["echo"], "hello");
    }

    #[tokio::test]
    async fn echo_rejects_missing_text() {
        assert!(EchoTool.execute(serde_json::json!({})).await.is_err());
    }

    #[test]
    fn registry_lookup() {
        let reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert!(reg.contains("echo"));
        assert!(reg.get("grep").is_none());
    }
}
