//! OpenAI-compatible chat-completions provider.
//!
//! Works against any endpoint speaking the `/v1/chat/completions`
//! contract; the registry supplies which model to ask for.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::provider::{AssistantReply, ChatRequest, ModelProvider, ProviderError, ToolCall};

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
    chat_path: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self::with_path(
            "openai",
            api_key,
            base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            "/v1/chat/completions".to_string(),
        )
    }

    /// Named OpenAI-compatible provider with a custom endpoint path.
    /// `base_url` should not include a trailing slash.
    pub fn with_path(
        name: impl Into<String>,
        api_key: String,
        base_url: String,
        chat_path: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider_name: name.into(),
            api_key,
            base_url,
            chat_path,
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(&self, req: &ChatRequest) -> Result<AssistantReply, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %req.model, messages = req.messages.len(), "sending chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_response(api_resp)
    }
}

pub(crate) fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": req.model,
        "messages": req.messages,
    });
    if !req.tools.is_empty() {
        body["tools"] = serde_json::Value::Array(req.tools.clone());
        body["tool_choice"] = req.tool_choice.clone();
    }
    if let Some(effort) = &req.reasoning_effort {
        body["reasoning_effort"] = serde_json::Value::String(effort.clone());
    }
    body
}

pub(crate) fn parse_response(api_resp: serde_json::Value) -> Result<AssistantReply, ProviderError> {
    let message = api_resp
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .cloned()
        .ok_or_else(|| ProviderError::Parse("response carries no choices[0].message".into()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let function = tc.get("function")?;
                    Some(ToolCall {
                        id: tc.get("id").and_then(|v| v.as_str()).unwrap_or("call_0").to_string(),
                        name: function.get("name")?.as_str()?.to_string(),
                        arguments: function
                            .get("arguments")
                            .and_then(|v| v.as_str())
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(AssistantReply {
        raw: message,
        content,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_includes_tools_and_choice_only_when_present() {
        let req = ChatRequest {
            model: "gpt-4".into(),
            messages: vec![serde_json::json!({"role": "user", "content": "hi"})],
            tools: vec![],
            tool_choice: serde_json::json!("required"),
            reasoning_effort: Some("high".into()),
        };
        let body = build_request_body(&req);
        assert!(body.get("tools").is_none());
        assert_eq!(body["reasoning_effort"], "high");
    }

    #[test]
    fn parse_extracts_tool_calls_with_raw_arguments() {
        let resp = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\":\"/a.txt\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let reply = parse_response(resp).unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "read_file");
        assert_eq!(reply.tool_calls[0].arguments, "{\"path\":\"/a.txt\"}");
        assert_eq!(reply.content, "");
        assert_eq!(reply.raw["tool_calls"][0]["id"], "call_1");
    }

    #[test]
    fn parse_fails_without_choices() {
        assert!(parse_response(serde_json::json!({"error": "nope"})).is_err());
    }
}
