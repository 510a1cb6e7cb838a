use serde::{Deserialize, Serialize};

/// One tool execution request, published on the exec-request subject.
///
/// `reply_to` carries the per-request private inbox the responder
/// publishes the envelope onto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub tool_name: String,
    #[serde(default)]
    pub input_args: serde_json::Value,
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_owner: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub reply_to: String,
}

impl ExecRequest {
    pub fn new(tool_name: impl Into<String>, input_args: serde_json::Value, repo_url: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            input_args,
            repo_url: repo_url.into(),
            repo_name: None,
            repo_owner: None,
            metadata: serde_json::Value::Object(Default::default()),
            turn_id: None,
            reply_to: String::new(),
        }
    }
}

/// Envelope status at the transport edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Ok,
    Error,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Wall-clock seconds the tool execution took on the responder side.
    #[serde(default)]
    pub exec_time: f64,
}

/// The response envelope published on the request's reply inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResponse {
    pub status: ExecStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub meta: ResponseMeta,
}

impl ExecResponse {
    pub fn ok(response: serde_json::Value) -> Self {
        Self {
            status: ExecStatus::Ok,
            response: Some(response),
            error: None,
            meta: ResponseMeta::default(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Error,
            response: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            }),
            meta: ResponseMeta::default(),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Failure,
            response: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            }),
            meta: ResponseMeta::default(),
        }
    }

    pub fn with_exec_time(mut self, secs: f64) -> Self {
        self.meta.exec_time = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_shape() {
        let resp = ExecResponse::failure("EXECUTION_ERROR", "boom").with_exec_time(0.25);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["error"]["code"], "EXECUTION_ERROR");
        assert_eq!(json["meta"]["exec_time"], 0.25);
        assert!(json.get("response").is_none());
    }

    #[test]
    fn request_tolerates_missing_optionals() {
        let req: ExecRequest = serde_json::from_str(
            r#"{"tool_name":"echo","repo_url":"r","input_args":{"text":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(req.tool_name, "echo");
        assert!(req.reply_to.is_empty());
        assert!(req.metadata.is_object());
    }
}
