//! Cloud-agent API client: launches background agent runs against a hosted
//! repository and polls them to completion.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use serde_json::{json, Value};

use crate::BackendError;

pub const DEFAULT_CLOUD_AGENT_BASE_URL: &str = "https://api.cursor.com";

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Remote run lifecycle. Anything unrecognized stays `Unknown` and keeps
/// the poll loop waiting, like an in-flight status would.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Creating,
    Running,
    Finished,
    Failed,
    Stopped,
    #[default]
    Unknown,
}

impl RunStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "PENDING" => RunStatus::Pending,
            "CREATING" => RunStatus::Creating,
            "RUNNING" => RunStatus::Running,
            "FINISHED" => RunStatus::Finished,
            "FAILED" => RunStatus::Failed,
            "STOPPED" => RunStatus::Stopped,
            _ => RunStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Finished | RunStatus::Failed | RunStatus::Stopped
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Creating => "CREATING",
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Stopped => "STOPPED",
            RunStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a remote run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub summary: Option<String>,
}

/// One message of a remote run's conversation. `kind` is the provider's
/// free-form message type, `text` the first non-empty of its text-bearing
/// fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationMessage {
    pub kind: String,
    pub text: String,
}

/// Parameters for starting a remote run.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub repository: String,
    pub prompt: String,
    pub reference: String,
    pub branch_name: String,
    pub auto_create_pr: bool,
    pub model: Option<String>,
}

#[async_trait::async_trait]
pub trait CloudAgentApi: Send + Sync {
    /// Starts a run and returns its id.
    async fn launch(&self, request: &LaunchRequest) -> Result<String, BackendError>;
    async fn snapshot(&self, run_id: &str) -> Result<RunSnapshot, BackendError>;
    async fn conversation(&self, run_id: &str) -> Result<Vec<ConversationMessage>, BackendError>;
    async fn follow_up(&self, run_id: &str, prompt: &str) -> Result<(), BackendError>;
}

/// HTTP client for the cloud-agent service. Authenticates with HTTP Basic,
/// the API key as username and an empty password.
pub struct CloudAgentClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl CloudAgentClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: DEFAULT_CLOUD_AGENT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:", self.api_key)))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self
            .http
            .request(method, &url)
            .header(AUTHORIZATION, self.auth_header());
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        if status == 204 {
            return Ok(Value::Null);
        }
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            let message = error_message(&text, status);
            return Err(match status {
                429 => BackendError::RateLimited {
                    message: format!("Cloud agent API rate limit: {}", message),
                },
                401 => BackendError::Auth {
                    message: format!("Cloud agent API auth failed: {}", message),
                },
                _ => BackendError::Api {
                    message: format!("Cloud agent API error: {}", message),
                },
            });
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| BackendError::Api {
            message: format!("Cloud agent API returned an unexpected body: {}", e),
        })
    }
}

fn error_message(body: &str, status: u16) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error"] {
            if let Some(message) = value.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    if !body.is_empty() {
        return body.to_string();
    }
    format!("HTTP {}", status)
}

fn message_from_value(value: &Value) -> ConversationMessage {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let text = ["text", "content", "body"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .trim()
        .to_string();
    ConversationMessage { kind, text }
}

#[async_trait::async_trait]
impl CloudAgentApi for CloudAgentClient {
    async fn launch(&self, request: &LaunchRequest) -> Result<String, BackendError> {
        let mut body = json!({
            "prompt": {"text": request.prompt},
            "source": {"repository": request.repository, "ref": request.reference},
            "target": {
                "branchName": request.branch_name,
                "autoCreatePr": request.auto_create_pr,
            },
        });
        if let Some(model) = &request.model {
            body["model"] = json!(model);
        }
        let value = self.request(Method::POST, "/v0/agents", Some(body)).await?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| BackendError::Api {
                message: "Cloud agent API did not return a run id".to_string(),
            })
    }

    async fn snapshot(&self, run_id: &str) -> Result<RunSnapshot, BackendError> {
        let value = self
            .request(Method::GET, &format!("/v0/agents/{}", run_id), None)
            .await?;
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .map(RunStatus::parse)
            .unwrap_or_default();
        let summary = value
            .get("summary")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty());
        Ok(RunSnapshot { status, summary })
    }

    async fn conversation(&self, run_id: &str) -> Result<Vec<ConversationMessage>, BackendError> {
        let value = self
            .request(
                Method::GET,
                &format!("/v0/agents/{}/conversation", run_id),
                None,
            )
            .await?;
        Ok(value
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(message_from_value).collect())
            .unwrap_or_default())
    }

    async fn follow_up(&self, run_id: &str, prompt: &str) -> Result<(), BackendError> {
        self.request(
            Method::POST,
            &format!("/v0/agents/{}/followup", run_id),
            Some(json!({"prompt": {"text": prompt}})),
        )
        .await?;
        Ok(())
    }
}
