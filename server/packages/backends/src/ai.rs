//! AI model backend speaking the Gemini `generateContent` wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retry::RetryPolicy;
use crate::BackendError;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

const TEMPERATURE: f32 = 0.2;

/// Conversation role on the model wire. History `assistant` entries map to
/// `Model` before they are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

/// Tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

/// Tool result folded back into the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

/// One part of a turn. Exactly one field is set per part on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl TurnPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn function_call(name: impl Into<String>, args: Value) -> Self {
        Self {
            function_call: Some(FunctionCall {
                name: name.into(),
                args,
            }),
            ..Default::default()
        }
    }

    pub fn function_response(name: impl Into<String>, response: Value) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                name: name.into(),
                response,
            }),
            ..Default::default()
        }
    }
}

/// One turn of the model conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    pub role: TurnRole,
    #[serde(default)]
    pub parts: Vec<TurnPart>,
}

impl ModelTurn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            parts: vec![TurnPart::text(text)],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            parts: vec![TurnPart::text(text)],
        }
    }

    /// Tool results go back to the model as a single user turn, in the
    /// order the invocations were requested.
    pub fn tool_results(parts: Vec<TurnPart>) -> Self {
        Self {
            role: TurnRole::User,
            parts,
        }
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts
            .iter()
            .filter_map(|p| p.function_call.as_ref())
            .collect()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| p.text.as_deref())
    }

    pub fn joined_text(&self) -> String {
        self.texts().collect::<Vec<_>>().join("\n")
    }
}

/// Declaration of one callable tool, `parameters` is a JSON schema object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Model backend: one conversation in, one model turn out.
#[async_trait::async_trait]
pub trait AiBackend: Send + Sync {
    async fn generate(
        &self,
        system_instruction: &str,
        conversation: &[ModelTurn],
        tools: &[ToolDecl],
    ) -> Result<ModelTurn, BackendError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Instruction<'a>,
    contents: &'a [ModelTurn],
    tools: [ToolCatalogue<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Instruction<'a> {
    parts: [InstructionPart<'a>; 1],
}

#[derive(Serialize)]
struct InstructionPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolCatalogue<'a> {
    function_declarations: &'a [ToolDecl],
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ModelTurn>,
}

/// Client for the Gemini REST API. Rate limits and service unavailability
/// are retried with exponential backoff before surfacing.
pub struct GeminiBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send(
        &self,
        url: &str,
        request: &GenerateRequest<'_>,
    ) -> Result<ModelTurn, BackendError> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            let message = format!("Gemini API error: {}", api_error_message(&body, status));
            return Err(match status {
                429 => BackendError::RateLimited { message },
                503 => BackendError::Unavailable { message },
                401 | 403 => BackendError::Auth { message },
                _ => BackendError::Api { message },
            });
        }
        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            BackendError::Api {
                message: format!("Gemini API returned an unexpected body: {}", e),
            }
        })?;
        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .unwrap_or(ModelTurn {
                role: TurnRole::Model,
                parts: Vec::new(),
            }))
    }
}

fn api_error_message(body: &str, status: u16) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| format!("HTTP {}", status))
}

#[async_trait::async_trait]
impl AiBackend for GeminiBackend {
    async fn generate(
        &self,
        system_instruction: &str,
        conversation: &[ModelTurn],
        tools: &[ToolDecl],
    ) -> Result<ModelTurn, BackendError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let request = GenerateRequest {
            system_instruction: Instruction {
                parts: [InstructionPart {
                    text: system_instruction,
                }],
            },
            contents: conversation,
            tools: [ToolCatalogue {
                function_declarations: tools,
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
        };

        let url = &url;
        let request = &request;
        self.retry
            .run(move || async move { self.send(url, request).await })
            .await
    }
}
