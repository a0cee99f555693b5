use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    InvalidPath,
    PathEscape,
    FileNotFound,
    IsDirectory,
    NotADirectory,
    EmptyCommand,
    SessionNotFound,
    StreamNotFound,
    StreamClaimed,
    RateLimited,
    RemoteAgentFailed,
    RemoteAgentTimeout,
    StreamError,
    Io,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "urn:workbench-agent:error:invalid_request",
            Self::InvalidPath => "urn:workbench-agent:error:invalid_path",
            Self::PathEscape => "urn:workbench-agent:error:path_escape",
            Self::FileNotFound => "urn:workbench-agent:error:file_not_found",
            Self::IsDirectory => "urn:workbench-agent:error:is_directory",
            Self::NotADirectory => "urn:workbench-agent:error:not_a_directory",
            Self::EmptyCommand => "urn:workbench-agent:error:empty_command",
            Self::SessionNotFound => "urn:workbench-agent:error:session_not_found",
            Self::StreamNotFound => "urn:workbench-agent:error:stream_not_found",
            Self::StreamClaimed => "urn:workbench-agent:error:stream_claimed",
            Self::RateLimited => "urn:workbench-agent:error:rate_limited",
            Self::RemoteAgentFailed => "urn:workbench-agent:error:remote_agent_failed",
            Self::RemoteAgentTimeout => "urn:workbench-agent:error:remote_agent_timeout",
            Self::StreamError => "urn:workbench-agent:error:stream_error",
            Self::Io => "urn:workbench-agent:error:io",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid Request",
            Self::InvalidPath => "Invalid Path",
            Self::PathEscape => "Path Escapes Workspace",
            Self::FileNotFound => "File Not Found",
            Self::IsDirectory => "Is A Directory",
            Self::NotADirectory => "Not A Directory",
            Self::EmptyCommand => "Empty Command",
            Self::SessionNotFound => "Session Not Found",
            Self::StreamNotFound => "Stream Not Found",
            Self::StreamClaimed => "Stream Already Claimed",
            Self::RateLimited => "Rate Limited",
            Self::RemoteAgentFailed => "Remote Agent Failed",
            Self::RemoteAgentTimeout => "Remote Agent Timeout",
            Self::StreamError => "Stream Error",
            Self::Io => "I/O Error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::InvalidPath => 400,
            Self::PathEscape => 400,
            Self::FileNotFound => 404,
            Self::IsDirectory => 400,
            Self::NotADirectory => 400,
            Self::EmptyCommand => 400,
            Self::SessionNotFound => 404,
            Self::StreamNotFound => 404,
            Self::StreamClaimed => 409,
            Self::RateLimited => 429,
            Self::RemoteAgentFailed => 502,
            Self::RemoteAgentTimeout => 504,
            Self::StreamError => 502,
            Self::Io => 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

/// Errors raised by session, workspace, and streaming operations. Tool-level
/// failures inside an agent run are folded into tool results instead of being
/// raised; only request-path failures become one of these.
#[derive(Debug, Error)]
pub enum WorkbenchError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("invalid path: {path}")]
    InvalidPath { path: String },
    #[error("path escapes workspace: {path}")]
    PathEscape { path: String },
    #[error("file not found: {path}")]
    FileNotFound { path: String },
    #[error("path is a directory, not a file: {path}")]
    IsDirectory { path: String },
    #[error("not a directory: {path}")]
    NotADirectory { path: String },
    #[error("empty command")]
    EmptyCommand,
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },
    #[error("no active stream for session: {session_id}")]
    StreamNotFound { session_id: String },
    #[error("stream already claimed for session: {session_id}")]
    StreamClaimed { session_id: String },
    #[error("rate limited")]
    RateLimited { message: Option<String> },
    #[error("remote agent failed: {message}")]
    RemoteAgentFailed { message: String },
    #[error("remote agent timeout")]
    RemoteAgentTimeout { message: Option<String> },
    #[error("stream error: {message}")]
    StreamError { message: String },
    #[error("io error: {message}")]
    Io { message: String },
}

impl WorkbenchError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::InvalidPath { .. } => ErrorType::InvalidPath,
            Self::PathEscape { .. } => ErrorType::PathEscape,
            Self::FileNotFound { .. } => ErrorType::FileNotFound,
            Self::IsDirectory { .. } => ErrorType::IsDirectory,
            Self::NotADirectory { .. } => ErrorType::NotADirectory,
            Self::EmptyCommand => ErrorType::EmptyCommand,
            Self::SessionNotFound { .. } => ErrorType::SessionNotFound,
            Self::StreamNotFound { .. } => ErrorType::StreamNotFound,
            Self::StreamClaimed { .. } => ErrorType::StreamClaimed,
            Self::RateLimited { .. } => ErrorType::RateLimited,
            Self::RemoteAgentFailed { .. } => ErrorType::RemoteAgentFailed,
            Self::RemoteAgentTimeout { .. } => ErrorType::RemoteAgentTimeout,
            Self::StreamError { .. } => ErrorType::StreamError,
            Self::Io { .. } => ErrorType::Io,
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));

        let mut extensions = Map::new();
        match self {
            Self::InvalidPath { path }
            | Self::PathEscape { path }
            | Self::FileNotFound { path }
            | Self::IsDirectory { path }
            | Self::NotADirectory { path } => {
                extensions.insert("path".to_string(), Value::String(path.clone()));
            }
            Self::SessionNotFound { session_id }
            | Self::StreamNotFound { session_id }
            | Self::StreamClaimed { session_id } => {
                extensions.insert("sessionId".to_string(), Value::String(session_id.clone()));
            }
            Self::RateLimited { message } | Self::RemoteAgentTimeout { message } => {
                if let Some(message) = message {
                    extensions.insert("message".to_string(), Value::String(message.clone()));
                }
            }
            _ => {}
        }
        problem.extensions = extensions;
        problem
    }
}

impl From<WorkbenchError> for ProblemDetails {
    fn from(value: WorkbenchError) -> Self {
        value.to_problem_details()
    }
}

impl From<&WorkbenchError> for ProblemDetails {
    fn from(value: &WorkbenchError) -> Self {
        value.to_problem_details()
    }
}
