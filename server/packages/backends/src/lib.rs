//! Clients for the external services a run can lean on: the AI model
//! backend, the cloud-agent API, source hosting, and the deploy platform.
//!
//! Each service is fronted by a trait so the orchestrator can be exercised
//! with in-process fakes; the real clients speak the provider wire formats.

use thiserror::Error;

pub mod ai;
pub mod cloud;
pub mod deploy;
pub mod hosting;
mod retry;

pub use ai::{AiBackend, FunctionCall, FunctionResponse, GeminiBackend, ModelTurn, ToolDecl, TurnPart, TurnRole};
pub use cloud::{CloudAgentApi, CloudAgentClient, ConversationMessage, LaunchRequest, RunSnapshot, RunStatus};
pub use deploy::{DeployApi, VercelClient};
pub use hosting::{repo_slug, run_git, slugify, tokenized_push_url, GitHubClient, HostingApi};
pub use retry::RetryPolicy;

/// Failures talking to an external service.
///
/// `RateLimited` and `Unavailable` are retried internally with backoff
/// before they surface; everything else surfaces on first occurrence.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{message}")]
    RateLimited { message: String },
    #[error("{message}")]
    Unavailable { message: String },
    #[error("{message}")]
    Auth { message: String },
    /// Error reported by the remote API, message already carries context.
    #[error("{message}")]
    Api { message: String },
    #[error("request failed: {message}")]
    Http { message: String },
    #[error("{message}")]
    Git { message: String },
    #[error("{message}")]
    Timeout { message: String },
}

impl BackendError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, BackendError::RateLimited { .. })
    }

    pub(crate) fn is_retriable(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited { .. } | BackendError::Unavailable { .. }
        )
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Http {
            message: e.to_string(),
        }
    }
}
