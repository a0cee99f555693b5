//! Runtime configuration, read from the environment once at startup.

use std::env;

use workbench_agent_backends::ai::DEFAULT_GEMINI_MODEL;

pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_GEMINI_MODEL: &str = "GEMINI_APP_MODEL";
pub const ENV_CLOUD_AGENT_API_KEY: &str = "CLOUD_AGENT_API_KEY";
pub const ENV_CLOUD_AGENT_BASE_URL: &str = "CLOUD_AGENT_BASE_URL";
pub const ENV_GITHUB_TOKEN: &str = "AGENT_GITHUB_TOKEN";
pub const ENV_SHELL: &str = "SHELL";

const DEFAULT_SHELL: &str = "/bin/bash";

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub cloud_agent_api_key: Option<String>,
    pub cloud_agent_base_url: Option<String>,
    pub github_token: Option<String>,
    pub shell: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: non_empty(ENV_GEMINI_API_KEY),
            gemini_model: non_empty(ENV_GEMINI_MODEL)
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            cloud_agent_api_key: non_empty(ENV_CLOUD_AGENT_API_KEY),
            cloud_agent_base_url: non_empty(ENV_CLOUD_AGENT_BASE_URL),
            github_token: non_empty(ENV_GITHUB_TOKEN),
            shell: non_empty(ENV_SHELL).unwrap_or_else(|| DEFAULT_SHELL.to_string()),
        }
    }

    /// Whether runs can be delegated to the cloud agent at all.
    pub fn cloud_configured(&self) -> bool {
        self.cloud_agent_api_key.is_some()
    }

    /// Hosting token for a run: the session's own token wins, the
    /// environment token is the fallback.
    pub fn resolve_github_token(&self, session_token: Option<&str>) -> Option<String> {
        session_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| self.github_token.clone())
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
