//! Deploy platform client speaking the Vercel projects API.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};

use crate::hosting::repo_slug;
use crate::BackendError;

pub const DEFAULT_VERCEL_API_BASE: &str = "https://api.vercel.com";

#[async_trait::async_trait]
pub trait DeployApi: Send + Sync {
    /// Creates a project linked to an already-pushed GitHub repo and
    /// returns the URL the first deployment will land on.
    async fn create_project(
        &self,
        token: &str,
        name: &str,
        repo_url: &str,
        team_id: Option<&str>,
        framework: &str,
    ) -> Result<String, BackendError>;
}

pub struct VercelClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for VercelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl VercelClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: DEFAULT_VERCEL_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait::async_trait]
impl DeployApi for VercelClient {
    async fn create_project(
        &self,
        token: &str,
        name: &str,
        repo_url: &str,
        team_id: Option<&str>,
        framework: &str,
    ) -> Result<String, BackendError> {
        let Some(slug) = repo_slug(repo_url) else {
            return Err(BackendError::Api {
                message: "Invalid GitHub repo URL".to_string(),
            });
        };

        let mut payload = json!({
            "name": name,
            "framework": framework,
            "gitRepository": {"type": "github", "repo": slug},
        });
        if let Some(team_id) = team_id {
            payload["teamId"] = json!(team_id);
        }

        let response = self
            .http
            .post(format!("{}/v11/projects", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .json(&payload)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if status != 201 {
            let message = if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                body
            };
            return Err(BackendError::Api { message });
        }

        // The project link may surface as a plain string; otherwise the
        // project name determines the default domain.
        let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        let link = parsed
            .get("link")
            .and_then(Value::as_str)
            .or_else(|| {
                parsed
                    .get("project")
                    .and_then(|p| p.get("link"))
                    .and_then(Value::as_str)
            });
        Ok(match link {
            Some(link) if link.starts_with("http") => link.to_string(),
            Some(link) => format!("https://{}", link),
            None => format!("https://{}.vercel.app", name),
        })
    }
}
