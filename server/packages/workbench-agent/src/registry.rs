//! Session Registry - in-memory sessions, each owning a workspace directory.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use utoipa::ToSchema;
use uuid::Uuid;

use workbench_agent_error::WorkbenchError;

const WORKSPACE_PREFIX: &str = "workbench-agent-";

/// Author of a history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of a session's message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Reference to a delegated remote-agent run bound to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentLink {
    pub run_id: String,
    pub repo_url: String,
}

/// Source-hosting credential attached to a session by the caller.
#[derive(Debug, Clone)]
pub struct HostingConnection {
    pub token: String,
    pub repo_name: Option<String>,
}

/// Partial metadata update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub app_name: Option<String>,
    pub repo_url: Option<String>,
    pub deploy_url: Option<String>,
}

/// One live session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub workspace_dir: PathBuf,
    pub messages: Vec<Message>,
    pub agent_link: Option<AgentLink>,
    pub hosting: Option<HostingConnection>,
    pub app_name: Option<String>,
    pub repo_url: Option<String>,
    pub deploy_url: Option<String>,
}

/// Observer for registry mutations, e.g. an external metadata store.
pub trait SessionMirror: Send + Sync {
    fn session_created(&self, _session: &Session) {}
    fn session_deleted(&self, _session_id: &str) {}
}

/// Default mirror that records nothing.
pub struct NullMirror;

impl SessionMirror for NullMirror {}

/// Session Registry tracks live sessions and owns their workspace
/// directories. Workspaces are allocated on create and removed on delete;
/// removal failures are swallowed so deletion always succeeds.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    mirror: Arc<dyn SessionMirror>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_mirror(Arc::new(NullMirror))
    }

    pub fn with_mirror(mirror: Arc<dyn SessionMirror>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            mirror,
        }
    }

    /// Creates a session with a fresh empty workspace directory and returns
    /// a snapshot of it.
    pub async fn create(&self) -> Result<Session, WorkbenchError> {
        let id = Uuid::new_v4().to_string();
        let workspace_dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir()
            .map_err(|e| WorkbenchError::Io {
                message: format!("Failed to allocate workspace: {}", e),
            })?
            .into_path();

        let session = Session {
            id: id.clone(),
            workspace_dir,
            messages: Vec::new(),
            agent_link: None,
            hosting: None,
            app_name: None,
            repo_url: None,
            deploy_url: None,
        };

        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(session.clone())));
        self.mirror.session_created(&session);
        Ok(session)
    }

    /// Returns a point-in-time snapshot of the session.
    pub async fn get(&self, session_id: &str) -> Result<Session, WorkbenchError> {
        self.with_session(session_id, |session| session.clone())
            .await
    }

    pub async fn workspace_dir(&self, session_id: &str) -> Result<PathBuf, WorkbenchError> {
        self.with_session(session_id, |session| session.workspace_dir.clone())
            .await
    }

    pub async fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<(), WorkbenchError> {
        let content = content.into();
        self.with_session(session_id, |session| {
            session.messages.push(Message { role, content });
        })
        .await
    }

    pub async fn set_agent_link(
        &self,
        session_id: &str,
        link: AgentLink,
    ) -> Result<(), WorkbenchError> {
        self.with_session(session_id, |session| {
            session.agent_link = Some(link);
        })
        .await
    }

    pub async fn set_hosting(
        &self,
        session_id: &str,
        hosting: HostingConnection,
    ) -> Result<(), WorkbenchError> {
        self.with_session(session_id, |session| {
            session.hosting = Some(hosting);
        })
        .await
    }

    pub async fn update_metadata(
        &self,
        session_id: &str,
        update: MetadataUpdate,
    ) -> Result<(), WorkbenchError> {
        self.with_session(session_id, |session| {
            if let Some(app_name) = update.app_name {
                session.app_name = Some(app_name);
            }
            if let Some(repo_url) = update.repo_url {
                session.repo_url = Some(repo_url);
            }
            if let Some(deploy_url) = update.deploy_url {
                session.deploy_url = Some(deploy_url);
            }
        })
        .await
    }

    /// Removes the session and its workspace directory. Unknown ids and
    /// cleanup failures are ignored.
    pub async fn delete(&self, session_id: &str) {
        let removed = self.sessions.write().await.remove(session_id);
        if let Some(session) = removed {
            let workspace_dir = session.lock().await.workspace_dir.clone();
            if workspace_dir.is_dir() {
                if let Err(e) = fs::remove_dir_all(&workspace_dir) {
                    tracing::warn!(
                        "Failed to remove workspace {}: {}",
                        workspace_dir.display(),
                        e
                    );
                }
            }
            self.mirror.session_deleted(session_id);
        }
    }

    async fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Result<T, WorkbenchError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| WorkbenchError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        let mut guard = session.lock().await;
        Ok(f(&mut guard))
    }
}
