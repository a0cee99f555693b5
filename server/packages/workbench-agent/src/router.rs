//! HTTP surface: session routes, the SSE log stream, the one-shot command
//! endpoint, and the interactive terminal socket.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{delete, get, post};
use axum::Json;
use axum::Router;
use futures::stream;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{Modify, OpenApi, ToSchema};

use workbench_agent_error::{ErrorType, ProblemDetails, WorkbenchError};

use crate::events::{RunEvent, StreamConfig, StreamFrame, STREAM_CEILING};
use crate::lifecycle::{DeployParams, SessionLifecycle};
use crate::registry::{HostingConnection, Message, Role};
use crate::terminal::{self, RunCommandRequest, RunCommandResponse};
use crate::workspace::WorkspaceEntry;

#[derive(Clone)]
pub struct AppState {
    lifecycle: SessionLifecycle,
}

impl AppState {
    pub fn new(lifecycle: SessionLifecycle) -> Self {
        Self { lifecycle }
    }
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(get_root))
        .route("/api/agent/sessions", post(create_session))
        .route("/api/agent/sessions/:session_id", delete(delete_session))
        .route(
            "/api/agent/sessions/:session_id/messages",
            post(send_message),
        )
        .route(
            "/api/agent/sessions/:session_id/stream",
            get(stream_session),
        )
        .route(
            "/api/agent/sessions/:session_id/files",
            get(list_session_files),
        )
        .route(
            "/api/agent/sessions/:session_id/files/read",
            get(read_session_file),
        )
        .route(
            "/api/agent/sessions/:session_id/deploy",
            post(deploy_session),
        )
        .route("/api/run", post(run_command))
        .route("/api/health", get(get_health))
        .route("/ws", get(terminal_socket))
        .with_state(state);

    let http_logging = match std::env::var("WORKBENCH_AGENT_LOG_HTTP") {
        Ok(value) if value == "0" || value.eq_ignore_ascii_case("false") => false,
        _ => true,
    };
    if http_logging {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|req: &Request<_>| {
                tracing::info_span!(
                    "http.request",
                    method = %req.method(),
                    uri = %req.uri()
                )
            })
            .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                tracing::info!(
                    parent: span,
                    status = %res.status(),
                    latency_ms = latency.as_millis()
                );
            });
        router = router.layer(trace_layer);
    }

    router
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_health,
        create_session,
        send_message,
        stream_session,
        list_session_files,
        read_session_file,
        deploy_session,
        delete_session,
        run_command
    ),
    components(
        schemas(
            CreateSessionRequest,
            GitCredentials,
            CreateSessionResponse,
            SendMessageRequest,
            SendMessageResponse,
            FilesQuery,
            FilesResponse,
            ReadFileQuery,
            ReadFileResponse,
            DeployRequest,
            DeployGitOptions,
            VercelOptions,
            DeployResponse,
            DeleteSessionResponse,
            HealthResponse,
            HealthDebug,
            RunCommandRequest,
            RunCommandResponse,
            RunEvent,
            Message,
            Role,
            WorkspaceEntry,
            ProblemDetails,
            ErrorType
        )
    ),
    tags(
        (name = "meta", description = "Service metadata"),
        (name = "sessions", description = "Agent sessions"),
        (name = "terminal", description = "Command execution")
    ),
    modifiers(&ServerAddon)
)]
pub struct ApiDoc;

struct ServerAddon;

impl Modify for ServerAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.servers = Some(vec![utoipa::openapi::Server::new("http://localhost:8765")]);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Workbench(#[from] WorkbenchError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem: ProblemDetails = match &self {
            ApiError::Workbench(err) => err.to_problem_details(),
        };
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub initial_message: Option<String>,
    #[serde(default)]
    pub git: Option<GitCredentials>,
}

/// Hosting credential a client can attach to a session. The token routes a
/// run to the cloud agent; `repo_name` seeds the name of the repository it
/// provisions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitCredentials {
    pub token: String,
    #[serde(default)]
    pub repo_name: Option<String>,
}

impl GitCredentials {
    fn into_hosting(self) -> HostingConnection {
        HostingConnection {
            token: self.token,
            repo_name: self.repo_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub reply: Option<String>,
    pub message_history: Option<Vec<Message>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(default)]
    pub git: Option<GitCredentials>,
}

/// `reply` and `tool_summary` are always null: the run is asynchronous and
/// the reply arrives as the stream's `completed` event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub reply: Option<String>,
    pub tool_summary: Option<Vec<String>>,
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct FilesQuery {
    #[serde(default = "default_list_path")]
    pub path: String,
}

fn default_list_path() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilesResponse {
    pub entries: Vec<WorkspaceEntry>,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct ReadFileQuery {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileResponse {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub app_name: String,
    pub git: DeployGitOptions,
    pub vercel: VercelOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployGitOptions {
    pub token: String,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub create_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VercelOptions {
    pub token: String,
    #[serde(default)]
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub repo_url: String,
    pub deploy_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSessionResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub debug: HealthDebug,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthDebug {
    pub gemini_api_key_set: bool,
    pub cloud_agent_key_set: bool,
    pub github_token_set: bool,
    pub agent_backend: String,
}

const SERVER_INFO: &str = "\
This is a Workbench Agent server. Available endpoints:\n\
  - GET  /                    - Server info\n\
  - GET  /api/health          - Health check\n\
  - POST /api/agent/sessions  - Create an agent session\n\
  - GET  /ws                  - Interactive terminal socket\n";

async fn get_root() -> &'static str {
    SERVER_INFO
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, body = HealthResponse)),
    tag = "meta"
)]
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.lifecycle.config();
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "workbench-agent".to_string(),
        debug: HealthDebug {
            gemini_api_key_set: config.gemini_api_key.is_some(),
            cloud_agent_key_set: config.cloud_configured(),
            github_token_set: config.github_token.is_some(),
            agent_backend: state.lifecycle.agent_backend().to_string(),
        },
    })
}

#[utoipa::path(
    post,
    path = "/api/agent/sessions",
    request_body = CreateSessionRequest,
    responses((status = 200, body = CreateSessionResponse)),
    tag = "sessions"
)]
async fn create_session(
    State(state): State<AppState>,
    request: Option<Json<CreateSessionRequest>>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    // The body is optional; a bare POST creates an idle session.
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let session_id = state
        .lifecycle
        .create_session(
            request.initial_message.as_deref(),
            request.git.map(GitCredentials::into_hosting),
        )
        .await?;
    Ok(Json(CreateSessionResponse {
        session_id,
        reply: None,
        message_history: None,
    }))
}

#[utoipa::path(
    post,
    path = "/api/agent/sessions/{session_id}/messages",
    request_body = SendMessageRequest,
    responses(
        (status = 200, body = SendMessageResponse),
        (status = 404, body = ProblemDetails)
    ),
    params(("session_id" = String, Path, description = "Session id")),
    tag = "sessions"
)]
async fn send_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    state
        .lifecycle
        .send_message(
            &session_id,
            &request.message,
            request.git.map(GitCredentials::into_hosting),
        )
        .await?;
    Ok(Json(SendMessageResponse {
        reply: None,
        tool_summary: None,
        streaming: true,
    }))
}

/// Discards the session's log channel once the client stops reading,
/// whether the stream finished or the connection dropped.
struct StreamCleanup {
    lifecycle: SessionLifecycle,
    session_id: String,
}

impl Drop for StreamCleanup {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.clone();
        let session_id = std::mem::take(&mut self.session_id);
        tokio::spawn(async move {
            lifecycle.channels().discard(&session_id).await;
        });
    }
}

fn to_sse_event(event: &RunEvent) -> Event {
    Event::default()
        .event(event.kind())
        .json_data(event)
        .unwrap_or_else(|_| Event::default().event(event.kind()).data("{}"))
}

fn with_sse_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

#[utoipa::path(
    get,
    path = "/api/agent/sessions/{session_id}/stream",
    responses(
        (status = 200, description = "SSE stream of run events: `progress`, then one `completed` or `failed`"),
        (status = 404, body = ProblemDetails),
        (status = 409, body = ProblemDetails)
    ),
    params(("session_id" = String, Path, description = "Session id")),
    tag = "sessions"
)]
async fn stream_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    state.lifecycle.registry().get(&session_id).await?;
    let drain = state
        .lifecycle
        .channels()
        .claim(&session_id, StreamConfig::default())
        .await?;
    let cleanup = StreamCleanup {
        lifecycle: state.lifecycle.clone(),
        session_id,
    };

    let stream = stream::unfold((drain, cleanup), |(mut drain, cleanup)| async move {
        match drain.next_frame().await {
            Some(StreamFrame::Keepalive) => Some((
                Ok::<Event, Infallible>(Event::default().comment("keepalive")),
                (drain, cleanup),
            )),
            Some(StreamFrame::Event(event)) => Some((Ok(to_sse_event(&event)), (drain, cleanup))),
            Some(StreamFrame::TimedOut) => {
                let failed = RunEvent::Failed {
                    error: format!("No events received within {}s", STREAM_CEILING.as_secs()),
                };
                Some((Ok(to_sse_event(&failed)), (drain, cleanup)))
            }
            Some(StreamFrame::Closed) | None => None,
        }
    });

    Ok(with_sse_headers(Sse::new(stream).into_response()))
}

#[utoipa::path(
    get,
    path = "/api/agent/sessions/{session_id}/files",
    params(
        ("session_id" = String, Path, description = "Session id"),
        ("path" = Option<String>, Query, description = "Directory relative to the workspace root, defaults to `.`")
    ),
    responses(
        (status = 200, body = FilesResponse),
        (status = 400, body = ProblemDetails),
        (status = 404, body = ProblemDetails)
    ),
    tag = "sessions"
)]
async fn list_session_files(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<FilesResponse>, ApiError> {
    let entries = state.lifecycle.list_files(&session_id, &query.path).await?;
    Ok(Json(FilesResponse {
        entries,
        path: query.path,
    }))
}

#[utoipa::path(
    get,
    path = "/api/agent/sessions/{session_id}/files/read",
    params(
        ("session_id" = String, Path, description = "Session id"),
        ("path" = String, Query, description = "File relative to the workspace root")
    ),
    responses(
        (status = 200, body = ReadFileResponse),
        (status = 400, body = ProblemDetails),
        (status = 404, body = ProblemDetails)
    ),
    tag = "sessions"
)]
async fn read_session_file(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ReadFileQuery>,
) -> Result<Json<ReadFileResponse>, ApiError> {
    let content = state.lifecycle.read_file(&session_id, &query.path).await?;
    Ok(Json(ReadFileResponse { content }))
}

#[utoipa::path(
    post,
    path = "/api/agent/sessions/{session_id}/deploy",
    request_body = DeployRequest,
    responses(
        (status = 200, body = DeployResponse),
        (status = 400, body = ProblemDetails),
        (status = 404, body = ProblemDetails)
    ),
    params(("session_id" = String, Path, description = "Session id")),
    tag = "sessions"
)]
async fn deploy_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<DeployRequest>,
) -> Result<Json<DeployResponse>, ApiError> {
    let outcome = state
        .lifecycle
        .deploy(
            &session_id,
            DeployParams {
                app_name: request.app_name,
                git_token: request.git.token,
                repo_url: request.git.repo_url,
                create_new: request.git.create_new,
                vercel_token: request.vercel.token,
                vercel_team_id: request.vercel.team_id,
            },
        )
        .await?;
    Ok(Json(DeployResponse {
        repo_url: outcome.repo_url,
        deploy_url: outcome.deploy_url,
        error: outcome.error,
    }))
}

#[utoipa::path(
    delete,
    path = "/api/agent/sessions/{session_id}",
    responses((status = 200, body = DeleteSessionResponse)),
    params(("session_id" = String, Path, description = "Session id")),
    tag = "sessions"
)]
async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<DeleteSessionResponse> {
    state.lifecycle.delete_session(&session_id).await;
    Json(DeleteSessionResponse {
        status: "deleted".to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/api/run",
    request_body = RunCommandRequest,
    responses((status = 200, body = RunCommandResponse)),
    tag = "terminal"
)]
async fn run_command(
    State(state): State<AppState>,
    Json(request): Json<RunCommandRequest>,
) -> Json<RunCommandResponse> {
    Json(terminal::run_command(&state.lifecycle.config().shell, &request).await)
}

async fn terminal_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let shell = state.lifecycle.config().shell.clone();
    ws.on_upgrade(move |socket| async move {
        match terminal::spawn_shell(&shell) {
            Ok(session) => terminal::bridge(socket, session).await,
            Err(e) => tracing::warn!("Failed to spawn terminal shell: {}", e),
        }
    })
}
