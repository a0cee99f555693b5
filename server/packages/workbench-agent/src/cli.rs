use std::io::Write;

use clap::{Args, Parser, Subcommand};

// Include the generated version constant
mod build_version {
    include!(concat!(env!("OUT_DIR"), "/version.rs"));
}
use reqwest::blocking::Client as HttpClient;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::RuntimeConfig;
use crate::lifecycle::SessionLifecycle;
use crate::router::{build_router, AppState};
use crate::router::{
    CreateSessionRequest, DeployGitOptions, DeployRequest, GitCredentials, SendMessageRequest,
    VercelOptions,
};
use crate::router::{
    CreateSessionResponse, DeleteSessionResponse, DeployResponse, FilesResponse, HealthResponse,
    ReadFileResponse, SendMessageResponse,
};
use crate::terminal::{RunCommandRequest, RunCommandResponse};

const API_PREFIX: &str = "/api";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8765;

#[derive(Parser, Debug)]
#[command(name = "workbench-agent", bin_name = "workbench-agent")]
#[command(about = "Agent sessions over sandboxed workspaces", version = build_version::VERSION)]
#[command(arg_required_else_help = true)]
pub struct WorkbenchAgentCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the workbench agent HTTP server.
    Server(ServerArgs),
    /// Call the HTTP API without writing client code.
    Api(ApiArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, short = 'H', default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long = "cors-allow-origin", short = 'O')]
    cors_allow_origin: Vec<String>,

    #[arg(long = "cors-allow-method", short = 'M')]
    cors_allow_method: Vec<String>,

    #[arg(long = "cors-allow-header", short = 'A')]
    cors_allow_header: Vec<String>,

    #[arg(long = "cors-allow-credentials", short = 'C')]
    cors_allow_credentials: bool,
}

#[derive(Args, Debug)]
pub struct ApiArgs {
    #[command(subcommand)]
    command: ApiCommand,
}

#[derive(Subcommand, Debug)]
pub enum ApiCommand {
    /// Show server health and which agent backends are configured.
    Health(ClientArgs),
    /// Create sessions and interact with their runs.
    Sessions(SessionsArgs),
    /// Run a one-shot shell command on the server.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct SessionsArgs {
    #[command(subcommand)]
    command: SessionsCommand,
}

#[derive(Subcommand, Debug)]
pub enum SessionsCommand {
    /// Create a new session, optionally dispatching a first run.
    Create(CreateSessionArgs),
    #[command(name = "send-message")]
    /// Send a message to an existing session.
    SendMessage(SessionMessageArgs),
    #[command(name = "stream")]
    /// Stream run events for a session over SSE.
    Stream(SessionStreamArgs),
    #[command(name = "files")]
    /// List files in the session workspace.
    Files(SessionFilesArgs),
    #[command(name = "read-file")]
    /// Read a file from the session workspace.
    ReadFile(SessionReadFileArgs),
    #[command(name = "deploy")]
    /// Push the workspace to a repository and create a hosting project.
    Deploy(SessionDeployArgs),
    #[command(name = "delete")]
    /// Delete a session and discard its workspace.
    Delete(SessionDeleteArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    #[arg(long, short = 'e')]
    endpoint: Option<String>,
}

#[derive(Args, Debug)]
pub struct CreateSessionArgs {
    /// First user message; the run starts immediately when set.
    #[arg(long, short = 'm')]
    message: Option<String>,
    #[arg(long, short = 'g')]
    git_token: Option<String>,
    #[arg(long, short = 'r')]
    repo_name: Option<String>,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct SessionMessageArgs {
    session_id: String,
    #[arg(long, short = 'm')]
    message: String,
    #[arg(long, short = 'g')]
    git_token: Option<String>,
    #[arg(long, short = 'r')]
    repo_name: Option<String>,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct SessionStreamArgs {
    session_id: String,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct SessionFilesArgs {
    session_id: String,
    /// Directory relative to the workspace root.
    #[arg(default_value = ".")]
    path: String,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct SessionReadFileArgs {
    session_id: String,
    /// File relative to the workspace root.
    path: String,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct SessionDeployArgs {
    session_id: String,
    #[arg(long, short = 'a')]
    app_name: String,
    #[arg(long, short = 'g')]
    git_token: String,
    /// Reuse this repository instead of creating one.
    #[arg(long)]
    repo_url: Option<String>,
    /// Create a fresh repository even if the session already has one.
    #[arg(long)]
    create_new: bool,
    #[arg(long, short = 'v')]
    vercel_token: String,
    #[arg(long, short = 't')]
    team_id: Option<String>,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct SessionDeleteArgs {
    session_id: String,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Command line passed to the configured shell.
    #[arg(long, short = 'c')]
    command: String,
    /// Timeout in seconds; omit for the server default.
    #[arg(long, short = 't')]
    timeout: Option<u64>,
    /// Working directory for the command.
    #[arg(long, short = 'd')]
    cwd: Option<String>,
    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid cors origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("invalid cors method: {0}")]
    InvalidCorsMethod(String),
    #[error("invalid cors header: {0}")]
    InvalidCorsHeader(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error("unexpected http status: {0}")]
    HttpStatus(reqwest::StatusCode),
}

pub fn run_workbench_agent() -> Result<(), CliError> {
    let cli = WorkbenchAgentCli::parse();
    if let Err(err) = init_logging() {
        eprintln!("failed to init logging: {err}");
        return Err(err);
    }
    run_command(&cli.command)
}

pub fn init_logging() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .init();
    Ok(())
}

pub fn run_command(command: &Command) -> Result<(), CliError> {
    match command {
        Command::Server(args) => run_server(args),
        Command::Api(subcommand) => run_api(&subcommand.command),
    }
}

fn run_server(server: &ServerArgs) -> Result<(), CliError> {
    let config = RuntimeConfig::from_env();
    let lifecycle = SessionLifecycle::new(config);
    let state = AppState::new(lifecycle);
    let mut router = build_router(state);

    let cors = build_cors_layer(server)?;
    router = router.layer(cors);

    let addr = format!("{}:{}", server.host, server.port);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Server(err.to_string()))?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "server listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(|err| CliError::Server(err.to_string()))
    })
}

fn run_api(command: &ApiCommand) -> Result<(), CliError> {
    match command {
        ApiCommand::Health(args) => {
            let ctx = ClientContext::new(args)?;
            let response = ctx.get(&format!("{API_PREFIX}/health"))?;
            print_json_response::<HealthResponse>(response)
        }
        ApiCommand::Sessions(subcommand) => run_sessions(&subcommand.command),
        ApiCommand::Run(args) => {
            let ctx = ClientContext::new(&args.client)?;
            let body = RunCommandRequest {
                command: args.command.clone(),
                timeout_seconds: args.timeout,
                cwd: args.cwd.clone(),
            };
            let response = ctx.post(&format!("{API_PREFIX}/run"), &body)?;
            print_json_response::<RunCommandResponse>(response)
        }
    }
}

fn run_sessions(command: &SessionsCommand) -> Result<(), CliError> {
    match command {
        SessionsCommand::Create(args) => {
            let ctx = ClientContext::new(&args.client)?;
            let body = CreateSessionRequest {
                initial_message: args.message.clone(),
                git: git_credentials(args.git_token.as_deref(), args.repo_name.as_deref()),
            };
            let response = ctx.post(&format!("{API_PREFIX}/agent/sessions"), &body)?;
            print_json_response::<CreateSessionResponse>(response)
        }
        SessionsCommand::SendMessage(args) => {
            let ctx = ClientContext::new(&args.client)?;
            let body = SendMessageRequest {
                message: args.message.clone(),
                git: git_credentials(args.git_token.as_deref(), args.repo_name.as_deref()),
            };
            let path = format!("{API_PREFIX}/agent/sessions/{}/messages", args.session_id);
            let response = ctx.post(&path, &body)?;
            print_json_response::<SendMessageResponse>(response)
        }
        SessionsCommand::Stream(args) => {
            let ctx = ClientContext::new(&args.client)?;
            let path = format!("{API_PREFIX}/agent/sessions/{}/stream", args.session_id);
            let response = ctx.get_stream(&path)?;
            print_sse_response(response)
        }
        SessionsCommand::Files(args) => {
            let ctx = ClientContext::new(&args.client)?;
            let path = format!("{API_PREFIX}/agent/sessions/{}/files", args.session_id);
            let response = ctx.get_with_query(&path, &[("path", Some(args.path.clone()))])?;
            print_json_response::<FilesResponse>(response)
        }
        SessionsCommand::ReadFile(args) => {
            let ctx = ClientContext::new(&args.client)?;
            let path = format!("{API_PREFIX}/agent/sessions/{}/files/read", args.session_id);
            let response = ctx.get_with_query(&path, &[("path", Some(args.path.clone()))])?;
            print_json_response::<ReadFileResponse>(response)
        }
        SessionsCommand::Deploy(args) => {
            let ctx = ClientContext::new(&args.client)?;
            let body = DeployRequest {
                app_name: args.app_name.clone(),
                git: DeployGitOptions {
                    token: args.git_token.clone(),
                    repo_url: args.repo_url.clone(),
                    create_new: args.create_new,
                },
                vercel: VercelOptions {
                    token: args.vercel_token.clone(),
                    team_id: args.team_id.clone(),
                },
            };
            let path = format!("{API_PREFIX}/agent/sessions/{}/deploy", args.session_id);
            let response = ctx.post(&path, &body)?;
            print_json_response::<DeployResponse>(response)
        }
        SessionsCommand::Delete(args) => {
            let ctx = ClientContext::new(&args.client)?;
            let path = format!("{API_PREFIX}/agent/sessions/{}", args.session_id);
            let response = ctx.delete(&path)?;
            print_json_response::<DeleteSessionResponse>(response)
        }
    }
}

fn git_credentials(token: Option<&str>, repo_name: Option<&str>) -> Option<GitCredentials> {
    token.map(|token| GitCredentials {
        token: token.to_string(),
        repo_name: repo_name.map(str::to_string),
    })
}

fn build_cors_layer(server: &ServerArgs) -> Result<CorsLayer, CliError> {
    let mut cors = CorsLayer::new();

    // Build origins list from provided origins
    let mut origins = Vec::new();
    for origin in &server.cors_allow_origin {
        let value = origin
            .parse()
            .map_err(|_| CliError::InvalidCorsOrigin(origin.clone()))?;
        origins.push(value);
    }
    if origins.is_empty() {
        // No origins allowed - use permissive CORS with no origins (effectively disabled)
        cors = cors.allow_origin(tower_http::cors::AllowOrigin::predicate(|_, _| false));
    } else {
        cors = cors.allow_origin(origins);
    }

    // Methods: allow any if not specified, otherwise use provided list
    if server.cors_allow_method.is_empty() {
        cors = cors.allow_methods(Any);
    } else {
        let mut methods = Vec::new();
        for method in &server.cors_allow_method {
            let parsed = method
                .parse()
                .map_err(|_| CliError::InvalidCorsMethod(method.clone()))?;
            methods.push(parsed);
        }
        cors = cors.allow_methods(methods);
    }

    // Headers: allow any if not specified, otherwise use provided list
    if server.cors_allow_header.is_empty() {
        cors = cors.allow_headers(Any);
    } else {
        let mut headers = Vec::new();
        for header in &server.cors_allow_header {
            let parsed = header
                .parse()
                .map_err(|_| CliError::InvalidCorsHeader(header.clone()))?;
            headers.push(parsed);
        }
        cors = cors.allow_headers(headers);
    }

    if server.cors_allow_credentials {
        cors = cors.allow_credentials(true);
    }

    Ok(cors)
}

struct ClientContext {
    endpoint: String,
    client: HttpClient,
}

impl ClientContext {
    fn new(args: &ClientArgs) -> Result<Self, CliError> {
        let endpoint = args
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", DEFAULT_HOST, DEFAULT_PORT));
        let client = HttpClient::builder().build()?;
        Ok(Self { endpoint, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::blocking::RequestBuilder {
        self.client.request(method, self.url(path))
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response, CliError> {
        Ok(self.request(Method::GET, path).send()?)
    }

    fn get_with_query(
        &self,
        path: &str,
        query: &[(&str, Option<String>)],
    ) -> Result<reqwest::blocking::Response, CliError> {
        let mut request = self.request(Method::GET, path);
        for (key, value) in query {
            if let Some(value) = value {
                request = request.query(&[(key, value)]);
            }
        }
        Ok(request.send()?)
    }

    /// SSE responses can outlive the default client timeout, so the stream
    /// uses a client with no timeout at all.
    fn get_stream(&self, path: &str) -> Result<reqwest::blocking::Response, CliError> {
        let client = HttpClient::builder().timeout(None).build()?;
        Ok(client.request(Method::GET, self.url(path)).send()?)
    }

    fn post<T: Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::blocking::Response, CliError> {
        Ok(self.request(Method::POST, path).json(body).send()?)
    }

    fn delete(&self, path: &str) -> Result<reqwest::blocking::Response, CliError> {
        Ok(self.request(Method::DELETE, path).send()?)
    }
}

fn print_json_response<T: serde::de::DeserializeOwned + Serialize>(
    response: reqwest::blocking::Response,
) -> Result<(), CliError> {
    let status = response.status();
    let text = response.text()?;

    if !status.is_success() {
        print_error_body(&text)?;
        return Err(CliError::HttpStatus(status));
    }

    let parsed: T = serde_json::from_str(&text)?;
    let pretty = serde_json::to_string_pretty(&parsed)?;
    write_stdout_line(&pretty)?;
    Ok(())
}

fn print_sse_response(mut response: reqwest::blocking::Response) -> Result<(), CliError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text()?;
        print_error_body(&text)?;
        return Err(CliError::HttpStatus(status));
    }

    let mut out = std::io::stdout();
    response.copy_to(&mut out)?;
    out.flush()?;
    Ok(())
}

fn print_error_body(text: &str) -> Result<(), CliError> {
    if let Ok(json) = serde_json::from_str::<Value>(text) {
        let pretty = serde_json::to_string_pretty(&json)?;
        write_stderr_line(&pretty)?;
    } else {
        write_stderr_line(text)?;
    }
    Ok(())
}

fn write_stdout_line(text: &str) -> Result<(), CliError> {
    let mut out = std::io::stdout();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

fn write_stderr_line(text: &str) -> Result<(), CliError> {
    let mut out = std::io::stderr();
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
