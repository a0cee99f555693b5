use super::*;

use utoipa::OpenApi;
use workbench_agent::router::ApiDoc;

#[tokio::test]
async fn run_executes_commands_with_the_configured_shell() {
    let test_app = TestApp::local("unused");

    let (status, _, body) = send_request(
        &test_app.app,
        Method::POST,
        "/api/run",
        Some(json!({ "command": "printf hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse_json(&body);
    assert_eq!(body["ok"], true);
    assert_eq!(body["stdout"], "hello");
    assert_eq!(body["stderr"], "");
    assert_eq!(body["exitCode"], 0);
    assert_eq!(body["timedOut"], false);
}

#[tokio::test]
async fn run_reports_failures_in_band() {
    let test_app = TestApp::local("unused");

    let (status, _, body) = send_request(
        &test_app.app,
        Method::POST,
        "/api/run",
        Some(json!({ "command": "exit 3" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse_json(&body);
    assert_eq!(body["ok"], false);
    assert_eq!(body["exitCode"], 3);
    assert_eq!(body["timedOut"], false);

    let (status, _, body) = send_request(
        &test_app.app,
        Method::POST,
        "/api/run",
        Some(json!({ "command": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse_json(&body);
    assert_eq!(body["ok"], false);
    assert_eq!(body["exitCode"], -1);
    assert_eq!(body["stderr"], "Command is empty");
}

#[tokio::test]
async fn run_enforces_the_requested_timeout() {
    let test_app = TestApp::local("unused");

    let (status, _, body) = send_request(
        &test_app.app,
        Method::POST,
        "/api/run",
        Some(json!({ "command": "sleep 5", "timeoutSeconds": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse_json(&body);
    assert_eq!(body["ok"], false);
    assert_eq!(body["exitCode"], -1);
    assert_eq!(body["timedOut"], true);
}

#[tokio::test]
async fn health_reports_configured_backends() {
    let test_app = TestApp::local("unused");

    let (status, _, body) = send_request(&test_app.app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = parse_json(&body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "workbench-agent");
    assert_eq!(body["debug"]["geminiApiKeySet"], true);
    assert_eq!(body["debug"]["cloudAgentKeySet"], false);
    assert_eq!(body["debug"]["githubTokenSet"], false);
    assert_eq!(body["debug"]["agentBackend"], "local");
}

#[tokio::test]
async fn root_banner_and_unknown_routes() {
    let test_app = TestApp::local("unused");

    let (status, _, body) = send_request(&test_app.app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("Workbench Agent server"));

    let (status, _, _) = send_request(&test_app.app, Method::GET, "/api/anything", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn openapi_document_describes_the_surface() {
    let doc = serde_json::to_value(ApiDoc::openapi()).expect("serialize openapi");

    let paths = doc["paths"].as_object().expect("paths object");
    assert!(paths.contains_key("/api/agent/sessions"));
    assert!(paths.contains_key("/api/agent/sessions/{session_id}/stream"));
    assert!(paths.contains_key("/api/run"));

    let schemas = doc["components"]["schemas"].as_object().expect("schemas");
    assert!(schemas.contains_key("RunEvent"));
    assert!(schemas.contains_key("ProblemDetails"));
}
