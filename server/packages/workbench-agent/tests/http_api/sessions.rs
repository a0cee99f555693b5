use super::*;

#[tokio::test]
async fn create_without_body_returns_an_idle_session() {
    let test_app = TestApp::local("unused");

    let (status, _, body) =
        send_request(&test_app.app, Method::POST, "/api/agent/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    let body = parse_json(&body);
    let session_id = body["sessionId"].as_str().expect("session id");
    assert!(!session_id.is_empty());
    assert!(body["reply"].is_null());
    assert!(body["messageHistory"].is_null());

    // No run was dispatched, so there is no stream to claim.
    let (status, _, body) = send_request(
        &test_app.app,
        Method::GET,
        &format!("/api/agent/sessions/{session_id}/stream"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        parse_json(&body)["type"],
        "urn:workbench-agent:error:stream_not_found"
    );
}

#[tokio::test]
async fn create_with_initial_message_streams_the_reply() {
    let test_app = TestApp::local("Here is your app.");

    let (status, _, body) = send_request(
        &test_app.app,
        Method::POST,
        "/api/agent/sessions",
        Some(json!({ "initialMessage": "Build me a todo app" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    let (status, _, sse) = collect_sse(&test_app.app, &session_id).await;
    assert_eq!(status, StatusCode::OK);
    let events = parse_sse_events(&sse);
    assert!(events.len() >= 2);
    assert_eq!(events[0].0, "progress");
    assert_eq!(events[0].1["message"], "[Step] Starting agent...");
    let (last_name, last_payload) = events.last().expect("terminal event");
    assert_eq!(last_name, "completed");
    assert_eq!(last_payload["reply"], "Here is your app.");
    assert_eq!(last_payload["toolSummaries"], json!([]));

    let history = wait_for_history(&test_app.lifecycle, &session_id, 2).await;
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "Build me a todo app");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "Here is your app.");
}

#[tokio::test]
async fn send_message_starts_a_run_and_reports_streaming() {
    let test_app = TestApp::local("Done.");

    let (_, _, body) =
        send_request(&test_app.app, Method::POST, "/api/agent/sessions", None).await;
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    let (status, _, body) = send_request(
        &test_app.app,
        Method::POST,
        &format!("/api/agent/sessions/{session_id}/messages"),
        Some(json!({ "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse_json(&body);
    assert!(body["reply"].is_null());
    assert!(body["toolSummary"].is_null());
    assert_eq!(body["streaming"], true);

    let (_, _, sse) = collect_sse(&test_app.app, &session_id).await;
    let events = parse_sse_events(&sse);
    assert_eq!(events.last().expect("terminal event").0, "completed");

    let history = wait_for_history(&test_app.lifecycle, &session_id, 2).await;
    assert_eq!(history[0].content, "hello");
    assert_eq!(history[1].content, "Done.");
}

#[tokio::test]
async fn send_message_to_unknown_session_is_a_problem() {
    let test_app = TestApp::local("unused");

    let (status, _, body) = send_request(
        &test_app.app,
        Method::POST,
        "/api/agent/sessions/nope/messages",
        Some(json!({ "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body = parse_json(&body);
    assert_eq!(body["type"], "urn:workbench-agent:error:session_not_found");
    assert_eq!(body["status"], 404);
    assert_eq!(body["sessionId"], "nope");
}

#[tokio::test]
async fn files_endpoints_round_trip_the_workspace() {
    let test_app = TestApp::local("unused");

    let (_, _, body) =
        send_request(&test_app.app, Method::POST, "/api/agent/sessions", None).await;
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    let (status, _, body) = send_request(
        &test_app.app,
        Method::GET,
        &format!("/api/agent/sessions/{session_id}/files"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse_json(&body);
    assert_eq!(body["path"], ".");
    assert_eq!(body["entries"], json!([]));

    let workspace = test_app
        .lifecycle
        .registry()
        .workspace_dir(&session_id)
        .await
        .expect("workspace dir");
    std::fs::create_dir(workspace.join("src")).expect("create dir");
    std::fs::write(workspace.join("notes.txt"), "remember the milk").expect("write file");

    let (status, _, body) = send_request(
        &test_app.app,
        Method::GET,
        &format!("/api/agent/sessions/{session_id}/files"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = parse_json(&body)["entries"].clone();
    let entries = entries.as_array().expect("entries array");
    assert!(entries
        .iter()
        .any(|e| e["name"] == "notes.txt" && e["type"] == "file"));
    assert!(entries
        .iter()
        .any(|e| e["name"] == "src" && e["type"] == "directory"));

    let (status, _, body) = send_request(
        &test_app.app,
        Method::GET,
        &format!("/api/agent/sessions/{session_id}/files/read?path=notes.txt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(&body)["content"], "remember the milk");

    let (status, _, body) = send_request(
        &test_app.app,
        Method::GET,
        &format!("/api/agent/sessions/{session_id}/files/read?path=missing.txt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        parse_json(&body)["type"],
        "urn:workbench-agent:error:file_not_found"
    );

    let (status, _, body) = send_request(
        &test_app.app,
        Method::GET,
        &format!("/api/agent/sessions/{session_id}/files?path=../"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        parse_json(&body)["type"],
        "urn:workbench-agent:error:path_escape"
    );

    let (status, _, body) = send_request(
        &test_app.app,
        Method::GET,
        "/api/agent/sessions/nope/files",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        parse_json(&body)["type"],
        "urn:workbench-agent:error:session_not_found"
    );
}

#[tokio::test]
async fn delete_is_idempotent() {
    let test_app = TestApp::local("unused");

    let (_, _, body) =
        send_request(&test_app.app, Method::POST, "/api/agent/sessions", None).await;
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    let uri = format!("/api/agent/sessions/{session_id}");
    let (status, _, body) = send_request(&test_app.app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(&body)["status"], "deleted");

    // Deleting again (or deleting an unknown id) reports the same outcome.
    let (status, _, body) = send_request(&test_app.app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(&body)["status"], "deleted");

    let (status, _, _) = send_request(
        &test_app.app,
        Method::GET,
        &format!("/api/agent/sessions/{session_id}/files"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deploy_reports_the_project_urls() {
    let hosting = Arc::new(FakeHosting::default());
    let test_app = TestApp::build(
        Some(Arc::new(CannedAi::new("unused"))),
        hosting.clone(),
        Arc::new(FakeDeploy::default()),
    );

    let (_, _, body) =
        send_request(&test_app.app, Method::POST, "/api/agent/sessions", None).await;
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    let (status, _, body) = send_request(
        &test_app.app,
        Method::POST,
        &format!("/api/agent/sessions/{session_id}/deploy"),
        Some(json!({
            "appName": "My App",
            "git": { "token": "ghp_deploy", "createNew": true },
            "vercel": { "token": "vc_token", "teamId": "team_1" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse_json(&body);
    assert_eq!(body["repoUrl"], "https://github.com/acme/My-App");
    assert_eq!(body["deployUrl"], "https://My-App.vercel.app");
    assert!(body["error"].is_null());

    assert_eq!(hosting.pushes.lock().expect("pushes lock").len(), 1);

    let session = test_app
        .lifecycle
        .registry()
        .get(&session_id)
        .await
        .expect("session exists");
    assert_eq!(
        session.repo_url.as_deref(),
        Some("https://github.com/acme/My-App")
    );
    assert_eq!(
        session.deploy_url.as_deref(),
        Some("https://My-App.vercel.app")
    );
}

#[tokio::test]
async fn deploy_platform_failure_is_reported_in_band() {
    let test_app = TestApp::build(
        Some(Arc::new(CannedAi::new("unused"))),
        Arc::new(FakeHosting::default()),
        Arc::new(FakeDeploy { fail: true }),
    );

    let (_, _, body) =
        send_request(&test_app.app, Method::POST, "/api/agent/sessions", None).await;
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    let (status, _, body) = send_request(
        &test_app.app,
        Method::POST,
        &format!("/api/agent/sessions/{session_id}/deploy"),
        Some(json!({
            "appName": "My App",
            "git": { "token": "ghp_deploy", "createNew": true },
            "vercel": { "token": "vc_token" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = parse_json(&body);
    assert_eq!(body["repoUrl"], "https://github.com/acme/My-App");
    assert!(body["deployUrl"].is_null());
    assert_eq!(body["error"], "project rejected");
}

#[tokio::test]
async fn deploy_rejects_blank_app_names() {
    let test_app = TestApp::local("unused");

    let (_, _, body) =
        send_request(&test_app.app, Method::POST, "/api/agent/sessions", None).await;
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    let (status, _, body) = send_request(
        &test_app.app,
        Method::POST,
        &format!("/api/agent/sessions/{session_id}/deploy"),
        Some(json!({
            "appName": "   ",
            "git": { "token": "ghp_deploy", "createNew": true },
            "vercel": { "token": "vc_token" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        parse_json(&body)["type"],
        "urn:workbench-agent:error:invalid_request"
    );
}
