use super::*;

#[tokio::test]
async fn stream_for_unknown_session_is_not_found() {
    let test_app = TestApp::local("unused");

    let (status, _, body) = send_request(
        &test_app.app,
        Method::GET,
        "/api/agent/sessions/nope/stream",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body = parse_json(&body);
    assert_eq!(body["type"], "urn:workbench-agent:error:session_not_found");
    assert_eq!(body["sessionId"], "nope");
}

#[tokio::test]
async fn stream_carries_sse_and_proxy_headers() {
    let test_app = TestApp::local("All done.");

    let (_, _, body) = send_request(
        &test_app.app,
        Method::POST,
        "/api/agent/sessions",
        Some(json!({ "initialMessage": "go" })),
    )
    .await;
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    let (status, headers, _) = collect_sse(&test_app.app, &session_id).await;
    assert_eq!(status, StatusCode::OK);
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    assert!(header_str("content-type").starts_with("text/event-stream"));
    assert_eq!(header_str("cache-control"), "no-cache");
    assert_eq!(header_str("connection"), "keep-alive");
    assert_eq!(header_str("x-accel-buffering"), "no");
}

#[tokio::test]
async fn stream_can_only_be_claimed_once() {
    let test_app = TestApp::local("All done.");

    let (_, _, body) = send_request(
        &test_app.app,
        Method::POST,
        "/api/agent/sessions",
        Some(json!({ "initialMessage": "go" })),
    )
    .await;
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    // First reader claims the stream and keeps it open.
    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/api/agent/sessions/{session_id}/stream"))
        .body(Body::empty())
        .expect("build request");
    let first = test_app
        .app
        .clone()
        .oneshot(request)
        .await
        .expect("first stream");
    assert_eq!(first.status(), StatusCode::OK);

    let (status, _, body) = send_request(
        &test_app.app,
        Method::GET,
        &format!("/api/agent/sessions/{session_id}/stream"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let body = parse_json(&body);
    assert_eq!(body["type"], "urn:workbench-agent:error:stream_claimed");
    assert_eq!(body["sessionId"], session_id);

    drop(first);
}

#[tokio::test]
async fn stream_is_discarded_after_draining() {
    let test_app = TestApp::local("All done.");

    let (_, _, body) = send_request(
        &test_app.app,
        Method::POST,
        "/api/agent/sessions",
        Some(json!({ "initialMessage": "go" })),
    )
    .await;
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    let (status, _, sse) = collect_sse(&test_app.app, &session_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        parse_sse_events(&sse).last().expect("terminal event").0,
        "completed"
    );

    // Cleanup runs off the stream's drop; poll until the channel is gone.
    for _ in 0..200 {
        let (status, _, _) = send_request(
            &test_app.app,
            Method::GET,
            &format!("/api/agent/sessions/{session_id}/stream"),
            None,
        )
        .await;
        if status == StatusCode::NOT_FOUND {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("stream channel was never discarded");
}

#[tokio::test]
async fn failed_run_emits_one_failed_event_and_records_the_error() {
    let test_app = TestApp::build(
        Some(Arc::new(FailingAi)),
        Arc::new(FakeHosting::default()),
        Arc::new(FakeDeploy::default()),
    );

    let (_, _, body) = send_request(
        &test_app.app,
        Method::POST,
        "/api/agent/sessions",
        Some(json!({ "initialMessage": "go" })),
    )
    .await;
    let session_id = parse_json(&body)["sessionId"]
        .as_str()
        .expect("session id")
        .to_string();

    let (status, _, sse) = collect_sse(&test_app.app, &session_id).await;
    assert_eq!(status, StatusCode::OK);
    let events = parse_sse_events(&sse);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, "progress");
    assert_eq!(events[1].0, "failed");
    assert_eq!(events[1].1["error"], "model exploded");

    let history = wait_for_history(&test_app.lifecycle, &session_id, 2).await;
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "Error: model exploded");
}
