mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use common::TestApp;

async fn open_stream(app: &TestApp, cookie: &str) -> Body {
    let req = Request::builder()
        .uri("/api/events")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
    resp.into_body()
}

async fn next_chunk(body: &mut Body) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("no event in time")
        .expect("stream ended")
        .unwrap();
    String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
}

#[tokio::test]
async fn record_changes_are_streamed_to_their_owner_only() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let mut stream = open_stream(&app, &alice).await;

    app.post("/api/notes", &bob, json!({ "title": "bob's", "content": "x" })).await;
    let created = app.post("/api/notes", &alice, json!({ "title": "alice's", "content": "y" })).await;
    let id = created.body["id"].as_str().unwrap();

    let chunk = next_chunk(&mut stream).await;
    assert!(chunk.starts_with("event: store"));
    assert!(chunk.contains("RecordUpserted"));
    assert!(chunk.contains(id));
}

#[tokio::test]
async fn event_stream_requires_a_session() {
    let app = TestApp::new();
    let reply = app.call("GET", "/api/events", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}
