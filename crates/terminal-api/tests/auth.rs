mod common;

use axum::http::{StatusCode, header};
use serde_json::json;

use common::{TestApp, session_cookie};

#[tokio::test]
async fn register_starts_a_session() {
    let app = TestApp::new();

    let reply = app
        .call(
            "POST",
            "/api/register",
            None,
            Some(json!({ "username": "alice", "password": "password123" })),
        )
        .await;

    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["username"], "alice");
    assert!(reply.body.get("password").is_none());

    let set_cookie = reply.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Max-Age=86400"));

    let cookie = session_cookie(&reply.headers).unwrap();
    let me = app.get("/api/user", &cookie).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["username"], "alice");
}

#[tokio::test]
async fn login_returns_user_and_new_session() {
    let app = TestApp::new();
    app.register("alice").await;

    let reply = app
        .call(
            "POST",
            "/api/login",
            None,
            Some(json!({ "username": "alice", "password": "password123" })),
        )
        .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["username"], "alice");
    let cookie = session_cookie(&reply.headers).unwrap();
    assert_eq!(app.get("/api/user", &cookie).await.status, StatusCode::OK);
}

#[tokio::test]
async fn login_failures_share_one_message() {
    let app = TestApp::new();
    app.register("alice").await;

    for (username, password) in [("alice", "wrong-password"), ("ghost", "password123")] {
        let reply = app
            .call(
                "POST",
                "/api/login",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["message"], "ACCESS DENIED: invalid credentials");
        assert!(session_cookie(&reply.headers).is_none());
    }
}

#[tokio::test]
async fn protected_routes_need_a_session() {
    let app = TestApp::new();

    let reply = app.call("GET", "/api/tasks", None, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["message"], "Authentication required");

    let reply = app.get("/api/user", "terminal.sid=deadbeef").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = TestApp::new();
    let cookie = app.register("alice").await;

    let reply = app.call("POST", "/api/logout", Some(&cookie), None).await;
    assert_eq!(reply.status, StatusCode::OK);

    assert_eq!(app.get("/api/user", &cookie).await.status, StatusCode::UNAUTHORIZED);

    // logging out twice is harmless
    let reply = app.call("POST", "/api/logout", None, None).await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn register_validates_input() {
    let app = TestApp::new();
    app.register("alice").await;

    let cases = [
        (json!({ "username": "al", "password": "password123" }), "username must be 3 to 32 characters"),
        (json!({ "username": "bob", "password": "short" }), "password must be at least 8 characters"),
        (json!({ "username": "alice", "password": "password123" }), "username already exists"),
    ];
    for (body, message) in cases {
        let reply = app.call("POST", "/api/register", None, Some(body)).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["message"], message);
    }
}

#[tokio::test]
async fn username_length_counts_characters() {
    let app = TestApp::new();

    let accented = "ã".repeat(20);
    let reply = app
        .call("POST", "/api/register", None, Some(json!({ "username": accented, "password": "password123" })))
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);

    let too_long = "ã".repeat(33);
    let reply = app
        .call("POST", "/api/register", None, Some(json!({ "username": too_long, "password": "password123" })))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_registrations_get_one_account() {
    let app = TestApp::new();

    for round in 0..5 {
        let body = json!({ "username": format!("twin{}", round), "password": "password123" });
        let (a, b) = tokio::join!(
            app.call("POST", "/api/register", None, Some(body.clone())),
            app.call("POST", "/api/register", None, Some(body)),
        );
        let mut statuses = [a.status, b.status];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::CREATED, StatusCode::BAD_REQUEST]);
        let rejected = if a.status == StatusCode::BAD_REQUEST { a } else { b };
        assert_eq!(rejected.body["message"], "username already exists");
    }
}

#[tokio::test]
async fn health_is_public() {
    let app = TestApp::new();

    let reply = app.call("GET", "/api/health", None, None).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "online");
    assert!(reply.body["timestamp"].is_string());
}

#[tokio::test]
async fn system_status_reports_gauges() {
    let app = TestApp::new();
    let cookie = app.register("alice").await;

    let reply = app.get("/api/system-status", &cookie).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["cpuUsage"], 42);
    assert_eq!(reply.body["activeProcesses"].as_array().unwrap().len(), 4);
    assert!(reply.body["uptime"].as_str().unwrap().ends_with('m'));
}
