use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use terminal_chat::ChatError;
use terminal_chat::openai::{ChatTurn, CompletionConfig, OpenAiClient, Role};
use terminal_chat::poll::PollPolicy;
use terminal_chat::webhook::WebhookClient;

#[derive(Default)]
struct Mock {
    checks: AtomicU32,
    complete_after: u32,
    fail: bool,
}

type Shared = Arc<Mock>;

fn beta_ok(headers: &HeaderMap) -> bool {
    headers.get("openai-beta").and_then(|v| v.to_str().ok()) == Some("assistants=v2")
}

async fn create_thread(headers: HeaderMap) -> impl IntoResponse {
    if !beta_ok(&headers) {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": {"message": "missing beta header"}})));
    }
    (StatusCode::OK, Json(json!({"id": "thread_1"})))
}

async fn add_message(Path(_thread): Path<String>) -> Json<Value> {
    Json(json!({"id": "msg_1"}))
}

async fn create_run(Path(_thread): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["assistant_id"], "asst_1");
    Json(json!({"id": "run_1", "status": "queued"}))
}

async fn get_run(State(mock): State<Shared>, Path((_thread, run)): Path<(String, String)>) -> Json<Value> {
    let n = mock.checks.fetch_add(1, Ordering::SeqCst) + 1;
    let status = if mock.fail {
        json!({"id": run, "status": "failed", "last_error": {"code": "server_error", "message": "model overloaded"}})
    } else if mock.complete_after > 0 && n >= mock.complete_after {
        json!({"id": run, "status": "completed"})
    } else {
        json!({"id": run, "status": "in_progress"})
    };
    Json(status)
}

async fn list_messages(Path(_thread): Path<String>) -> Json<Value> {
    Json(json!({
        "data": [
            {"role": "assistant", "content": [{"type": "text", "text": {"value": "ready when you are"}}]},
            {"role": "user", "content": [{"type": "text", "text": {"value": "hello"}}]}
        ]
    }))
}

async fn completions(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
    if auth != Some("Bearer sk-good") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}})),
        );
    }
    let turns = body["messages"].as_array().map(Vec::len).unwrap_or(0);
    (
        StatusCode::OK,
        Json(json!({
            "choices": [{"message": {"role": "assistant", "content": format!("{} turns, model {}", turns, body["model"].as_str().unwrap_or(""))}}]
        })),
    )
}

async fn webhook(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({"output": format!("CEO got: {}", body["mensagem"].as_str().unwrap_or(""))}))
}

async fn serve(mock: Shared) -> String {
    let app = Router::new()
        .route("/v1/threads", post(create_thread))
        .route("/v1/threads/{thread}/messages", post(add_message).get(list_messages))
        .route("/v1/threads/{thread}/runs", post(create_run))
        .route("/v1/threads/{thread}/runs/{run}", get(get_run))
        .route("/v1/chat/completions", post(completions))
        .route("/webhook", post(webhook))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn fast_policy(max_attempts: u32) -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(5),
        multiplier: 1.0,
        max_interval: Duration::from_millis(5),
        max_attempts,
        timeout: Duration::from_secs(10),
    }
}

#[tokio::test]
async fn assistant_run_polls_until_completed() {
    let mock = Arc::new(Mock { complete_after: 3, ..Mock::default() });
    let base = serve(mock.clone()).await;
    let client = OpenAiClient::with_base_url(reqwest::Client::new(), base, "sk-good");

    let reply = client.run_assistant("asst_1", "hello", &fast_policy(10)).await.unwrap();

    assert_eq!(reply, "ready when you are");
    assert_eq!(mock.checks.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn assistant_run_gives_up_after_bounded_checks() {
    let mock = Arc::new(Mock::default());
    let base = serve(mock.clone()).await;
    let client = OpenAiClient::with_base_url(reqwest::Client::new(), base, "sk-good");

    let err = client.run_assistant("asst_1", "hello", &fast_policy(4)).await.unwrap_err();

    assert!(matches!(err, ChatError::PollExhausted { attempts: 4 }));
    assert_eq!(mock.checks.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn failed_run_stops_polling() {
    let mock = Arc::new(Mock { fail: true, ..Mock::default() });
    let base = serve(mock.clone()).await;
    let client = OpenAiClient::with_base_url(reqwest::Client::new(), base, "sk-good");

    let err = client.run_assistant("asst_1", "hello", &fast_policy(10)).await.unwrap_err();

    match err {
        ChatError::RunFailed { status, message, .. } => {
            assert_eq!(status, "failed");
            assert_eq!(message, "model overloaded");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(mock.checks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn completion_sends_config_and_history() {
    let base = serve(Arc::new(Mock::default())).await;
    let client = OpenAiClient::with_base_url(reqwest::Client::new(), base, "sk-good");
    let turns = vec![
        ChatTurn::new(Role::System, "be brief"),
        ChatTurn::new(Role::User, "hi"),
    ];

    let reply = client.chat_completion(&turns, &CompletionConfig::default()).await.unwrap();

    assert_eq!(reply, "2 turns, model gpt-4o");
}

#[tokio::test]
async fn api_errors_carry_status_and_message() {
    let base = serve(Arc::new(Mock::default())).await;
    let client = OpenAiClient::with_base_url(reqwest::Client::new(), base, "sk-bad");

    let err = client
        .chat_completion(&[ChatTurn::new(Role::User, "hi")], &CompletionConfig::default())
        .await
        .unwrap_err();

    match err {
        ChatError::Api { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Incorrect API key provided");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn webhook_reply_is_extracted() {
    let base = serve(Arc::new(Mock::default())).await;
    let client = WebhookClient::new(reqwest::Client::new(), format!("{}/webhook", base));

    let reply = client.send("status report").await.unwrap();

    assert_eq!(reply.as_deref(), Some("CEO got: status report"));
}
