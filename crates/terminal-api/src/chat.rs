use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use tracing::info;

use terminal_chat::openai::{ChatTurn, CompletionConfig, Role};
use terminal_chat::{ChatAction, ChatEvent, ChatState};
use terminal_types::api::{
    AssistantRequest, ChatMessageAccepted, CompletionRequest, CompletionResponse,
    SendChatMessageRequest,
};

use crate::error::ApiError;
use crate::hub::openai_client;
use crate::middleware::CurrentUser;
use crate::settings;
use crate::state::AppState;

pub async fn get_chat(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<ChatState>, ApiError> {
    let chat = state.chats.user(&state, user.id()).await?;
    Ok(Json(chat.store.snapshot().await))
}

pub async fn add_tab(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<(StatusCode, Json<ChatState>), ApiError> {
    let chat = state.chats.user(&state, user.id()).await?;
    let event = chat.store.dispatch(ChatAction::AddTab).await?;
    if let ChatEvent::TabAdded { tab_id } = &event {
        let settings = settings::load(&state, &user).await?;
        chat.introduce(&state, &settings, tab_id).await;
    }
    Ok((StatusCode::CREATED, Json(chat.store.snapshot().await)))
}

pub async fn remove_tab(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(tab_id): Path<String>,
) -> Result<Json<ChatState>, ApiError> {
    let chat = state.chats.user(&state, user.id()).await?;
    chat.remove_tab(&tab_id).await?;
    Ok(Json(chat.store.snapshot().await))
}

pub async fn activate_tab(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(tab_id): Path<String>,
) -> Result<Json<ChatState>, ApiError> {
    let chat = state.chats.user(&state, user.id()).await?;
    chat.store
        .dispatch(ChatAction::Activate { tab_id: tab_id.clone() })
        .await?;
    let settings = settings::load(&state, &user).await?;
    chat.introduce(&state, &settings, &tab_id).await;
    Ok(Json(chat.store.snapshot().await))
}

/// Queue a message. The reply arrives later through the chat state and the
/// event stream.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(tab_id): Path<String>,
    payload: Result<Json<SendChatMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ChatMessageAccepted>), ApiError> {
    let Json(req) = payload?;
    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text is required".into()));
    }

    let settings = settings::load(&state, &user).await?;
    let chat = state.chats.user(&state, user.id()).await?;
    let pending = chat.send(&state, &settings, &tab_id, &req.text).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ChatMessageAccepted { tab_id, pending }),
    ))
}

fn parse_role(role: &str) -> Result<Role, ApiError> {
    match role {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        other => Err(ApiError::BadRequest(format!("unknown role '{}'", other))),
    }
}

/// One-shot chat completion with the caller's key.
pub async fn completion(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let Json(req) = payload?;
    if req.messages.is_empty() {
        return Err(ApiError::BadRequest("messages are required".into()));
    }

    let mut turns = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = req.system.filter(|s| !s.trim().is_empty()) {
        turns.push(ChatTurn::new(Role::System, system));
    }
    for m in req.messages {
        turns.push(ChatTurn::new(parse_role(&m.role)?, m.content));
    }

    let defaults = CompletionConfig::default();
    let config = CompletionConfig {
        model: req.model.unwrap_or(defaults.model),
        temperature: req.temperature.unwrap_or(defaults.temperature),
        max_tokens: req.max_tokens.unwrap_or(defaults.max_tokens),
    };

    let settings = settings::load(&state, &user).await?;
    let client = openai_client(&state, &settings)?;
    let content = client.chat_completion(&turns, &config).await?;
    Ok(Json(CompletionResponse { content }))
}

/// Run an assistant on a fresh thread with the caller's key. The request's
/// assistant id wins over the chat bubble one, which wins over the default.
pub async fn assistant(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<AssistantRequest>, JsonRejection>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let Json(req) = payload?;
    if req.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt is required".into()));
    }

    let settings = settings::load(&state, &user).await?;
    let assistant_id = [
        req.assistant_id.as_deref(),
        settings.chat_bubble_assistant_id.as_deref(),
        settings.assistant_id.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|id| !id.is_empty())
    .map(str::to_string)
    .ok_or_else(|| ApiError::BadRequest("no assistant configured".into()))?;

    let client = openai_client(&state, &settings)?;
    info!(user_id = %user.id(), assistant_id = %assistant_id, "assistant request");
    let content = client
        .run_assistant(&assistant_id, &req.prompt, &state.config.poll)
        .await?;
    Ok(Json(CompletionResponse { content }))
}
