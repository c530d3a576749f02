use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use uuid::Uuid;

use terminal_types::api::{CreateNotificationRequest, NotificationList};
use terminal_types::events::StoreEvent;
use terminal_types::models::{Notification, NotificationKind};

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};

fn not_found(id: &str) -> ApiError {
    ApiError::NotFound(format!("notification {} not found", id))
}

/// Re-count unread notifications and tell the user's streams.
async fn publish_changed(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    let key = user_id.to_string();
    let unread = with_db(state, move |db| db.unread_notifications(&key)).await?;
    state.dispatcher.send(user_id, StoreEvent::NotificationsChanged { unread });
    Ok(())
}

/// Store a notification for `user_id`. Used by handlers and by the chat hub
/// to surface send failures.
pub async fn push(
    state: &AppState,
    user_id: Uuid,
    kind: NotificationKind,
    title: impl Into<String>,
    message: impl Into<String>,
) -> Result<Notification, ApiError> {
    let notification = Notification {
        id: Uuid::new_v4(),
        kind,
        title: title.into(),
        message: message.into(),
        read: false,
        created_at: Utc::now(),
    };
    let key = user_id.to_string();
    let stored = notification.clone();
    with_db(state, move |db| db.insert_notification(&key, &stored)).await?;
    publish_changed(state, user_id).await?;
    Ok(notification)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<NotificationList>, ApiError> {
    let key = user.key();
    let (unread, notifications) = with_db(&state, move |db| {
        Ok((db.unread_notifications(&key)?, db.list_notifications(&key)?))
    })
    .await?;
    Ok(Json(NotificationList { unread, notifications }))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<CreateNotificationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Notification>), ApiError> {
    let Json(req) = payload?;
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".into()));
    }
    let notification = push(&state, user.id(), req.kind, req.title, req.message).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: Uuid = raw_id.parse().map_err(|_| not_found(&raw_id))?;
    let key = user.key();
    if !with_db(&state, move |db| db.mark_notification_read(&key, id)).await? {
        return Err(not_found(&raw_id));
    }
    publish_changed(&state, user.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<StatusCode, ApiError> {
    let key = user.key();
    with_db(&state, move |db| db.mark_all_notifications_read(&key)).await?;
    publish_changed(&state, user.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: Uuid = raw_id.parse().map_err(|_| not_found(&raw_id))?;
    let key = user.key();
    if !with_db(&state, move |db| db.delete_notification(&key, id)).await? {
        return Err(not_found(&raw_id));
    }
    publish_changed(&state, user.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<StatusCode, ApiError> {
    let key = user.key();
    with_db(&state, move |db| db.clear_notifications(&key)).await?;
    publish_changed(&state, user.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}
