use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::{Extension, Json};
use tracing::debug;

use terminal_types::events::StoreEvent;
use terminal_types::models::Settings;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};

pub(crate) async fn load(state: &AppState, user: &CurrentUser) -> Result<Settings, ApiError> {
    let key = user.key();
    Ok(with_db(state, move |db| db.get_settings(&key))
        .await?
        .unwrap_or_default())
}

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Settings>, ApiError> {
    Ok(Json(load(&state, &user).await?))
}

/// Full replace. Open chat queues switch to the new keys and endpoints for
/// every message they have not sent yet.
pub async fn put_settings(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<Settings>, JsonRejection>,
) -> Result<Json<Settings>, ApiError> {
    let Json(settings) = payload?;

    let key = user.key();
    let saved = settings.clone();
    with_db(&state, move |db| db.put_settings(&key, &saved)).await?;

    state.chats.apply_settings(&state, user.id(), &settings).await;
    state.dispatcher.send(user.id(), StoreEvent::SettingsUpdated);
    debug!(user_id = %user.id(), "settings updated");
    Ok(Json(settings))
}
