//! One set of handlers for every user-owned collection, instantiated per
//! record type.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use uuid::Uuid;

use terminal_types::api::TaskStatusRequest;
use terminal_types::events::StoreEvent;
use terminal_types::models::Task;
use terminal_types::records::{ListQuery, Record, apply_query, categories};

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::state::{AppState, with_db};

/// `/` and `/{id}` routes for one collection.
pub fn routes<R: Record>() -> Router<AppState> {
    Router::new()
        .route("/", get(list::<R>).post(create::<R>))
        .route("/{id}", put(update::<R>).delete(remove::<R>))
}

/// Collection routes plus `/categories`.
pub fn categorized_routes<R: Record>() -> Router<AppState> {
    routes::<R>().route("/categories", get(list_categories::<R>))
}

pub fn task_routes() -> Router<AppState> {
    routes::<Task>().route("/{id}/status", patch(set_task_status))
}

fn parse_id<R: Record>(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|_| not_found::<R>(raw))
}

fn not_found<R: Record>(id: &str) -> ApiError {
    ApiError::NotFound(format!("{} {} not found", R::COLLECTION, id))
}

fn publish_upsert<R: Record>(state: &AppState, user: &CurrentUser, id: Uuid) {
    state.dispatcher.send(
        user.id(),
        StoreEvent::RecordUpserted {
            collection: R::COLLECTION.into(),
            id,
        },
    );
}

pub async fn list<R: Record>(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<R>>, ApiError> {
    let key = user.key();
    let records = with_db(&state, move |db| db.list_records::<R>(&key)).await?;
    Ok(Json(apply_query(records, &query)))
}

pub async fn create<R: Record>(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    payload: Result<Json<R::Draft>, JsonRejection>,
) -> Result<(StatusCode, Json<R>), ApiError> {
    let Json(draft) = payload?;
    let record = R::create(Uuid::new_v4(), draft, Utc::now())?;

    let key = user.key();
    let saved = record.clone();
    with_db(&state, move |db| db.save_record(&key, &saved)).await?;

    publish_upsert::<R>(&state, &user, record.id());
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn update<R: Record>(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(raw_id): Path<String>,
    payload: Result<Json<R::Draft>, JsonRejection>,
) -> Result<Json<R>, ApiError> {
    let id = parse_id::<R>(&raw_id)?;
    let Json(draft) = payload?;

    let key = user.key();
    let mut record = with_db(&state, move |db| db.get_record::<R>(&key, id))
        .await?
        .ok_or_else(|| not_found::<R>(&raw_id))?;
    record.update(draft, Utc::now())?;

    let key = user.key();
    let saved = record.clone();
    with_db(&state, move |db| db.save_record(&key, &saved)).await?;

    publish_upsert::<R>(&state, &user, id);
    Ok(Json(record))
}

pub async fn remove<R: Record>(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id::<R>(&raw_id)?;
    let key = user.key();
    if !with_db(&state, move |db| db.delete_record::<R>(&key, id)).await? {
        return Err(not_found::<R>(&raw_id));
    }

    state.dispatcher.send(
        user.id(),
        StoreEvent::RecordDeleted {
            collection: R::COLLECTION.into(),
            id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_categories<R: Record>(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<String>>, ApiError> {
    let key = user.key();
    let records = with_db(&state, move |db| db.list_records::<R>(&key)).await?;
    Ok(Json(categories(&records)))
}

pub async fn set_task_status(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(raw_id): Path<String>,
    payload: Result<Json<TaskStatusRequest>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_id::<Task>(&raw_id)?;
    let Json(req) = payload?;

    let key = user.key();
    let task = with_db(&state, move |db| {
        let Some(mut task) = db.get_record::<Task>(&key, id)? else {
            return Ok(None);
        };
        task.status = req.status;
        task.updated_at = Utc::now();
        db.save_record(&key, &task)?;
        Ok(Some(task))
    })
    .await?
    .ok_or_else(|| not_found::<Task>(&raw_id))?;

    publish_upsert::<Task>(&state, &user, id);
    Ok(Json(task))
}
