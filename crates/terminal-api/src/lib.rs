//! HTTP surface of the dashboard: cookie-session auth, per-user collections,
//! settings, notifications, chat and the event stream.

pub mod auth;
pub mod chat;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod hub;
pub mod middleware;
pub mod notifications;
pub mod password;
pub mod records;
pub mod settings;
pub mod state;
pub mod status;

use axum::routing::{delete, get, post};
use axum::{Router, middleware as axum_middleware};

use terminal_types::models::{Idea, Link, Note, Prompt};

pub use error::ApiError;
pub use state::{ApiConfig, AppState, AppStateInner};

/// Every `/api` route. Transport layers (CORS, tracing) are left to the
/// caller.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/login", post(auth::login))
        .route("/api/register", post(auth::register))
        .route("/api/logout", post(auth::logout))
        .route("/api/health", get(status::health));

    let protected_routes = Router::new()
        .route("/api/user", get(auth::current_user))
        .route("/api/system-status", get(status::system_status))
        .nest("/api/tasks", records::task_routes())
        .nest("/api/notes", records::routes::<Note>())
        .nest("/api/links", records::categorized_routes::<Link>())
        .nest("/api/ideas", records::categorized_routes::<Idea>())
        .nest("/api/prompts", records::categorized_routes::<Prompt>())
        .route("/api/settings", get(settings::get_settings).put(settings::put_settings))
        .route(
            "/api/notifications",
            get(notifications::list)
                .post(notifications::create)
                .delete(notifications::clear),
        )
        .route("/api/notifications/read-all", post(notifications::mark_all_read))
        .route("/api/notifications/{id}/read", post(notifications::mark_read))
        .route("/api/notifications/{id}", delete(notifications::remove))
        .route("/api/chat", get(chat::get_chat))
        .route("/api/chat/tabs", post(chat::add_tab))
        .route("/api/chat/tabs/{id}", delete(chat::remove_tab))
        .route("/api/chat/tabs/{id}/activate", post(chat::activate_tab))
        .route("/api/chat/tabs/{id}/messages", post(chat::send_message))
        .route("/api/chat/completions", post(chat::completion))
        .route("/api/chat/assistant", post(chat::assistant))
        .route("/api/events", get(events::stream))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_session,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
