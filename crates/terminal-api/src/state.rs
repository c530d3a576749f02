use std::sync::Arc;
use std::time::Instant;

use tracing::error;

use terminal_chat::openai::DEFAULT_BASE_URL;
use terminal_chat::poll::PollPolicy;
use terminal_chat::QueueConfig;
use terminal_db::Database;

use crate::dispatcher::Dispatcher;
use crate::error::ApiError;
use crate::hub::ChatHub;

pub type AppState = Arc<AppStateInner>;

/// Runtime knobs the handlers need. The binary fills this from the
/// environment.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub session_ttl: chrono::Duration,
    pub cookie_secure: bool,
    pub openai_base_url: String,
    /// Used when the user's settings carry no key of their own.
    pub openai_api_key: Option<String>,
    /// Persona webhook used when the user's settings carry none.
    pub webhook_url: Option<String>,
    pub queue: QueueConfig,
    pub poll: PollPolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            session_ttl: chrono::Duration::hours(24),
            cookie_secure: false,
            openai_base_url: DEFAULT_BASE_URL.into(),
            openai_api_key: None,
            webhook_url: None,
            queue: QueueConfig::default(),
            poll: PollPolicy::default(),
        }
    }
}

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub config: ApiConfig,
    pub http: reqwest::Client,
    pub chats: ChatHub,
    pub started_at: Instant,
}

impl AppStateInner {
    pub fn new(db: Database, config: ApiConfig) -> AppState {
        Arc::new(Self {
            db,
            dispatcher: Dispatcher::new(),
            config,
            http: reqwest::Client::new(),
            chats: ChatHub::default(),
            started_at: Instant::now(),
        })
    }
}

/// Run blocking SQLite work off the async runtime.
pub async fn with_db<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}
