//! Live chat state per user: one [`ChatStore`] loaded from the database on
//! first use, plus one queue session per tab that has been written to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use terminal_chat::openai::{CompletionConfig, OpenAiClient};
use terminal_chat::webhook::WebhookClient;
use terminal_chat::{
    AssistantBackend, ChatAction, ChatBackend, ChatError, ChatEvent, ChatSession, ChatState, ChatStore,
    CompletionBackend, Locale, Persona, QueueConfig, WebhookBackend,
};
use terminal_types::events::StoreEvent;
use terminal_types::models::{NotificationKind, Settings};

use crate::error::ApiError;
use crate::notifications;
use crate::state::{AppState, with_db};

#[derive(Default)]
pub struct ChatHub {
    users: Mutex<HashMap<Uuid, Arc<UserChat>>>,
}

pub struct UserChat {
    pub store: ChatStore,
    sessions: Mutex<HashMap<String, TabSession>>,
    last_used: Mutex<Instant>,
    forwarder: JoinHandle<()>,
}

struct TabSession {
    session: Arc<ChatSession>,
    persona: Option<Persona>,
    /// Settings changed but no backend could be built for them yet.
    stale: bool,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// The user's own OpenAI key, else the server-wide one.
pub(crate) fn openai_client(state: &AppState, settings: &Settings) -> Result<OpenAiClient, ApiError> {
    let key = non_blank(&settings.openai_api_key)
        .or_else(|| state.config.openai_api_key.clone())
        .ok_or(ChatError::MissingApiKey)?;
    Ok(OpenAiClient::with_base_url(
        state.http.clone(),
        state.config.openai_base_url.clone(),
        key,
    ))
}

/// A persona webhook wins over OpenAI. With OpenAI, a configured assistant
/// wins over plain completions.
fn choose_backend(
    state: &AppState,
    settings: &Settings,
) -> Result<(Arc<dyn ChatBackend>, Option<Persona>), ApiError> {
    let locale = Locale::from_code(&settings.language);

    if let Some(url) = non_blank(&settings.webhook_url).or_else(|| state.config.webhook_url.clone()) {
        debug!(webhook = %url, "chat backend: persona webhook");
        let client = WebhookClient::new(state.http.clone(), url);
        return Ok((Arc::new(WebhookBackend::new(client)), Some(Persona::ceo(locale))));
    }

    let client = openai_client(state, settings)?;
    let backend: Arc<dyn ChatBackend> = match non_blank(&settings.assistant_id) {
        Some(assistant_id) => Arc::new(AssistantBackend::new(
            client,
            assistant_id,
            state.config.poll.clone(),
        )),
        None => Arc::new(CompletionBackend::new(
            client,
            CompletionConfig::default(),
            Some(locale.assistant_system_prompt().to_string()),
        )),
    };
    Ok((backend, None))
}

fn queue_config(state: &AppState, settings: &Settings) -> QueueConfig {
    QueueConfig {
        locale: Locale::from_code(&settings.language),
        ..state.config.queue.clone()
    }
}

impl ChatHub {
    /// The user's chat, loading it from the database on first access.
    pub async fn user(&self, state: &AppState, user_id: Uuid) -> Result<Arc<UserChat>, ApiError> {
        let mut users = self.users.lock().await;
        if let Some(chat) = users.get(&user_id) {
            *chat.last_used.lock().await = Instant::now();
            return Ok(chat.clone());
        }

        let key = user_id.to_string();
        let saved = with_db(state, move |db| db.load_chat_state(&key)).await?;
        let chat_state = match saved {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(user_id = %user_id, "stored chat state unreadable, starting fresh: {}", e);
                ChatState::default()
            }),
            None => ChatState::default(),
        };

        let store = ChatStore::new(chat_state);
        let rx = store.subscribe();
        let forwarder = tokio::spawn(forward_events(state.clone(), user_id, store.clone(), rx));
        let chat = Arc::new(UserChat {
            store,
            sessions: Mutex::new(HashMap::new()),
            last_used: Mutex::new(Instant::now()),
            forwarder,
        });
        users.insert(user_id, chat.clone());
        Ok(chat)
    }

    /// Point a user's open queues at the backend `settings` describe.
    /// Messages already accepted stay queued.
    pub async fn apply_settings(&self, state: &AppState, user_id: Uuid, settings: &Settings) {
        let chat = self.users.lock().await.get(&user_id).cloned();
        if let Some(chat) = chat {
            chat.rewire(state, settings).await;
        }
    }

    /// Unload chats that have been unused for `idle_for` and have no queued,
    /// in-flight or intro work. Their state is saved first. Returns how many
    /// were unloaded.
    pub async fn evict_idle(&self, state: &AppState, idle_for: Duration) -> usize {
        let mut evicted = Vec::new();
        {
            let mut users = self.users.lock().await;
            let mut idle = Vec::new();
            for (user_id, chat) in users.iter() {
                let unused = chat.last_used.lock().await.elapsed() >= idle_for;
                if unused && chat.is_idle().await {
                    idle.push(*user_id);
                }
            }
            for user_id in idle {
                if let Some(chat) = users.remove(&user_id) {
                    evicted.push((user_id, chat));
                }
            }
        }

        let count = evicted.len();
        for (user_id, chat) in evicted {
            chat.close_sessions().await;
            chat.forwarder.abort();
            persist(state, user_id, &chat.store).await;
            debug!(user_id = %user_id, "idle chat unloaded");
        }
        if count > 0 {
            info!("unloaded {} idle chats", count);
        }
        count
    }

    /// Number of users whose chat is held in memory.
    pub async fn loaded(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn shutdown(&self) {
        let chats: Vec<_> = self.users.lock().await.values().cloned().collect();
        for chat in chats {
            chat.close_sessions().await;
        }
    }
}

impl UserChat {
    async fn session(
        &self,
        state: &AppState,
        settings: &Settings,
        tab_id: &str,
    ) -> Result<(Arc<ChatSession>, Option<Persona>), ApiError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(tab) = sessions.get_mut(tab_id) {
            if !tab.session.is_closed() {
                if tab.stale {
                    let (backend, persona) = choose_backend(state, settings)?;
                    tab.session.reconfigure(backend, queue_config(state, settings)).await;
                    tab.persona = persona;
                    tab.stale = false;
                }
                return Ok((tab.session.clone(), tab.persona.clone()));
            }
        }

        let (backend, persona) = choose_backend(state, settings)?;
        let session = Arc::new(ChatSession::spawn(
            self.store.clone(),
            tab_id,
            backend,
            queue_config(state, settings),
        ));
        debug!(tab_id, "chat queue started");

        sessions.insert(
            tab_id.to_string(),
            TabSession {
                session: session.clone(),
                persona: persona.clone(),
                stale: false,
            },
        );
        Ok((session, persona))
    }

    /// Swap every open queue onto the current settings. When no backend can
    /// be built the queues keep draining on the old one and the next send
    /// reports the problem.
    async fn rewire(&self, state: &AppState, settings: &Settings) {
        let mut sessions = self.sessions.lock().await;
        if sessions.is_empty() {
            return;
        }
        match choose_backend(state, settings) {
            Ok((backend, persona)) => {
                for tab in sessions.values_mut() {
                    tab.session.reconfigure(backend.clone(), queue_config(state, settings)).await;
                    tab.persona = persona.clone();
                    tab.stale = false;
                }
            }
            Err(e) => {
                debug!("no chat backend for new settings: {}", e);
                for tab in sessions.values_mut() {
                    tab.stale = true;
                }
            }
        }
    }

    /// No tab has queued or in-flight work, and no intro is playing.
    async fn is_idle(&self) -> bool {
        self.sessions
            .lock()
            .await
            .values()
            .all(|tab| tab.session.is_idle() && Arc::strong_count(&tab.session) == 1)
    }

    /// Queue a message on a tab. Returns the number of messages waiting.
    pub async fn send(
        &self,
        state: &AppState,
        settings: &Settings,
        tab_id: &str,
        text: &str,
    ) -> Result<usize, ApiError> {
        self.store.messages(tab_id).await?;
        let (session, _) = self.session(state, settings, tab_id).await?;
        Ok(session.send(text)?)
    }

    /// Play the persona intro on a tab that has never been initialized. A
    /// no-op for backends without a persona.
    pub async fn introduce(&self, state: &AppState, settings: &Settings, tab_id: &str) {
        if !matches!(self.store.is_initialized(tab_id).await, Ok(false)) {
            return;
        }
        match self.session(state, settings, tab_id).await {
            Ok((session, Some(persona))) => {
                tokio::spawn(async move {
                    if let Err(e) = session.initialize(&persona).await {
                        debug!("intro stopped: {}", e);
                    }
                });
            }
            Ok((_, None)) => {}
            Err(e) => debug!(tab_id, "no chat backend for intro: {}", e),
        }
    }

    pub async fn remove_tab(&self, tab_id: &str) -> Result<(), ApiError> {
        self.store
            .dispatch(ChatAction::RemoveTab { tab_id: tab_id.to_string() })
            .await?;
        if let Some(tab) = self.sessions.lock().await.remove(tab_id) {
            tab.session.close();
        }
        Ok(())
    }

    async fn close_sessions(&self) {
        for (_, tab) in self.sessions.lock().await.drain() {
            tab.session.close();
        }
    }
}

async fn persist(state: &AppState, user_id: Uuid, store: &ChatStore) {
    let snapshot = store.snapshot().await;
    let raw = match serde_json::to_string(&snapshot) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(user_id = %user_id, "chat state not serializable: {}", e);
            return;
        }
    };
    let key = user_id.to_string();
    if let Err(e) = with_db(state, move |db| db.save_chat_state(&key, &raw)).await {
        warn!(user_id = %user_id, "saving chat state failed: {}", e);
    }
}

/// Mirror chat store events into the database, the user's event streams and
/// (for failed sends) the notification list.
async fn forward_events(
    state: AppState,
    user_id: Uuid,
    store: ChatStore,
    mut rx: broadcast::Receiver<ChatEvent>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(user_id = %user_id, skipped, "chat event forwarder lagged");
                persist(&state, user_id, &store).await;
                state.dispatcher.send(user_id, StoreEvent::ChatChanged { tab_id: None });
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match &event {
            ChatEvent::Typing { tab_id, typing } => state.dispatcher.send(
                user_id,
                StoreEvent::ChatTyping {
                    tab_id: tab_id.clone(),
                    typing: *typing,
                },
            ),
            ChatEvent::SendFailed { error, .. } => {
                if let Err(e) =
                    notifications::push(&state, user_id, NotificationKind::Error, "Chat", error.clone()).await
                {
                    warn!(user_id = %user_id, "could not record chat failure: {}", e);
                }
            }
            _ => {
                persist(&state, user_id, &store).await;
                state.dispatcher.send(
                    user_id,
                    StoreEvent::ChatChanged {
                        tab_id: Some(event.tab_id().to_string()),
                    },
                );
            }
        }
    }
}
