use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

/// One line of a chat transcript. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, true)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(text, false)
    }

    fn new(text: impl Into<String>, is_user: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            is_user,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTab {
    pub id: String,
    pub name: String,
    pub messages: Vec<ChatMessage>,
    pub initialized: bool,
}

impl ChatTab {
    fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            messages: Vec::new(),
            initialized: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatState {
    pub tabs: Vec<ChatTab>,
    pub active_tab_id: String,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            tabs: vec![ChatTab::new("1".into(), "Main Terminal".into())],
            active_tab_id: "1".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown chat tab '{0}'")]
    UnknownTab(String),

    #[error("the last chat tab can not be removed")]
    LastTab,

    #[error("chat tab '{0}' is already initialized")]
    AlreadyInitialized(String),
}

/// Every way the chat state can change.
#[derive(Debug, Clone)]
pub enum ChatAction {
    AddTab,
    RemoveTab { tab_id: String },
    Activate { tab_id: String },
    Append { tab_id: String, message: ChatMessage },
    MarkInitialized { tab_id: String },
}

/// What subscribers of a [`ChatStore`] observe.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    TabAdded { tab_id: String },
    TabRemoved { tab_id: String },
    Activated { tab_id: String },
    MessageAppended { tab_id: String, message: ChatMessage },
    Initialized { tab_id: String },
    /// The queue is waiting on the backend for this tab.
    Typing { tab_id: String, typing: bool },
    /// A send failed; the fallback line has already been appended.
    SendFailed { tab_id: String, error: String },
}

impl ChatEvent {
    pub fn tab_id(&self) -> &str {
        match self {
            Self::TabAdded { tab_id }
            | Self::TabRemoved { tab_id }
            | Self::Activated { tab_id }
            | Self::MessageAppended { tab_id, .. }
            | Self::Initialized { tab_id }
            | Self::Typing { tab_id, .. }
            | Self::SendFailed { tab_id, .. } => tab_id,
        }
    }

    /// True for events that change [`ChatState`] and so need persisting.
    pub fn is_state_change(&self) -> bool {
        !matches!(self, Self::Typing { .. } | Self::SendFailed { .. })
    }
}

impl ChatState {
    pub fn tab(&self, tab_id: &str) -> Option<&ChatTab> {
        self.tabs.iter().find(|t| t.id == tab_id)
    }

    fn tab_mut(&mut self, tab_id: &str) -> Result<&mut ChatTab, StoreError> {
        self.tabs
            .iter_mut()
            .find(|t| t.id == tab_id)
            .ok_or_else(|| StoreError::UnknownTab(tab_id.to_string()))
    }

    /// Pure reducer: apply one action and describe the change.
    pub fn apply(&mut self, action: ChatAction) -> Result<ChatEvent, StoreError> {
        match action {
            ChatAction::AddTab => {
                let mut n = self.tabs.len() + 1;
                while self.tab(&n.to_string()).is_some() {
                    n += 1;
                }
                let tab_id = n.to_string();
                self.tabs.push(ChatTab::new(tab_id.clone(), format!("Terminal {}", tab_id)));
                self.active_tab_id = tab_id.clone();
                Ok(ChatEvent::TabAdded { tab_id })
            }
            ChatAction::RemoveTab { tab_id } => {
                if self.tab(&tab_id).is_none() {
                    return Err(StoreError::UnknownTab(tab_id));
                }
                if self.tabs.len() == 1 {
                    return Err(StoreError::LastTab);
                }
                self.tabs.retain(|t| t.id != tab_id);
                if self.active_tab_id == tab_id {
                    self.active_tab_id = self.tabs[0].id.clone();
                }
                Ok(ChatEvent::TabRemoved { tab_id })
            }
            ChatAction::Activate { tab_id } => {
                self.tab_mut(&tab_id)?;
                self.active_tab_id = tab_id.clone();
                Ok(ChatEvent::Activated { tab_id })
            }
            ChatAction::Append { tab_id, message } => {
                self.tab_mut(&tab_id)?.messages.push(message.clone());
                Ok(ChatEvent::MessageAppended { tab_id, message })
            }
            ChatAction::MarkInitialized { tab_id } => {
                let tab = self.tab_mut(&tab_id)?;
                if tab.initialized {
                    return Err(StoreError::AlreadyInitialized(tab_id));
                }
                tab.initialized = true;
                Ok(ChatEvent::Initialized { tab_id })
            }
        }
    }
}

/// Shared, observable chat state for one user. Cloning shares the state.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: RwLock<ChatState>,
    events: broadcast::Sender<ChatEvent>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new(ChatState::default())
    }
}

impl ChatStore {
    pub fn new(state: ChatState) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(state),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    pub async fn snapshot(&self) -> ChatState {
        self.inner.state.read().await.clone()
    }

    pub async fn dispatch(&self, action: ChatAction) -> Result<ChatEvent, StoreError> {
        let event = self.inner.state.write().await.apply(action)?;
        self.notify(event.clone());
        Ok(event)
    }

    /// Publish an event that does not change state (typing, failures).
    pub fn notify(&self, event: ChatEvent) {
        let _ = self.inner.events.send(event);
    }

    pub async fn messages(&self, tab_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        self.inner
            .state
            .read()
            .await
            .tab(tab_id)
            .map(|t| t.messages.clone())
            .ok_or_else(|| StoreError::UnknownTab(tab_id.to_string()))
    }

    pub async fn is_initialized(&self, tab_id: &str) -> Result<bool, StoreError> {
        self.inner
            .state
            .read()
            .await
            .tab(tab_id)
            .map(|t| t.initialized)
            .ok_or_else(|| StoreError::UnknownTab(tab_id.to_string()))
    }
}
