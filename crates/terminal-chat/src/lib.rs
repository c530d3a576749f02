//! Chat subsystem: conversation tabs, the per-tab message queue and the
//! backends it talks to (OpenAI chat completions, OpenAI assistants, or a
//! persona webhook).

pub mod backend;
pub mod error;
pub mod locale;
pub mod openai;
pub mod poll;
pub mod session;
pub mod store;
pub mod webhook;

pub use backend::{AssistantBackend, ChatBackend, CompletionBackend, WebhookBackend};
pub use error::ChatError;
pub use locale::Locale;
pub use session::{ChatSession, Persona, QueueConfig};
pub use store::{ChatAction, ChatEvent, ChatMessage, ChatState, ChatStore, ChatTab, StoreError};
