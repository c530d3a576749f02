use async_trait::async_trait;

use crate::error::ChatError;
use crate::openai::{ChatTurn, CompletionConfig, OpenAiClient, Role};
use crate::poll::PollPolicy;
use crate::store::ChatMessage;
use crate::webhook::WebhookClient;

/// Something that answers a user message. `history` is the tab transcript
/// before `text` was appended. An `Ok` with empty text is treated by the
/// queue as "no usable reply".
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn reply(&self, history: &[ChatMessage], text: &str) -> Result<String, ChatError>;
}

/// The "CEO" persona: an external webhook that sees only the latest message.
pub struct WebhookBackend {
    client: WebhookClient,
}

impl WebhookBackend {
    pub fn new(client: WebhookClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatBackend for WebhookBackend {
    async fn reply(&self, _history: &[ChatMessage], text: &str) -> Result<String, ChatError> {
        Ok(self.client.send(text).await?.unwrap_or_default())
    }
}

/// Chat completions with the whole transcript as context.
pub struct CompletionBackend {
    client: OpenAiClient,
    config: CompletionConfig,
    system_prompt: Option<String>,
}

impl CompletionBackend {
    pub fn new(client: OpenAiClient, config: CompletionConfig, system_prompt: Option<String>) -> Self {
        Self {
            client,
            config,
            system_prompt,
        }
    }

    pub fn turns(&self, history: &[ChatMessage], text: &str) -> Vec<ChatTurn> {
        let mut turns = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = &self.system_prompt {
            turns.push(ChatTurn::new(Role::System, prompt.clone()));
        }
        turns.extend(history.iter().map(|m| {
            let role = if m.is_user { Role::User } else { Role::Assistant };
            ChatTurn::new(role, m.text.clone())
        }));
        turns.push(ChatTurn::new(Role::User, text));
        turns
    }
}

#[async_trait]
impl ChatBackend for CompletionBackend {
    async fn reply(&self, history: &[ChatMessage], text: &str) -> Result<String, ChatError> {
        let turns = self.turns(history, text);
        self.client.chat_completion(&turns, &self.config).await
    }
}

/// One assistant run per message, each on a fresh thread.
pub struct AssistantBackend {
    client: OpenAiClient,
    assistant_id: String,
    policy: PollPolicy,
}

impl AssistantBackend {
    pub fn new(client: OpenAiClient, assistant_id: impl Into<String>, policy: PollPolicy) -> Self {
        Self {
            client,
            assistant_id: assistant_id.into(),
            policy,
        }
    }
}

#[async_trait]
impl ChatBackend for AssistantBackend {
    async fn reply(&self, _history: &[ChatMessage], text: &str) -> Result<String, ChatError> {
        self.client
            .run_assistant(&self.assistant_id, text, &self.policy)
            .await
    }
}
