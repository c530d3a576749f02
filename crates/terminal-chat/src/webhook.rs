use serde_json::{Value, json};
use tracing::warn;

use crate::error::ChatError;
use crate::openai::api_error_message;

/// Reply fields a persona webhook may answer with, in priority order.
const REPLY_FIELDS: [&str; 5] = ["output", "mensagem", "message", "resposta", "response"];

/// Posts `{"mensagem": text}` to an external persona webhook.
#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
}

impl WebhookClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    /// Returns the reply text, or `None` when the webhook answered with
    /// nothing recognizable.
    pub async fn send(&self, text: &str) -> Result<Option<String>, ChatError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&json!({ "mensagem": text }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ChatError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        Ok(extract_reply(&body))
    }
}

/// A webhook may answer with plain text, a JSON string, or a JSON object
/// carrying the reply in one of [`REPLY_FIELDS`].
pub fn extract_reply(body: &str) -> Option<String> {
    let reply = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => Some(s),
        Ok(Value::Object(map)) => REPLY_FIELDS
            .iter()
            .find_map(|f| map.get(*f).and_then(Value::as_str))
            .map(str::to_string),
        Ok(other) => {
            warn!("Webhook replied with unexpected JSON: {}", other);
            None
        }
        Err(_) => Some(body.to_string()),
    };
    reply.filter(|r| !r.trim().is_empty())
}
