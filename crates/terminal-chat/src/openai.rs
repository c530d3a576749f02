//! Thin client for the two OpenAI call patterns the dashboard uses: direct
//! chat completions and assistant runs (thread -> message -> run -> poll ->
//! read reply).

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::ChatError;
use crate::poll::{PollPolicy, Progress, poll_until};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Terminal states other than `Completed`.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Expired | Self::Incomplete)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    pub last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(reqwest::Client::new(), DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    fn assistants(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.api_key).header("OpenAI-Beta", "assistants=v2")
    }

    // -- Chat completions --

    pub async fn chat_completion(
        &self,
        messages: &[ChatTurn],
        config: &CompletionConfig,
    ) -> Result<String, ChatError> {
        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }

        let body = json!({
            "model": config.model,
            "messages": messages,
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
        });
        debug!(model = %config.model, turns = messages.len(), "chat completion");

        let resp = self
            .http
            .post(self.url("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp: Resp = decode(resp).await?;

        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ChatError::UnexpectedResponse("completion without content".into()))
    }

    // -- Assistants --

    pub async fn create_thread(&self) -> Result<String, ChatError> {
        let resp = self
            .assistants(self.http.post(self.url("/threads")))
            .json(&json!({}))
            .send()
            .await?;
        Ok(decode::<Created>(resp).await?.id)
    }

    pub async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), ChatError> {
        let resp = self
            .assistants(self.http.post(self.url(&format!("/threads/{}/messages", thread_id))))
            .json(&json!({ "role": "user", "content": content }))
            .send()
            .await?;
        decode::<serde_json::Value>(resp).await?;
        Ok(())
    }

    pub async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, ChatError> {
        let resp = self
            .assistants(self.http.post(self.url(&format!("/threads/{}/runs", thread_id))))
            .json(&json!({ "assistant_id": assistant_id }))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ChatError> {
        let resp = self
            .assistants(self.http.get(self.url(&format!("/threads/{}/runs/{}", thread_id, run_id))))
            .send()
            .await?;
        decode(resp).await
    }

    /// Poll a run until it completes. Failure states end polling with
    /// [`ChatError::RunFailed`].
    pub async fn wait_for_run(
        &self,
        thread_id: &str,
        run_id: &str,
        policy: &PollPolicy,
    ) -> Result<Run, ChatError> {
        poll_until(policy, |attempt| async move {
            let run = self.get_run(thread_id, run_id).await?;
            debug!(attempt, run_id, status = ?run.status, "run status");
            if run.status == RunStatus::Completed {
                return Ok(Progress::Done(run));
            }
            if run.status.is_failure() {
                return Err(ChatError::RunFailed {
                    run_id: run.id,
                    status: format!("{:?}", run.status).to_lowercase(),
                    message: run
                        .last_error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "run did not complete".into()),
                });
            }
            Ok(Progress::Pending)
        })
        .await
    }

    /// Text of the newest assistant message in a thread.
    pub async fn latest_assistant_message(&self, thread_id: &str) -> Result<Option<String>, ChatError> {
        #[derive(Deserialize)]
        struct Text {
            value: String,
        }
        #[derive(Deserialize)]
        struct Content {
            text: Option<Text>,
        }
        #[derive(Deserialize)]
        struct ThreadMessage {
            role: String,
            #[serde(default)]
            content: Vec<Content>,
        }
        #[derive(Deserialize)]
        struct List {
            data: Vec<ThreadMessage>,
        }

        let resp = self
            .assistants(self.http.get(self.url(&format!("/threads/{}/messages", thread_id))))
            .send()
            .await?;
        let list: List = decode(resp).await?;

        // The API lists newest first.
        Ok(list
            .data
            .into_iter()
            .find(|m| m.role == "assistant")
            .and_then(|m| m.content.into_iter().find_map(|c| c.text))
            .map(|t| t.value))
    }

    /// Full assistant round trip for a single prompt on a fresh thread.
    pub async fn run_assistant(
        &self,
        assistant_id: &str,
        prompt: &str,
        policy: &PollPolicy,
    ) -> Result<String, ChatError> {
        let thread_id = self.create_thread().await?;
        self.add_message(&thread_id, prompt).await?;
        let run = self.create_run(&thread_id, assistant_id).await?;
        info!(thread_id = %thread_id, run_id = %run.id, "assistant run started");

        self.wait_for_run(&thread_id, &run.id, policy).await?;

        self.latest_assistant_message(&thread_id)
            .await?
            .ok_or_else(|| ChatError::UnexpectedResponse("assistant reply was empty".into()))
    }
}

/// Turn a response into `T`, mapping non-2xx to [`ChatError::Api`] with the
/// API's own error message when it sent one.
pub(crate) async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ChatError> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ChatError::Api {
            status: status.as_u16(),
            message: api_error_message(&text),
        });
    }
    Ok(resp.json().await?)
}

pub(crate) fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(400).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_prefers_structured_message() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(api_error_message(body), "Incorrect API key provided");
        assert_eq!(api_error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn unknown_run_status_is_not_terminal() {
        let run: Run = serde_json::from_str(r#"{"id":"run_1","status":"something_new"}"#).unwrap();
        assert_eq!(run.status, RunStatus::Unknown);
        assert!(!run.status.is_failure());

        let run: Run = serde_json::from_str(
            r#"{"id":"run_1","status":"failed","last_error":{"code":"x","message":"rate limited"}}"#,
        )
        .unwrap();
        assert!(run.status.is_failure());
        assert_eq!(run.last_error.unwrap().message, "rate limited");
    }

    #[test]
    fn turns_serialize_with_lowercase_roles() {
        let v = serde_json::to_value(ChatTurn::new(Role::System, "be brief")).unwrap();
        assert_eq!(v, json!({"role": "system", "content": "be brief"}));
    }
}
