use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response. `message` is the API's `error.message` when present,
    /// otherwise a snippet of the body.
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("run {run_id} ended as {status}: {message}")]
    RunFailed {
        run_id: String,
        status: String,
        message: String,
    },

    #[error("run still pending after {attempts} status checks")]
    PollExhausted { attempts: u32 },

    #[error("run still pending after {0:?}")]
    PollTimeout(Duration),

    #[error("no OpenAI API key configured")]
    MissingApiKey,

    #[error("chat session closed")]
    Closed,
}
