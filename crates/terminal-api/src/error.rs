use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use terminal_chat::{ChatError, StoreError};
use terminal_types::api::ErrorBody;
use terminal_types::records::ValidationError;

/// Every failure a handler can return. Rendered as `{"message": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Login failure. Deliberately identical for unknown user and bad password.
    #[error("ACCESS DENIED: invalid credentials")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Chat(ChatError::MissingApiKey) => StatusCode::BAD_REQUEST,
            Self::Chat(ChatError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Chat(_) => StatusCode::BAD_GATEWAY,
            Self::Store(StoreError::UnknownTab(_)) => StatusCode::NOT_FOUND,
            Self::Store(StoreError::LastTab) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::AlreadyInitialized(_)) => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("internal error: {:#}", err);
        Self::Internal
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(ApiError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Validation(ValidationError::Required("title")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Store(StoreError::UnknownTab("7".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Chat(ChatError::Api { status: 401, message: "bad key".into() }).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn validation_message_is_passed_through() {
        let err = ApiError::from(ValidationError::Required("title"));
        assert_eq!(err.to_string(), "title is required");
    }
}
