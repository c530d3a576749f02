use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;

use terminal_types::models::User;

use crate::auth::{SESSION_COOKIE, hash_token, user_from_row};
use crate::error::ApiError;
use crate::state::{AppState, with_db};

/// The authenticated user, inserted into request extensions by
/// [`require_session`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn id(&self) -> uuid::Uuid {
        self.0.id
    }

    /// Key used for the user's rows in the database.
    pub fn key(&self) -> String {
        self.0.id.to_string()
    }
}

/// Resolve the session cookie to a live session and re-fetch its user.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(ApiError::Unauthorized)?;

    let token_hash = hash_token(&token);
    let user = with_db(&state, move |db| {
        db.get_session_user(&token_hash, Utc::now())?
            .map(|row| user_from_row(&row))
            .transpose()
    })
    .await?
    .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}
