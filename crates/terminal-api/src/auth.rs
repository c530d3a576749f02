use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use terminal_db::models::UserRow;
use terminal_db::{Database, parse_timestamp};
use terminal_types::api::{LoginRequest, RegisterRequest};
use terminal_types::models::User;

use crate::error::ApiError;
use crate::middleware::CurrentUser;
use crate::password;
use crate::state::{AppState, ApiConfig, with_db};

pub const SESSION_COOKIE: &str = "terminal.sid";
pub const ADMIN_USERNAME: &str = "admin";

/// Sessions are looked up by the SHA-256 of the cookie value, never the
/// value itself.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn new_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

pub(crate) fn user_from_row(row: &UserRow) -> anyhow::Result<User> {
    Ok(User {
        id: row.id.parse()?,
        username: row.username.clone(),
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn session_cookie(token: String, config: &ApiConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(config.cookie_secure)
        .max_age(time::Duration::seconds(config.session_ttl.num_seconds()))
        .build()
}

/// Create a session row for `user_id` and return the cookie carrying it.
async fn start_session(state: &AppState, user_id: Uuid) -> Result<Cookie<'static>, ApiError> {
    let token = new_token();
    let token_hash = hash_token(&token);
    let expires_at = Utc::now() + state.config.session_ttl;
    with_db(state, move |db| db.create_session(&token_hash, &user_id.to_string(), expires_at)).await?;
    Ok(session_cookie(token, &state.config))
}

fn hash(password: &str) -> anyhow::Result<String> {
    password::hash_password(password).map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let username = req.username.trim().to_string();
    let chars = username.chars().count();
    if !(3..=32).contains(&chars) {
        return Err(ApiError::BadRequest("username must be 3 to 32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }

    let user_id = Uuid::new_v4();
    let user = with_db(&state, move |db| {
        if db.get_user_by_username(&username)?.is_some() {
            return Ok(None);
        }
        // A concurrent registration can still win the name while we hash.
        if !db.create_user(&user_id.to_string(), &username, &hash(&req.password)?)? {
            return Ok(None);
        }
        db.get_user_by_id(&user_id.to_string())?
            .map(|row| user_from_row(&row))
            .transpose()
    })
    .await?
    .ok_or_else(|| ApiError::BadRequest("username already exists".into()))?;

    let cookie = start_session(&state, user.id).await?;
    info!(username = %user.username, "user registered");
    Ok((StatusCode::CREATED, jar.add(cookie), Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    let user = with_db(&state, move |db| {
        let Some(row) = db.get_user_by_username(&req.username)? else {
            password::verify_dummy(&req.password);
            return Ok(None);
        };
        if !password::verify_password(&req.password, &row.password) {
            return Ok(None);
        }
        user_from_row(&row).map(Some)
    })
    .await?;

    let Some(user) = user else {
        warn!("rejected login attempt");
        return Err(ApiError::InvalidCredentials);
    };

    let cookie = start_session(&state, user.id).await?;
    info!(username = %user.username, "user logged in");
    Ok((jar.add(cookie), Json(user)))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let token_hash = hash_token(cookie.value());
        with_db(&state, move |db| db.delete_session(&token_hash)).await?;
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, Json(serde_json::json!({ "message": "logged out" }))))
}

pub async fn current_user(Extension(user): Extension<CurrentUser>) -> Json<User> {
    Json(user.0)
}

/// What [`ensure_admin`] did on boot.
#[derive(Debug, PartialEq, Eq)]
pub enum AdminSeed {
    Existing,
    Created,
    Reset,
}

/// Make sure the `admin` account exists. An existing password is only
/// replaced when `reset` is set. Without a configured password a random one
/// is generated and logged once.
pub fn ensure_admin(db: &Database, password: Option<&str>, reset: bool) -> anyhow::Result<AdminSeed> {
    let exists = db.get_user_by_username(ADMIN_USERNAME)?.is_some();
    if exists && !reset {
        return Ok(AdminSeed::Existing);
    }

    let generated = password.is_none();
    let password = match password {
        Some(p) => p.to_string(),
        None => hex::encode(rand::random::<[u8; 12]>()),
    };
    let hashed = hash(&password)?;

    let seed = if exists {
        db.set_password(ADMIN_USERNAME, &hashed)?;
        AdminSeed::Reset
    } else {
        if !db.create_user(&Uuid::new_v4().to_string(), ADMIN_USERNAME, &hashed)? {
            anyhow::bail!("admin account appeared while seeding");
        }
        AdminSeed::Created
    };

    if generated {
        warn!(username = ADMIN_USERNAME, password = %password, "generated admin password, change it after first login");
    } else {
        info!(username = ADMIN_USERNAME, ?seed, "admin password set from configuration");
    }
    Ok(seed)
}
