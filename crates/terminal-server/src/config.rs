use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use terminal_api::ApiConfig;

/// Everything read from the environment at boot.
#[derive(Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub admin_password: Option<String>,
    pub admin_reset: bool,
    pub cors_origin: Option<String>,
    pub api: ApiConfig,
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = var("TERMINAL_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parsed("TERMINAL_PORT", 5000)?;
        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let ttl_hours: i64 = parsed("TERMINAL_SESSION_TTL_HOURS", 24)?;
        let defaults = ApiConfig::default();
        let api = ApiConfig {
            session_ttl: chrono::Duration::hours(ttl_hours),
            cookie_secure: parsed("TERMINAL_COOKIE_SECURE", false)?,
            openai_base_url: var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            openai_api_key: var("OPENAI_API_KEY"),
            webhook_url: var("TERMINAL_WEBHOOK_URL"),
            ..defaults
        };

        Ok(Self {
            addr,
            db_path: PathBuf::from(var("TERMINAL_DB_PATH").unwrap_or_else(|| "terminal.db".into())),
            admin_password: var("TERMINAL_ADMIN_PASSWORD"),
            admin_reset: parsed("TERMINAL_ADMIN_RESET", false)?,
            cors_origin: var("TERMINAL_CORS_ORIGIN"),
            api,
        })
    }
}
