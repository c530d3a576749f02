mod cleanup;
mod config;

use std::time::Duration;

use axum::http::{HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use terminal_api::auth::ensure_admin;
use terminal_api::AppStateInner;
use terminal_db::Database;

use crate::config::Config;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "terminal=debug,terminal_api=debug,terminal_chat=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    ensure_admin(&db, config.admin_password.as_deref(), config.admin_reset)?;

    let state = AppStateInner::new(db, config.api.clone());
    tokio::spawn(cleanup::run_cleanup_loop(state.clone(), CLEANUP_INTERVAL));

    let app = terminal_api::router(state.clone())
        .layer(cors(config.cors_origin.as_deref()))
        .layer(TraceLayer::new_for_http());

    info!("Terminal server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.chats.shutdown().await;
    info!("Terminal server stopped");
    Ok(())
}

/// A single configured origin gets credentialed CORS (the session cookie has
/// to cross it). Without one, any origin is allowed and cookies are not.
fn cors(origin: Option<&str>) -> CorsLayer {
    let Some(origin) = origin else {
        return CorsLayer::permissive();
    };
    match HeaderValue::from_str(origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(origin))
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]),
        Err(e) => {
            warn!("ignoring invalid TERMINAL_CORS_ORIGIN {:?}: {}", origin, e);
            CorsLayer::permissive()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
