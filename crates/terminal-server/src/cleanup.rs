use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use terminal_api::AppState;

/// Chats untouched for this long are unloaded from memory.
const CHAT_IDLE_AFTER: Duration = Duration::from_secs(30 * 60);

/// Background task that prunes expired sessions and unloads idle chats.
pub async fn run_cleanup_loop(state: AppState, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        let db_state = state.clone();
        let result = tokio::task::spawn_blocking(move || db_state.db.delete_expired_sessions(Utc::now())).await;
        match result {
            Ok(Ok(count)) => {
                if count > 0 {
                    info!("Cleanup: pruned {} expired sessions", count);
                }
            }
            Ok(Err(e)) => warn!("Cleanup error: {}", e),
            Err(e) => warn!("Cleanup task failed: {}", e),
        }

        state.chats.evict_idle(&state, CHAT_IDLE_AFTER).await;
    }
}
