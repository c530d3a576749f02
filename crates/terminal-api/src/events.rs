use std::convert::Infallible;

use axum::Extension;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::middleware::CurrentUser;
use crate::state::AppState;

/// Server-sent stream of the caller's store events. Each event is named
/// `store` and carries the JSON-encoded event. A `lagged` event tells the
/// client it missed some and should refetch.
pub async fn stream(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.dispatcher.subscribe();
    let user_id = user.id();
    debug!(user_id = %user_id, "event stream opened");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(envelope) if envelope.user_id == user_id => {
                    match Event::default().event("store").json_data(&envelope.event) {
                        Ok(event) => yield Ok(event),
                        Err(e) => warn!("event not serializable: {}", e),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id = %user_id, skipped, "event stream lagged");
                    yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
