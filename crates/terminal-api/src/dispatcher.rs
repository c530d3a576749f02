use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use terminal_types::events::{Envelope, StoreEvent};

/// Fans store events out to every open event stream. Streams filter on
/// `user_id`, so a user only ever sees their own changes.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<Envelope>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event for one user. A no-op when nobody is listening.
    pub fn send(&self, user_id: Uuid, event: StoreEvent) {
        let _ = self.inner.broadcast_tx.send(Envelope { user_id, event });
    }
}
