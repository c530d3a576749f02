//! Per-tab send queue. Messages are sent one at a time, in submission order,
//! with a minimum spacing between dispatches and a cooldown after each reply.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::ChatBackend;
use crate::error::ChatError;
use crate::locale::Locale;
use crate::store::{ChatAction, ChatEvent, ChatMessage, ChatStore, StoreError};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Minimum gap between two dispatches.
    pub min_interval: Duration,
    /// Quiet time after a reply lands before the next dispatch.
    pub cooldown: Duration,
    pub locale: Locale,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            cooldown: Duration::from_secs(1),
            locale: Locale::default(),
        }
    }
}

/// Scripted lines a tab shows the first time it is opened. Offsets are
/// measured from the start of initialization.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub intro: Vec<(Duration, String)>,
}

impl Persona {
    pub fn ceo(locale: Locale) -> Self {
        let [connecting, granted, greeting] = locale.ceo_intro();
        Self {
            name: "CEO".into(),
            intro: vec![
                (Duration::from_millis(500), connecting.into()),
                (Duration::from_secs(2), granted.into()),
                (Duration::from_secs(3), greeting.into()),
            ],
        }
    }
}

/// Backend and timing the worker reads at each dispatch.
struct Wiring {
    backend: Arc<dyn ChatBackend>,
    config: QueueConfig,
}

/// Handle to the queue worker of one tab. Dropping it cancels any in-flight
/// request and discards messages that have not been dispatched yet.
pub struct ChatSession {
    tab_id: String,
    store: ChatStore,
    tx: mpsc::UnboundedSender<String>,
    pending: Arc<AtomicUsize>,
    busy: Arc<AtomicBool>,
    wiring: Arc<RwLock<Wiring>>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl ChatSession {
    pub fn spawn(
        store: ChatStore,
        tab_id: impl Into<String>,
        backend: Arc<dyn ChatBackend>,
        config: QueueConfig,
    ) -> Self {
        let tab_id = tab_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let busy = Arc::new(AtomicBool::new(false));
        let wiring = Arc::new(RwLock::new(Wiring { backend, config }));
        let cancel = CancellationToken::new();

        let worker = Worker {
            tab_id: tab_id.clone(),
            store: store.clone(),
            wiring: wiring.clone(),
            rx,
            pending: pending.clone(),
            busy: busy.clone(),
            cancel: cancel.clone(),
        };
        let worker = tokio::spawn(worker.run());

        Self {
            tab_id,
            store,
            tx,
            pending,
            busy,
            wiring,
            cancel,
            worker: Some(worker),
        }
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Messages accepted but not yet dispatched.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Nothing queued and nothing waiting on the backend.
    pub fn is_idle(&self) -> bool {
        self.pending() == 0 && !self.busy.load(Ordering::SeqCst)
    }

    /// Swap the backend and timing for every message not yet dispatched.
    /// Queued messages are kept and a request already in flight finishes on
    /// the backend it started with.
    pub async fn reconfigure(&self, backend: Arc<dyn ChatBackend>, config: QueueConfig) {
        *self.wiring.write().await = Wiring { backend, config };
        debug!(tab_id = %self.tab_id, "chat queue reconfigured");
    }

    /// Queue `text` for sending and return the number of messages waiting.
    /// Blank input is ignored.
    pub fn send(&self, text: &str) -> Result<usize, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(self.pending());
        }
        if self.cancel.is_cancelled() {
            return Err(ChatError::Closed);
        }
        let waiting = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(text.to_string()).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ChatError::Closed);
        }
        debug!(tab_id = %self.tab_id, waiting, "message queued");
        Ok(waiting)
    }

    /// Play the persona intro once per tab. Returns false when the tab was
    /// already initialized.
    pub async fn initialize(&self, persona: &Persona) -> Result<bool, StoreError> {
        match self
            .store
            .dispatch(ChatAction::MarkInitialized { tab_id: self.tab_id.clone() })
            .await
        {
            Ok(_) => {}
            Err(StoreError::AlreadyInitialized(_)) => return Ok(false),
            Err(err) => return Err(err),
        }

        let started = Instant::now();
        for (offset, line) in &persona.intro {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(true),
                _ = sleep_until(started + *offset) => {}
            }
            self.store
                .dispatch(ChatAction::Append {
                    tab_id: self.tab_id.clone(),
                    message: ChatMessage::assistant(line.clone()),
                })
                .await?;
        }
        debug!(tab_id = %self.tab_id, persona = %persona.name, "intro played");
        Ok(true)
    }

    /// Cancel in-flight work and drop anything still queued without waiting
    /// for the worker. Usable through a shared handle.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Like [`close`](Self::close), then wait for the worker to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    tab_id: String,
    store: ChatStore,
    wiring: Arc<RwLock<Wiring>>,
    rx: mpsc::UnboundedReceiver<String>,
    pending: Arc<AtomicUsize>,
    busy: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let mut last_dispatch: Option<Instant> = None;
        let mut last_settled: Option<Instant> = None;

        loop {
            let text = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(text) => text,
                    None => break,
                },
            };

            let (min_interval, cooldown) = {
                let wiring = self.wiring.read().await;
                (wiring.config.min_interval, wiring.config.cooldown)
            };
            let ready_at = [
                last_dispatch.map(|t| t + min_interval),
                last_settled.map(|t| t + cooldown),
            ]
            .into_iter()
            .flatten()
            .max();
            if let Some(at) = ready_at {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = sleep_until(at) => {}
                }
            }

            last_dispatch = Some(Instant::now());
            self.busy.store(true, Ordering::SeqCst);
            self.pending.fetch_sub(1, Ordering::SeqCst);

            let keep_going = self.dispatch(text).await;
            self.busy.store(false, Ordering::SeqCst);
            if !keep_going {
                break;
            }
            last_settled = Some(Instant::now());
        }

        self.rx.close();
        self.pending.store(0, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);
        debug!(tab_id = %self.tab_id, "chat queue stopped");
    }

    /// Send one message and append the outcome. Returns false when the
    /// worker should stop.
    async fn dispatch(&self, text: String) -> bool {
        let tab_id = self.tab_id.clone();
        let (backend, locale) = {
            let wiring = self.wiring.read().await;
            (wiring.backend.clone(), wiring.config.locale)
        };

        let history = match self.store.messages(&tab_id).await {
            Ok(history) => history,
            Err(err) => {
                warn!(tab_id = %tab_id, error = %err, "tab is gone, stopping queue");
                return false;
            }
        };
        if self.append(ChatMessage::user(text.clone())).await.is_err() {
            return false;
        }

        self.store.notify(ChatEvent::Typing { tab_id: tab_id.clone(), typing: true });
        let result = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = backend.reply(&history, &text) => Some(result),
        };
        self.store.notify(ChatEvent::Typing { tab_id: tab_id.clone(), typing: false });

        let Some(result) = result else {
            debug!(tab_id = %tab_id, "in-flight message cancelled");
            return false;
        };

        let (reply, failure) = match result {
            Ok(reply) if !reply.trim().is_empty() => (reply, None),
            Ok(_) => (locale.empty_reply().to_string(), None),
            Err(err) => {
                warn!(tab_id = %tab_id, error = %err, "chat send failed");
                (locale.fallback_error().to_string(), Some(err.to_string()))
            }
        };
        if self.append(ChatMessage::assistant(reply)).await.is_err() {
            return false;
        }
        if let Some(error) = failure {
            self.store.notify(ChatEvent::SendFailed { tab_id, error });
        }
        true
    }

    async fn append(&self, message: ChatMessage) -> Result<(), StoreError> {
        self.store
            .dispatch(ChatAction::Append { tab_id: self.tab_id.clone(), message })
            .await
            .map(|_| ())
    }
}
