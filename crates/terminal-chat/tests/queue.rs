use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use terminal_chat::{
    ChatBackend, ChatError, ChatEvent, ChatMessage, ChatSession, ChatStore, Locale, Persona,
    QueueConfig,
};
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout};

struct Call {
    at: Instant,
    text: String,
    history_len: usize,
}

/// Backend that answers after a fixed delay, from a script when one is
/// queued, otherwise with "re: <text>".
struct Scripted {
    delay: Duration,
    replies: Mutex<VecDeque<Result<String, ChatError>>>,
    calls: Mutex<Vec<Call>>,
}

impl Scripted {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn script(self: &Arc<Self>, reply: Result<String, ChatError>) -> Arc<Self> {
        self.replies.lock().unwrap().push_back(reply);
        self.clone()
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|c| c.at).collect()
    }
}

#[async_trait]
impl ChatBackend for Scripted {
    async fn reply(&self, history: &[ChatMessage], text: &str) -> Result<String, ChatError> {
        self.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            text: text.to_string(),
            history_len: history.len(),
        });
        tokio::time::sleep(self.delay).await;
        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("re: {}", text)))
    }
}

fn session(store: &ChatStore, backend: Arc<Scripted>) -> ChatSession {
    ChatSession::spawn(store.clone(), "1", backend, QueueConfig::default())
}

async fn wait_for_replies(rx: &mut broadcast::Receiver<ChatEvent>, replies: usize) {
    let mut seen = 0;
    while seen < replies {
        let event = timeout(Duration::from_secs(120), rx.recv())
            .await
            .expect("no reply in time")
            .expect("store closed");
        if let ChatEvent::MessageAppended { message, .. } = event {
            if !message.is_user {
                seen += 1;
            }
        }
    }
}

fn transcript(messages: &[ChatMessage]) -> Vec<(bool, &str)> {
    messages.iter().map(|m| (m.is_user, m.text.as_str())).collect()
}

#[tokio::test(start_paused = true)]
async fn second_message_waits_for_first_reply() {
    let store = ChatStore::default();
    let mut rx = store.subscribe();
    let backend = Scripted::new(Duration::from_millis(300));
    let chat = session(&store, backend.clone());
    let start = Instant::now();

    assert_eq!(chat.send("a").unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    chat.send("b").unwrap();

    wait_for_replies(&mut rx, 2).await;

    let messages = store.messages("1").await.unwrap();
    assert_eq!(
        transcript(&messages),
        vec![(true, "a"), (false, "re: a"), (true, "b"), (false, "re: b")]
    );

    let times = backend.call_times();
    assert!(times[0] - start < Duration::from_millis(50));
    // "a" settles at 300ms, so "b" goes out one cooldown later
    assert!(times[1] - start >= Duration::from_millis(1300));
}

#[tokio::test(start_paused = true)]
async fn dispatches_are_spaced_by_min_interval() {
    let store = ChatStore::default();
    let mut rx = store.subscribe();
    let backend = Scripted::new(Duration::ZERO);
    let chat = session(&store, backend.clone());

    chat.send("one").unwrap();
    chat.send("two").unwrap();
    assert_eq!(chat.send("three").unwrap(), 3);

    wait_for_replies(&mut rx, 3).await;

    let times = backend.call_times();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(1));
    }
    let calls = backend.calls.lock().unwrap();
    let order: Vec<_> = calls.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(order, vec!["one", "two", "three"]);
    // history excludes the message being sent
    assert_eq!(calls[1].history_len, 2);
    assert_eq!(chat.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn failure_appends_fallback_and_reports() {
    let store = ChatStore::default();
    let mut rx = store.subscribe();
    let backend = Scripted::new(Duration::from_millis(10)).script(Err(ChatError::Api {
        status: 500,
        message: "upstream down".into(),
    }));
    let chat = session(&store, backend);

    chat.send("hello").unwrap();

    let mut failed = None;
    let mut replied = false;
    while failed.is_none() || !replied {
        match timeout(Duration::from_secs(60), rx.recv()).await.unwrap().unwrap() {
            ChatEvent::SendFailed { error, .. } => failed = Some(error),
            ChatEvent::MessageAppended { message, .. } if !message.is_user => replied = true,
            _ => {}
        }
    }

    assert!(failed.unwrap().contains("upstream down"));
    let messages = store.messages("1").await.unwrap();
    assert_eq!(messages[1].text, Locale::Pt.fallback_error());
}

#[tokio::test(start_paused = true)]
async fn empty_reply_uses_canned_line() {
    let store = ChatStore::default();
    let mut rx = store.subscribe();
    let backend = Scripted::new(Duration::ZERO).script(Ok("   ".into()));
    let chat = ChatSession::spawn(
        store.clone(),
        "1",
        backend,
        QueueConfig { locale: Locale::En, ..QueueConfig::default() },
    );

    chat.send("ping").unwrap();
    wait_for_replies(&mut rx, 1).await;

    let messages = store.messages("1").await.unwrap();
    assert_eq!(messages[1].text, Locale::En.empty_reply());
}

#[tokio::test(start_paused = true)]
async fn blank_input_is_ignored() {
    let store = ChatStore::default();
    let backend = Scripted::new(Duration::ZERO);
    let chat = session(&store, backend.clone());

    assert_eq!(chat.send("   \n").unwrap(), 0);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(backend.call_times().is_empty());
    assert!(store.messages("1").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_in_flight_and_drops_queue() {
    let store = ChatStore::default();
    let mut rx = store.subscribe();
    let backend = Scripted::new(Duration::from_secs(30));
    let chat = session(&store, backend.clone());

    chat.send("slow").unwrap();
    chat.send("never").unwrap();
    loop {
        if let ChatEvent::Typing { typing: true, .. } = rx.recv().await.unwrap() {
            break;
        }
    }

    chat.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    let messages = store.messages("1").await.unwrap();
    assert_eq!(transcript(&messages), vec![(true, "slow")]);
    assert_eq!(backend.call_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn persona_intro_plays_once() {
    let store = ChatStore::default();
    let chat = session(&store, Scripted::new(Duration::ZERO));
    let start = Instant::now();

    assert!(chat.initialize(&Persona::ceo(Locale::En)).await.unwrap());
    assert!(Instant::now() - start >= Duration::from_secs(3));

    let messages = store.messages("1").await.unwrap();
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|m| !m.is_user));
    assert!(messages[2].text.contains("Severino"));

    assert!(!chat.initialize(&Persona::ceo(Locale::En)).await.unwrap());
    assert_eq!(store.messages("1").await.unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_intros_play_once() {
    let store = ChatStore::default();
    let chat = session(&store, Scripted::new(Duration::ZERO));
    let persona = Persona::ceo(Locale::En);

    let (first, second) = tokio::join!(chat.initialize(&persona), chat.initialize(&persona));

    assert!(first.unwrap() ^ second.unwrap());
    assert_eq!(store.messages("1").await.unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn reconfigure_keeps_queued_messages() {
    let store = ChatStore::default();
    let mut rx = store.subscribe();
    let old = Scripted::new(Duration::from_millis(300));
    let new = Scripted::new(Duration::ZERO).script(Ok("new backend".into()));
    let chat = session(&store, old.clone());

    chat.send("a").unwrap();
    chat.send("b").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!chat.is_idle());

    chat.reconfigure(new.clone(), QueueConfig::default()).await;
    wait_for_replies(&mut rx, 2).await;

    let messages = store.messages("1").await.unwrap();
    assert_eq!(
        transcript(&messages),
        vec![(true, "a"), (false, "re: a"), (true, "b"), (false, "new backend")]
    );
    assert_eq!(old.call_times().len(), 1);
    assert_eq!(new.call_times().len(), 1);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(chat.is_idle());
}
