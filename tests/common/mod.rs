#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Instant};

use nudge::config::ConnectionConfig;
use nudge::error::FeedError;
use nudge::kernel::event::{ConnectionState, FeedEvent};
use nudge::kernel::notification::Notification;
use nudge::services::feed::{FeedTransport, Frame, FrameStream, HistorySource, ReplySink};

pub type LinkSender = fmpsc::UnboundedSender<Result<Frame, FeedError>>;

/// What the next `open()` does.
pub enum Script {
    Refuse,
    Accept,
    /// Handshake that never completes.
    Hang,
}

/// Transport whose opens are scripted by the test. Accepted links are handed
/// back through `links`; dropping the sender closes the socket.
pub struct FakeTransport {
    script: Mutex<VecDeque<Script>>,
    opens: mpsc::UnboundedSender<Instant>,
    links: mpsc::UnboundedSender<LinkSender>,
}

pub struct TransportProbe {
    pub opens: mpsc::UnboundedReceiver<Instant>,
    pub links: mpsc::UnboundedReceiver<LinkSender>,
}

impl FakeTransport {
    /// Unscripted opens are refused.
    pub fn new(script: Vec<Script>) -> (Arc<Self>, TransportProbe) {
        let (opens_tx, opens_rx) = mpsc::unbounded_channel();
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                script: Mutex::new(script.into()),
                opens: opens_tx,
                links: links_tx,
            }),
            TransportProbe {
                opens: opens_rx,
                links: links_rx,
            },
        )
    }
}

#[async_trait]
impl FeedTransport for FakeTransport {
    async fn open(&self, _topic: &str) -> Result<FrameStream, FeedError> {
        let _ = self.opens.send(Instant::now());
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Script::Refuse);
        match next {
            Script::Refuse => Err(FeedError::Transport("connection refused".into())),
            Script::Accept => {
                let (tx, rx) = fmpsc::unbounded();
                let _ = self.links.send(tx);
                let stream: FrameStream = Box::pin(rx);
                Ok(stream)
            }
            Script::Hang => std::future::pending().await,
        }
    }
}

/// History that answers with fixed lines, optionally held until a gate opens.
pub struct FakeHistory {
    lines: Vec<String>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    fail: bool,
    pub calls: Mutex<Vec<i64>>,
}

impl FakeHistory {
    pub fn with(lines: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            lines,
            gate: Mutex::new(None),
            fail: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn gated(lines: Vec<String>) -> (Arc<Self>, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let history = Arc::new(Self {
            lines,
            gate: Mutex::new(Some(rx)),
            fail: false,
            calls: Mutex::new(Vec::new()),
        });
        (history, tx)
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            lines: Vec::new(),
            gate: Mutex::new(None),
            fail: true,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn empty() -> Arc<Self> {
        Self::with(Vec::new())
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn fetch_since(&self, _topic: &str, since: i64) -> Result<Vec<String>, FeedError> {
        self.calls.lock().unwrap().push(since);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail {
            return Err(FeedError::Status { status: 502, body: "bad gateway".into() });
        }
        Ok(self.lines.clone())
    }
}

/// Reply sink that fails the first `failures` publishes.
pub struct FakeReplies {
    failures: usize,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl FakeReplies {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ReplySink for FakeReplies {
    async fn publish(&self, topic: &str, body: &str) -> Result<(), FeedError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((topic.to_string(), body.to_string()));
        if sent.len() <= self.failures {
            Err(FeedError::Transport("timed out".into()))
        } else {
            Ok(())
        }
    }
}

pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        backoff_floor_ms: 1_000,
        backoff_ceiling_ms: 30_000,
        stale_after_secs: 90,
        connect_timeout_secs: 10,
        catch_up_skew_secs: 5,
        catch_up_lookback_secs: 3_600,
        seen_cap: 100,
    }
}

pub fn message(id: &str, tags: &[&str], actions: &[(&str, &str)]) -> String {
    let actions: Vec<serde_json::Value> = actions
        .iter()
        .map(|(label, body)| serde_json::json!({"action": "http", "label": label, "url": "https://example.invalid", "body": body}))
        .collect();
    serde_json::json!({
        "id": id,
        "event": "message",
        "topic": "agent",
        "time": 1_700_000_000,
        "title": "Claude needs you",
        "message": "**Bash**: `ls`",
        "tags": tags,
        "actions": actions,
    })
    .to_string()
}

pub fn message_at(id: &str, time: i64) -> String {
    serde_json::json!({"id": id, "event": "message", "topic": "agent", "time": time, "title": "Done", "tags": ["white_check_mark"]})
        .to_string()
}

pub fn keepalive() -> String {
    serde_json::json!({"id": "ka", "event": "keepalive", "time": 1_700_000_000, "topic": "agent"}).to_string()
}

pub fn send_text(link: &LinkSender, text: String) {
    link.unbounded_send(Ok(Frame::Text(text))).unwrap();
}

pub async fn next_notification(rx: &mut mpsc::Receiver<FeedEvent>) -> Notification {
    loop {
        match rx.recv().await.expect("event channel closed") {
            FeedEvent::Notification(n) => return n,
            FeedEvent::Status(_) => continue,
        }
    }
}

pub async fn wait_for_state(rx: &mut mpsc::Receiver<FeedEvent>, want: ConnectionState) {
    loop {
        if let FeedEvent::Status(s) = rx.recv().await.expect("event channel closed") {
            if s == want {
                return;
            }
        }
    }
}

/// Collects every event that arrives within `window` of (paused) time.
pub async fn drain(rx: &mut mpsc::Receiver<FeedEvent>, window: Duration) -> Vec<FeedEvent> {
    let mut out = Vec::new();
    let deadline = Instant::now() + window;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match timeout(left, rx.recv()).await {
            Ok(Some(event)) => out.push(event),
            _ => return out,
        }
    }
}

pub fn notifications(events: &[FeedEvent]) -> Vec<&Notification> {
    events
        .iter()
        .filter_map(|e| match e {
            FeedEvent::Notification(n) => Some(n),
            _ => None,
        })
        .collect()
}

pub fn statuses(events: &[FeedEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|e| match e {
            FeedEvent::Status(s) => Some(*s),
            _ => None,
        })
        .collect()
}
