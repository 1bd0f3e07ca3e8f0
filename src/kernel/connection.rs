//! Live feed connection: socket lifecycle, backoff, staleness watchdog and
//! catch-up, folded into a single actor task.
//!
//! The live socket and the catch-up fetch run as independent tasks that feed
//! one inbound channel; the actor owns the seen-set, so ingestion needs no lock
//! and delivery is idempotent regardless of which path saw a message first.
//!
//! Every socket attempt carries a generation number. Events from an attempt
//! that is no longer current (cancelled by `disconnect`, replaced after the
//! watchdog fired) are discarded, so a late close can never schedule a
//! reconnect.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::classifier::{classify, parse_frame};
use super::event::{ConnectionState, FeedEvent};
use super::seen::SeenSet;
use crate::config::ConnectionConfig;
use crate::services::feed::{FeedTransport, Frame, FrameStream, HistorySource};
use crate::store::Watermark;

const INBOUND_CAPACITY: usize = 256;

enum Command {
    Connect {
        topic: String,
        reply_topic: Option<String>,
        events: mpsc::Sender<FeedEvent>,
    },
    Disconnect,
    ForceReconnect,
}

enum Inbound {
    Opened { generation: u64 },
    Frame { generation: u64, frame: Frame },
    Closed { generation: u64, error: Option<String> },
    CatchUp { epoch: u64, lines: Vec<String> },
}

/// Handle to the connection actor. Dropping it stops the actor and every
/// task it spawned.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    pub fn spawn(
        transport: Arc<dyn FeedTransport>,
        history: Arc<dyn HistorySource>,
        watermark: Arc<dyn Watermark>,
        config: ConnectionConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let root = CancellationToken::new();

        let actor = Actor {
            transport,
            history,
            watermark,
            backoff: Backoff::new(config.backoff_floor(), config.backoff_ceiling()),
            seen: SeenSet::new(config.seen_cap),
            config,
            commands: commands_rx,
            inbound_tx,
            inbound_rx,
            state: state_tx,
            root: root.clone(),
            _shutdown: root.drop_guard(),
            session: None,
            link: Link::Down,
            socket_cancel: None,
            generation: 0,
            epoch: 0,
            reconnect_at: None,
            stale_at: None,
            catch_up_on_open: false,
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// Starts (or restarts) the subscription to `topic`. Notifications and
    /// status transitions arrive on `events`.
    pub fn connect(&self, topic: &str, reply_topic: Option<&str>, events: mpsc::Sender<FeedEvent>) {
        self.send(Command::Connect {
            topic: topic.to_string(),
            reply_topic: reply_topic.map(String::from),
            events,
        });
    }

    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Wake signal (foregrounded, network back): skip any pending backoff.
    pub fn force_reconnect(&self) {
        self.send(Command::ForceReconnect);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Connection actor is gone; command dropped");
        }
    }
}

struct Session {
    topic: String,
    reply_topic: Option<String>,
    events: mpsc::Sender<FeedEvent>,
    epoch: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Down,
    Opening(u64),
    Open(u64),
}

struct Actor {
    transport: Arc<dyn FeedTransport>,
    history: Arc<dyn HistorySource>,
    watermark: Arc<dyn Watermark>,
    config: ConnectionConfig,
    backoff: Backoff,
    seen: SeenSet,

    commands: mpsc::UnboundedReceiver<Command>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
    state: watch::Sender<ConnectionState>,
    root: CancellationToken,
    _shutdown: DropGuard,

    session: Option<Session>,
    link: Link,
    socket_cancel: Option<CancellationToken>,
    generation: u64,
    epoch: u64,
    reconnect_at: Option<Instant>,
    stale_at: Option<Instant>,
    catch_up_on_open: bool,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(inbound) = self.inbound_rx.recv() => self.on_inbound(inbound).await,
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.set_state(ConnectionState::Reconnecting).await;
                    self.open_socket();
                }
                _ = wait_until(self.stale_at) => self.on_stale().await,
            }
        }
        debug!("Connection actor stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { topic, reply_topic, events } => {
                if self.session.is_some() {
                    self.drop_link();
                    if let Some(old) = self.session.take() {
                        old.cancel.cancel();
                    }
                }
                self.epoch += 1;
                info!(topic = %topic, "Connecting to feed");
                self.session = Some(Session {
                    topic,
                    reply_topic,
                    events,
                    epoch: self.epoch,
                    cancel: self.root.child_token(),
                });
                self.backoff.reset();
                self.catch_up_on_open = false;
                self.set_state(ConnectionState::Reconnecting).await;
                self.open_socket();
                self.start_catch_up();
            }
            Command::Disconnect => {
                if self.session.is_none() {
                    return;
                }
                self.drop_link();
                self.set_state(ConnectionState::Disconnected).await;
                if let Some(session) = self.session.take() {
                    session.cancel.cancel();
                    info!(topic = %session.topic, "Disconnected from feed");
                }
            }
            Command::ForceReconnect => {
                if self.session.is_none() || self.link != Link::Down {
                    debug!(link = ?self.link, "Wake signal ignored");
                    return;
                }
                info!("Wake signal; reconnecting now");
                self.reconnect_at = None;
                self.catch_up_on_open = true;
                self.set_state(ConnectionState::Reconnecting).await;
                self.open_socket();
            }
        }
    }

    async fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Opened { generation } => {
                if !self.is_current(generation) {
                    return;
                }
                self.link = Link::Open(generation);
                self.backoff.reset();
                self.arm_watchdog();
                self.set_state(ConnectionState::Connected).await;
                if self.catch_up_on_open {
                    self.catch_up_on_open = false;
                    self.start_catch_up();
                }
            }
            Inbound::Frame { generation, frame } => {
                if !self.is_current(generation) {
                    return;
                }
                self.arm_watchdog();
                if let Frame::Text(text) = frame {
                    self.ingest(&text).await;
                }
            }
            Inbound::Closed { generation, error } => {
                if !self.is_current(generation) {
                    debug!(generation, "Ignoring close from a retired socket");
                    return;
                }
                self.drop_link();
                let delay = self.backoff.next_delay();
                warn!(
                    error = error.as_deref().unwrap_or("closed by server"),
                    delay_ms = delay.as_millis() as u64,
                    "Feed socket closed; scheduling reconnect"
                );
                self.reconnect_at = Some(Instant::now() + delay);
                self.catch_up_on_open = true;
                self.set_state(ConnectionState::Disconnected).await;
            }
            Inbound::CatchUp { epoch, lines } => {
                if self.session.as_ref().map(|s| s.epoch) != Some(epoch) {
                    return;
                }
                for line in lines {
                    self.ingest(&line).await;
                }
            }
        }
    }

    async fn on_stale(&mut self) {
        self.stale_at = None;
        if !matches!(self.link, Link::Open(_)) {
            return;
        }
        warn!(
            stale_after_secs = self.config.stale_after_secs,
            "Feed socket went silent; forcing reconnect"
        );
        self.drop_link();
        self.backoff.reset();
        self.catch_up_on_open = true;
        self.set_state(ConnectionState::Reconnecting).await;
        self.open_socket();
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session.is_some()
            && matches!(self.link, Link::Opening(g) | Link::Open(g) if g == generation)
    }

    fn arm_watchdog(&mut self) {
        self.stale_at = Some(Instant::now() + self.config.stale_after());
    }

    /// Cancels the current socket task and both timers.
    fn drop_link(&mut self) {
        if let Some(cancel) = self.socket_cancel.take() {
            cancel.cancel();
        }
        self.link = Link::Down;
        self.reconnect_at = None;
        self.stale_at = None;
    }

    fn open_socket(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        if let Some(old) = self.socket_cancel.take() {
            old.cancel();
        }
        self.generation += 1;
        let generation = self.generation;
        let cancel = session.cancel.child_token();
        self.socket_cancel = Some(cancel.clone());
        self.link = Link::Opening(generation);

        debug!(generation, topic = %session.topic, "Opening feed socket");
        tokio::spawn(run_socket(
            self.transport.clone(),
            session.topic.clone(),
            generation,
            self.config.connect_timeout(),
            cancel,
            self.inbound_tx.clone(),
        ));
    }

    fn start_catch_up(&self) {
        let Some(session) = &self.session else {
            return;
        };
        let since = match self.watermark.high_water_mark() {
            Some(hwm) => hwm - self.config.catch_up_skew_secs,
            None => Utc::now().timestamp() - self.config.catch_up_lookback_secs,
        };
        let history = self.history.clone();
        let topic = session.topic.clone();
        let epoch = session.epoch;
        let cancel = session.cancel.child_token();
        let tx = self.inbound_tx.clone();

        tokio::spawn(async move {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return,
                fetched = history.fetch_since(&topic, since) => fetched,
            };
            match fetched {
                Ok(lines) => {
                    debug!(topic = %topic, since, count = lines.len(), "Catch-up fetched");
                    let _ = tx.send(Inbound::CatchUp { epoch, lines }).await;
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Catch-up fetch failed; live socket stays authoritative");
                }
            }
        });
    }

    /// Shared by the live socket and catch-up paths.
    async fn ingest(&mut self, text: &str) {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed feed frame");
                return;
            }
        };
        if !frame.is_message() {
            debug!(event = ?frame.event, "Feed control frame");
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        if let (Some(reply), Some(topic)) = (&session.reply_topic, &frame.topic) {
            if reply == topic && *reply != session.topic {
                debug!(topic = %topic, "Skipping echo of our own reply");
                return;
            }
        }

        let notification = classify(&frame);
        self.watermark.advance_high_water_mark(notification.time);
        if !self.seen.insert(&notification.id) {
            debug!(id = %notification.id, "Duplicate message dropped");
            return;
        }
        debug!(id = %notification.id, kind = %notification.kind, "Notification ingested");
        let _ = session.events.send(FeedEvent::Notification(notification)).await;
    }

    async fn set_state(&mut self, next: ConnectionState) {
        if *self.state.borrow() == next {
            return;
        }
        self.state.send_replace(next);
        info!(state = ?next, "Connection state changed");
        if let Some(session) = &self.session {
            let _ = session.events.send(FeedEvent::Status(next)).await;
        }
    }
}

async fn run_socket(
    transport: Arc<dyn FeedTransport>,
    topic: String,
    generation: u64,
    connect_timeout: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<Inbound>,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        opened = timeout(connect_timeout, transport.open(&topic)) => opened,
    };
    let error = match opened {
        Ok(Ok(frames)) => {
            pump_frames(frames, generation, cancel, tx).await;
            return;
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("handshake timed out after {}s", connect_timeout.as_secs()),
    };
    let _ = tx
        .send(Inbound::Closed { generation, error: Some(error) })
        .await;
}

async fn pump_frames(
    mut frames: FrameStream,
    generation: u64,
    cancel: CancellationToken,
    tx: mpsc::Sender<Inbound>,
) {
    if tx.send(Inbound::Opened { generation }).await.is_err() {
        return;
    }

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = frames.next() => next,
        };
        let error = match next {
            Some(Ok(frame)) => {
                if tx.send(Inbound::Frame { generation, frame }).await.is_err() {
                    return;
                }
                continue;
            }
            Some(Err(e)) => Some(e.to_string()),
            None => None,
        };
        let _ = tx.send(Inbound::Closed { generation, error }).await;
        return;
    }
}
