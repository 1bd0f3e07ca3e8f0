use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{PushError, RespondError, SettingsError, StoreError};
use crate::kernel::connection::ConnectionManager;
use crate::kernel::event::{ConnectionState, FeedEvent};
use crate::kernel::notification::{Delivery, Notification};
use crate::services::feed::{validate_topic, FeedTransport, HistorySource, ReplySink};
use crate::services::push::{SubscriptionHandle, SubscriptionManager, Teardown};
use crate::services::responder::ResponsePublisher;
use crate::store::{AnswerOutcome, Claim, FeedbackPrefs, LocalStore, UserSettings};

const FEED_CAPACITY: usize = 128;

/// What the presentation layer gets told about.
#[derive(Debug, Clone)]
pub enum UiEvent {
    Notification(Notification),
    Answered(Notification),
    Status(ConnectionState),
}

/// Sound/vibration/bell for a newly arrived notification.
pub trait AlertSink: Send + Sync + 'static {
    fn alert(&self, notification: &Notification, prefs: &FeedbackPrefs);
}

/// Everything the orchestrator needs, assembled by the binary or a test.
pub struct Wiring {
    pub store: Arc<LocalStore>,
    pub transport: Arc<dyn FeedTransport>,
    pub history: Arc<dyn HistorySource>,
    pub replies: Arc<dyn ReplySink>,
    pub push: Option<SubscriptionManager>,
    pub alerts: Arc<dyn AlertSink>,
    pub connection: ConnectionConfig,
    pub reply_retry_delay: Duration,
}

pub struct Orchestrator {
    store: Arc<LocalStore>,
    connection: ConnectionManager,
    replies: Arc<dyn ReplySink>,
    push: Option<SubscriptionManager>,
    ui: mpsc::Sender<UiEvent>,
    feed: mpsc::Sender<FeedEvent>,
    reply_retry_delay: Duration,
}

impl Orchestrator {
    /// Must be called inside a tokio runtime: spawns the feed pump.
    pub fn new(wiring: Wiring, ui: mpsc::Sender<UiEvent>) -> Self {
        let connection = ConnectionManager::spawn(
            wiring.transport,
            wiring.history,
            wiring.store.clone(),
            wiring.connection,
        );
        let (feed_tx, feed_rx) = mpsc::channel(FEED_CAPACITY);
        tokio::spawn(pump(feed_rx, wiring.store.clone(), wiring.alerts, ui.clone()));

        Self {
            store: wiring.store,
            connection,
            replies: wiring.replies,
            push: wiring.push,
            ui,
            feed: feed_tx,
            reply_retry_delay: wiring.reply_retry_delay,
        }
    }

    /// Connects using the stored settings. False if no topic is configured yet.
    pub fn start(&self) -> bool {
        let settings = self.store.settings();
        let Some(topic) = settings.topic.as_deref() else {
            warn!("No feed topic configured; staying offline");
            return false;
        };
        self.connection
            .connect(topic, settings.reply_topic.as_deref(), self.feed.clone());
        true
    }

    pub fn stop(&self) {
        self.connection.disconnect();
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "Failed to write state on stop");
        }
    }

    /// Forwarded platform signal: app foregrounded or network restored.
    pub fn wake(&self) {
        self.connection.force_reconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn history(&self) -> Vec<Notification> {
        self.store.history()
    }

    pub fn clear_history(&self) -> Result<(), StoreError> {
        self.store.clear_history()
    }

    pub fn settings(&self) -> UserSettings {
        self.store.settings()
    }

    pub fn set_feedback(&self, feedback: FeedbackPrefs) -> Result<(), StoreError> {
        self.store.update_settings(|s| s.feedback = feedback)?;
        Ok(())
    }

    /// Persists new topics, reconnects the live feed and moves an existing
    /// push registration over to the new topic. Invalid names are rejected
    /// before anything is stored.
    pub async fn set_topics(&self, topic: &str, reply_topic: Option<&str>) -> Result<(), SettingsError> {
        validate_topic(topic)?;
        if let Some(reply) = reply_topic {
            validate_topic(reply)?;
        }
        let before = self.store.settings();
        let after = self.store.update_settings(|s| {
            s.topic = Some(topic.to_string());
            s.reply_topic = reply_topic.map(String::from);
        })?;
        if before.topic == after.topic && before.reply_topic == after.reply_topic {
            return Ok(());
        }
        info!(topic, "Feed topics changed");
        self.start();

        if let Some(push) = &self.push {
            if push.is_subscribed().await {
                if let Err(e) = push.update_topics(&[topic.to_string()]).await {
                    warn!(error = %e, "Could not move push registration to new topic");
                }
            }
        }
        Ok(())
    }

    /// Sends `body` for notification `id` and records the answer.
    ///
    /// The notification is marked answered whether or not the publish got
    /// through; `Notification::delivery` says which. While one call is
    /// publishing, others for the same id get `AlreadyAnswered`.
    pub async fn respond(&self, id: &str, body: &str) -> Result<Notification, RespondError> {
        if self.store.get(id).is_none() {
            return Err(RespondError::UnknownNotification(id.to_string()));
        }
        let reply_topic = self
            .store
            .settings()
            .reply_topic
            .ok_or(RespondError::NoReplyTopic)?;
        let _claim = match self.store.claim_answer(id) {
            Claim::Granted(claim) => claim,
            Claim::Taken => return Err(RespondError::AlreadyAnswered(id.to_string())),
            Claim::Unknown => return Err(RespondError::UnknownNotification(id.to_string())),
        };

        let publisher = ResponsePublisher::new(self.replies.clone(), &reply_topic, self.reply_retry_delay);
        let delivery = if publisher.respond(body).await {
            Delivery::Delivered
        } else {
            Delivery::Failed
        };

        match self.store.mark_answered(id, body, delivery)? {
            AnswerOutcome::Updated(answered) => {
                let _ = self.ui.send(UiEvent::Answered(answered.clone())).await;
                Ok(answered)
            }
            AnswerOutcome::AlreadyAnswered => Err(RespondError::AlreadyAnswered(id.to_string())),
            AnswerOutcome::Unknown => Err(RespondError::UnknownNotification(id.to_string())),
        }
    }

    /// `respond` with the body of the `index`th action.
    pub async fn respond_with_action(&self, id: &str, index: usize) -> Result<Notification, RespondError> {
        let notification = self
            .store
            .get(id)
            .ok_or_else(|| RespondError::UnknownNotification(id.to_string()))?;
        let action = notification
            .actions
            .get(index)
            .ok_or_else(|| RespondError::NoSuchAction {
                id: id.to_string(),
                index,
            })?;
        self.respond(id, &action.response_body).await
    }

    pub async fn subscribe_push(&self) -> Result<SubscriptionHandle, PushError> {
        let push = self
            .push
            .as_ref()
            .ok_or_else(|| PushError::Platform("push is not configured".into()))?;
        let topic = self
            .store
            .settings()
            .topic
            .ok_or_else(|| PushError::Platform("no feed topic configured".into()))?;
        push.subscribe(&[topic]).await
    }

    pub async fn unsubscribe_push(&self) -> Teardown {
        match &self.push {
            Some(push) => push.unsubscribe().await,
            None => Teardown::Complete,
        }
    }
}

/// Drains the connection's events: dedups against durable state, alerts,
/// and forwards to the presentation layer.
async fn pump(
    mut feed: mpsc::Receiver<FeedEvent>,
    store: Arc<LocalStore>,
    alerts: Arc<dyn AlertSink>,
    ui: mpsc::Sender<UiEvent>,
) {
    while let Some(event) = feed.recv().await {
        match event {
            FeedEvent::Notification(notification) => {
                match store.record(&notification) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(id = %notification.id, "Already in durable state; skipped");
                        continue;
                    }
                    // Recorded in memory; only the write failed.
                    Err(e) => warn!(id = %notification.id, error = %e, "Failed to persist notification"),
                }
                alerts.alert(&notification, &store.settings().feedback);
                let _ = ui.send(UiEvent::Notification(notification)).await;
            }
            FeedEvent::Status(state) => {
                let _ = ui.send(UiEvent::Status(state)).await;
            }
        }
    }
    debug!("Feed pump stopped");
}
