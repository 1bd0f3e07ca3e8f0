//! Out-of-band wake-up registration.
//!
//! A push platform hands out an endpoint plus key material; we register it
//! with the feed server for a set of topics so the server can wake us while
//! the live socket is down. Payloads are never read from the push message
//! itself: once woken, the connection's catch-up fetch retrieves them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::feed::{PushRegistration, PushRegistry};
use crate::config::PushConfig;
use crate::error::PushError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

/// The platform side of push (browser push manager, UnifiedPush distributor, ...).
#[async_trait]
pub trait PushPlatform: Send + Sync + 'static {
    /// The current subscription, if any. Never prompts the user.
    async fn existing(&self) -> Result<Option<PushSubscription>, PushError>;
    /// Creates a subscription, asking for consent if the platform requires it.
    async fn request(&self) -> Result<PushSubscription, PushError>;
    /// Local teardown of `subscription`.
    async fn release(&self, subscription: &PushSubscription) -> Result<(), PushError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub endpoint: String,
    pub topics: Vec<String>,
}

/// Result of `unsubscribe`. Logged by the manager; callers may ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Teardown {
    Complete,
    /// Local side is gone but the server may still hold the registration.
    ProviderUnreachable(String),
}

pub struct SubscriptionManager {
    platform: Arc<dyn PushPlatform>,
    registry: Arc<dyn PushRegistry>,
    current: Mutex<Option<SubscriptionHandle>>,
}

impl SubscriptionManager {
    pub fn new(platform: Arc<dyn PushPlatform>, registry: Arc<dyn PushRegistry>) -> Self {
        Self {
            platform,
            registry,
            current: Mutex::new(None),
        }
    }

    pub async fn subscribe(&self, topics: &[String]) -> Result<SubscriptionHandle, PushError> {
        let subscription = match self.platform.existing().await? {
            Some(existing) => existing,
            None => self.platform.request().await?,
        };
        self.register(subscription, topics).await
    }

    /// Re-registers the existing subscription for `topics` without asking for consent again.
    pub async fn update_topics(&self, topics: &[String]) -> Result<SubscriptionHandle, PushError> {
        let subscription = self
            .platform
            .existing()
            .await?
            .ok_or(PushError::NotSubscribed)?;
        self.register(subscription, topics).await
    }

    /// Best effort at the server; the local teardown always runs.
    pub async fn unsubscribe(&self) -> Teardown {
        let existing = match self.platform.existing().await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "Could not read push subscription during teardown");
                None
            }
        };
        let endpoint = existing
            .as_ref()
            .map(|s| s.endpoint.clone())
            .or_else(|| self.handle().map(|h| h.endpoint));

        let mut outcome = Teardown::Complete;
        if let Some(endpoint) = &endpoint {
            if let Err(e) = self.registry.unregister(endpoint).await {
                warn!(error = %e, "Push unregister failed; continuing local teardown");
                outcome = Teardown::ProviderUnreachable(e.to_string());
            }
        }
        if let Some(subscription) = &existing {
            if let Err(e) = self.platform.release(subscription).await {
                warn!(error = %e, "Push platform release failed");
            }
        }
        *self.lock() = None;
        info!("Push subscription removed");
        outcome
    }

    pub async fn is_subscribed(&self) -> bool {
        match self.platform.existing().await {
            Ok(existing) => existing.is_some(),
            Err(e) => {
                warn!(error = %e, "Could not read push subscription");
                false
            }
        }
    }

    pub fn handle(&self) -> Option<SubscriptionHandle> {
        self.lock().clone()
    }

    async fn register(
        &self,
        subscription: PushSubscription,
        topics: &[String],
    ) -> Result<SubscriptionHandle, PushError> {
        let registration = PushRegistration {
            endpoint: subscription.endpoint.clone(),
            p256dh: subscription.p256dh,
            auth: subscription.auth,
            topics: topics.to_vec(),
        };
        self.registry.register(&registration).await?;

        let handle = SubscriptionHandle {
            endpoint: subscription.endpoint,
            topics: topics.to_vec(),
        };
        *self.lock() = Some(handle.clone());
        info!(topics = ?topics, "Push subscription registered");
        Ok(handle)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<SubscriptionHandle>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Platform backed by a fixed endpoint from configuration. Consent is implied
/// by the endpoint being configured at all.
pub struct ConfiguredPushPlatform {
    config: Option<PushConfig>,
    released: AtomicBool,
}

impl ConfiguredPushPlatform {
    pub fn new(config: Option<PushConfig>) -> Self {
        Self {
            config,
            released: AtomicBool::new(true),
        }
    }

    fn subscription(config: &PushConfig) -> PushSubscription {
        PushSubscription {
            endpoint: config.endpoint.clone(),
            p256dh: config.p256dh.clone(),
            auth: config.auth.clone(),
        }
    }
}

#[async_trait]
impl PushPlatform for ConfiguredPushPlatform {
    async fn existing(&self) -> Result<Option<PushSubscription>, PushError> {
        if self.released.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.config.as_ref().map(Self::subscription))
    }

    async fn request(&self) -> Result<PushSubscription, PushError> {
        let config = self.config.as_ref().ok_or(PushError::ConsentDenied)?;
        self.released.store(false, Ordering::SeqCst);
        Ok(Self::subscription(config))
    }

    async fn release(&self, _subscription: &PushSubscription) -> Result<(), PushError> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}
