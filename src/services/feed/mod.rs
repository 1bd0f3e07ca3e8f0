//! Everything that crosses the network to the feed server.
//!
//! The core only depends on the traits here; `client::FeedClient` and
//! `socket::WsTransport` are the production implementations.

pub mod client;
pub mod socket;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// One inbound unit from the live socket. `Control` covers ping/pong and
/// anything else that proves liveness without carrying a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Control,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, FeedError>> + Send>>;

/// Opens the live subscription. The stream ending (or yielding an error) is a close.
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    async fn open(&self, topic: &str) -> Result<FrameStream, FeedError>;
}

/// Historical poll. Returns the raw newline-delimited frames.
#[async_trait]
pub trait HistorySource: Send + Sync + 'static {
    async fn fetch_since(&self, topic: &str, since: i64) -> Result<Vec<String>, FeedError>;
}

#[async_trait]
pub trait ReplySink: Send + Sync + 'static {
    async fn publish(&self, topic: &str, body: &str) -> Result<(), FeedError>;
}

/// Body of a push registration request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRegistration {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub topics: Vec<String>,
}

#[async_trait]
pub trait PushRegistry: Send + Sync + 'static {
    async fn register(&self, registration: &PushRegistration) -> Result<(), FeedError>;
    async fn unregister(&self, endpoint: &str) -> Result<(), FeedError>;
}

/// URL layout of an ntfy-compatible server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoints {
    base: String,
}

impl FeedEndpoints {
    pub fn new(server: &str) -> Self {
        Self {
            base: server.trim_end_matches('/').to_string(),
        }
    }

    pub fn topic(&self, topic: &str) -> Result<String, FeedError> {
        validate_topic(topic)?;
        Ok(format!("{}/{}", self.base, topic))
    }

    pub fn socket(&self, topic: &str) -> Result<String, FeedError> {
        let http = self.topic(topic)?;
        let ws = if let Some(rest) = http.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = http.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(FeedError::Url(http));
        };
        Ok(format!("{ws}/ws"))
    }

    pub fn poll(&self, topic: &str, since: i64) -> Result<String, FeedError> {
        Ok(format!("{}/json?poll=1&since={}", self.topic(topic)?, since))
    }

    pub fn webpush(&self) -> String {
        format!("{}/v1/webpush", self.base)
    }
}

/// Topics are path segments: 1-64 of `[A-Za-z0-9_-]`.
pub fn validate_topic(topic: &str) -> Result<(), FeedError> {
    let ok = !topic.is_empty()
        && topic.len() <= 64
        && topic.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(FeedError::Url(format!("invalid topic name {topic:?}")))
    }
}
