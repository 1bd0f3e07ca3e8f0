use serde::{Deserialize, Serialize};

use super::notification::Notification;

/// A single JSON frame as the feed server sends it, on the socket or in a poll body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedFrame {
    pub id: Option<String>,
    /// `open`, `keepalive`, `message`, `poll_request`. Absent means `message`.
    pub event: Option<String>,
    pub topic: Option<String>,
    pub time: Option<i64>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub priority: Option<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub actions: Vec<FeedAction>,
}

impl FeedFrame {
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedAction {
    /// `view`, `http`, `broadcast`. Only `http` produces a reply.
    #[serde(rename = "action")]
    pub kind: String,
    #[serde(default)]
    pub label: String,
    pub url: Option<String>,
    pub method: Option<String>,
    pub body: Option<String>,
}

pub const HTTP_ACTION: &str = "http";

/// Lifecycle of the live feed connection. `stale` is not a state of its own:
/// it is detected while `Connected` and immediately becomes `Reconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Reconnecting,
    Connected,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

/// What the Connection Manager emits to its owner.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Notification(Notification),
    Status(ConnectionState),
}
