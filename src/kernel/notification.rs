use serde::{Deserialize, Serialize};

/// What the producer is asking of the human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Work finished, nothing to answer.
    Done,
    /// Advisory; the human decides out of band.
    Decision,
    /// Yes/no approval of a proposed step.
    Approve,
    /// A tool or operation needs explicit permission.
    Permission,
    /// Pick one of several lettered options.
    Choice,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Done => "done",
            NotificationKind::Decision => "decision",
            NotificationKind::Approve => "approve",
            NotificationKind::Permission => "permission",
            NotificationKind::Choice => "choice",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One button offered to the human. `response_body` is posted verbatim to the reply topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub label: String,
    pub response_body: String,
}

/// Outcome of publishing the answer. `answered` alone cannot tell these apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Delivered,
    Failed,
}

/// A classified feed message awaiting (or holding) the human's answer.
///
/// Everything except the answer fields is fixed at classification time. The
/// answer fields move from unanswered to answered once and never back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Epoch seconds.
    pub time: i64,
    pub priority: u8,
    pub actions: Vec<Action>,
    pub correlation_id: Option<String>,
    answered: bool,
    answered_with: Option<String>,
    #[serde(default)]
    delivery: Option<Delivery>,
}

pub const DEFAULT_PRIORITY: u8 = 3;

impl Notification {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        kind: NotificationKind,
        title: String,
        message: String,
        time: i64,
        priority: u8,
        actions: Vec<Action>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id,
            kind,
            title,
            message,
            time,
            priority,
            actions,
            correlation_id,
            answered: false,
            answered_with: None,
            delivery: None,
        }
    }

    pub fn answered(&self) -> bool {
        self.answered
    }

    pub fn answered_with(&self) -> Option<&str> {
        self.answered_with.as_deref()
    }

    pub fn delivery(&self) -> Option<Delivery> {
        self.delivery
    }

    pub fn is_actionable(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Records the answer. Returns false (and changes nothing) if already answered.
    pub fn mark_answered(&mut self, body: &str, delivery: Delivery) -> bool {
        if self.answered {
            return false;
        }
        self.answered = true;
        self.answered_with = Some(body.to_string());
        self.delivery = Some(delivery);
        true
    }
}
