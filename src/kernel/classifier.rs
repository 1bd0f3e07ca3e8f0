use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::event::{FeedFrame, HTTP_ACTION};
use super::notification::{Action, Notification, NotificationKind, DEFAULT_PRIORITY};
use crate::error::FeedError;

/// Precedence order, first match wins. Each kind pairs its producer tag with
/// the lowercase title fragments used when no tag is present.
const RULES: [(NotificationKind, &str, &[&str]); 5] = [
    (NotificationKind::Permission, "lock", &["permission"]),
    (NotificationKind::Choice, "point_right", &["choice", "choose", "select"]),
    (NotificationKind::Approve, "question", &["approv"]),
    (NotificationKind::Done, "white_check_mark", &["done", "complete", "finished"]),
    (NotificationKind::Decision, "warning", &["decision"]),
];

pub fn parse_frame(text: &str) -> Result<FeedFrame, FeedError> {
    Ok(serde_json::from_str(text)?)
}

/// Classifies using the current wall clock for any missing id or time.
pub fn classify(frame: &FeedFrame) -> Notification {
    classify_at(frame, Utc::now())
}

/// Pure classification: `now` only fills in an absent id or origin time.
pub fn classify_at(frame: &FeedFrame, now: DateTime<Utc>) -> Notification {
    let title = frame.title.clone().unwrap_or_default();
    let kind = kind_of(&frame.tags, &title);

    let actions: Vec<Action> = frame
        .actions
        .iter()
        .filter(|a| a.kind == HTTP_ACTION)
        .map(|a| Action {
            label: a.label.clone(),
            response_body: a.body.clone().unwrap_or_default(),
        })
        .collect();

    let correlation = actions
        .first()
        .and_then(|a| correlation_id(&a.response_body));

    let id = match frame.id.as_deref() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => local_id(now),
    };

    Notification::new(
        id,
        kind,
        title,
        frame.message.clone().unwrap_or_default(),
        frame.time.unwrap_or_else(|| now.timestamp()),
        frame.priority.unwrap_or(DEFAULT_PRIORITY),
        actions,
        correlation,
    )
}

fn kind_of(tags: &[String], title: &str) -> NotificationKind {
    for (kind, tag, _) in RULES.iter() {
        if tags.iter().any(|t| t == tag) {
            return *kind;
        }
    }
    let title = title.to_lowercase();
    for (kind, _, words) in RULES.iter() {
        if words.iter().any(|w| title.contains(*w)) {
            return *kind;
        }
    }
    NotificationKind::Decision
}

/// `"OK_1700000000"` -> `"1700000000"`. The suffix after the last underscore
/// must be all digits.
pub fn correlation_id(body: &str) -> Option<String> {
    let (_, suffix) = body.rsplit_once('_')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(suffix.to_string())
}

fn local_id(now: DateTime<Utc>) -> String {
    format!("local-{}-{}", now.timestamp_millis(), &Uuid::new_v4().simple().to_string()[..8])
}
