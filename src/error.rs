use thiserror::Error;

/// Failures talking to the feed server (socket, poll, publish, webpush).
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("feed server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid feed url: {0}")]
    Url(String),
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        FeedError::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file is not valid json: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push permission was not granted")]
    ConsentDenied,
    #[error("no existing push subscription to update")]
    NotSubscribed,
    #[error("push platform failure: {0}")]
    Platform(String),
    #[error("push registration rejected: {0}")]
    Registration(#[from] FeedError),
}

#[derive(Debug, Error)]
pub enum RespondError {
    #[error("unknown notification {0}")]
    UnknownNotification(String),
    #[error("notification {id} has no action #{index}")]
    NoSuchAction { id: String, index: usize },
    #[error("notification {0} was already answered")]
    AlreadyAnswered(String),
    #[error("no reply topic configured")]
    NoReplyTopic,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    InvalidTopic(#[from] FeedError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file is not valid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
