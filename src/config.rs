use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::services::feed::validate_topic;

pub const DEFAULT_SERVER: &str = "https://ntfy.sh";

/// Process configuration. Defaults, then an optional JSON file, then env.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: String,
    pub state_path: PathBuf,
    pub connection: ConnectionConfig,
    pub history_cap: usize,
    pub reply_retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Seeds `UserSettings` on first run only.
    pub topic: Option<String>,
    pub reply_topic: Option<String>,
    pub push: Option<PushConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            state_path: PathBuf::from("nudge-state.json"),
            connection: ConnectionConfig::default(),
            history_cap: 100,
            reply_retry_delay_ms: 1_000,
            request_timeout_secs: 10,
            topic: None,
            reply_topic: None,
            push: None,
        }
    }
}

/// Tuning for the live connection. The stale threshold must sit well above
/// the server keepalive interval (45 s on ntfy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub backoff_floor_ms: u64,
    pub backoff_ceiling_ms: u64,
    pub stale_after_secs: u64,
    /// Bound on the socket handshake; a hung open counts as a failed one.
    pub connect_timeout_secs: u64,
    pub catch_up_skew_secs: i64,
    pub catch_up_lookback_secs: i64,
    pub seen_cap: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff_floor_ms: 1_000,
            backoff_ceiling_ms: 30_000,
            stale_after_secs: 90,
            connect_timeout_secs: 20,
            catch_up_skew_secs: 5,
            catch_up_lookback_secs: 3_600,
            seen_cap: 500,
        }
    }
}

impl ConnectionConfig {
    pub fn backoff_floor(&self) -> Duration {
        Duration::from_millis(self.backoff_floor_ms)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.backoff_ceiling_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Wake-up endpoint handed out by a push distributor, with its key pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushConfig {
    pub endpoint: String,
    /// Base64url P-256 public key.
    pub p256dh: String,
    /// Base64url auth secret.
    pub auth: String,
}

impl Config {
    /// Loads from `NUDGE_CONFIG` if set, then applies env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("NUDGE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server) = lookup("NUDGE_SERVER") {
            self.server = server;
        }
        if let Some(path) = lookup("NUDGE_STATE") {
            self.state_path = PathBuf::from(path);
        }
        if let Some(topic) = lookup("NUDGE_TOPIC") {
            self.topic = Some(topic);
        }
        if let Some(topic) = lookup("NUDGE_REPLY_TOPIC") {
            self.reply_topic = Some(topic);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.server.starts_with("http://") || self.server.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "server must be an http(s) url, got {}",
                self.server
            )));
        }
        if self.connection.backoff_floor_ms == 0 {
            return Err(ConfigError::Invalid("backoff_floor_ms must be positive".into()));
        }
        if self.connection.stale_after_secs == 0 {
            return Err(ConfigError::Invalid("stale_after_secs must be positive".into()));
        }
        if self.connection.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid("connect_timeout_secs must be positive".into()));
        }
        for topic in [&self.topic, &self.reply_topic].into_iter().flatten() {
            validate_topic(topic).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub fn reply_retry_delay(&self) -> Duration {
        Duration::from_millis(self.reply_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
