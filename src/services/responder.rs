use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::feed::ReplySink;

/// Posts the human's answer to the reply topic, retrying once after `retry_delay`.
#[derive(Clone)]
pub struct ResponsePublisher {
    sink: Arc<dyn ReplySink>,
    reply_topic: String,
    retry_delay: Duration,
}

impl ResponsePublisher {
    pub fn new(sink: Arc<dyn ReplySink>, reply_topic: &str, retry_delay: Duration) -> Self {
        Self {
            sink,
            reply_topic: reply_topic.to_string(),
            retry_delay,
        }
    }

    /// False only if both attempts failed.
    pub async fn respond(&self, body: &str) -> bool {
        match self.sink.publish(&self.reply_topic, body).await {
            Ok(()) => {
                info!(topic = %self.reply_topic, "Response published");
                return true;
            }
            Err(e) => {
                warn!(
                    topic = %self.reply_topic,
                    error = %e,
                    retry_ms = self.retry_delay.as_millis() as u64,
                    "Response publish failed; retrying once"
                );
            }
        }

        tokio::time::sleep(self.retry_delay).await;

        match self.sink.publish(&self.reply_topic, body).await {
            Ok(()) => {
                info!(topic = %self.reply_topic, "Response published on retry");
                true
            }
            Err(e) => {
                warn!(topic = %self.reply_topic, error = %e, "Response lost after retry");
                false
            }
        }
    }
}
