use async_trait::async_trait;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::{FeedEndpoints, FeedTransport, Frame, FrameStream};
use crate::error::FeedError;

/// Live subscription over the server's `/<topic>/ws` endpoint.
#[derive(Debug, Clone)]
pub struct WsTransport {
    endpoints: FeedEndpoints,
}

impl WsTransport {
    pub fn new(server: &str) -> Self {
        Self {
            endpoints: FeedEndpoints::new(server),
        }
    }
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn open(&self, topic: &str) -> Result<FrameStream, FeedError> {
        let url = self.endpoints.socket(topic)?;
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!(url = %url, "Feed socket handshake complete");

        // Pings are answered by tungstenite while the stream is polled.
        let frames = ws.map(|msg| match msg {
            Ok(Message::Text(text)) => Ok(Frame::Text(text.to_string())),
            Ok(_) => Ok(Frame::Control),
            Err(e) => Err(FeedError::from(e)),
        });
        let stream: FrameStream = Box::pin(frames);
        Ok(stream)
    }
}
