use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{FeedEndpoints, HistorySource, PushRegistration, PushRegistry, ReplySink};
use crate::error::FeedError;

/// HTTP side of the feed: catch-up poll, reply publish, webpush registration.
#[derive(Clone)]
pub struct FeedClient {
    client: Client,
    endpoints: FeedEndpoints,
}

#[derive(Serialize)]
struct Unregister<'a> {
    endpoint: &'a str,
}

impl FeedClient {
    pub fn new(server: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoints: FeedEndpoints::new(server),
        }
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, FeedError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FeedError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl HistorySource for FeedClient {
    async fn fetch_since(&self, topic: &str, since: i64) -> Result<Vec<String>, FeedError> {
        let url = self.endpoints.poll(topic, since)?;
        let response = check(self.client.get(url).send().await?).await?;
        let body = response.text().await?;
        Ok(body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

#[async_trait]
impl ReplySink for FeedClient {
    async fn publish(&self, topic: &str, body: &str) -> Result<(), FeedError> {
        let url = self.endpoints.topic(topic)?;
        check(self.client.post(url).body(body.to_string()).send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl PushRegistry for FeedClient {
    async fn register(&self, registration: &PushRegistration) -> Result<(), FeedError> {
        check(
            self.client
                .post(self.endpoints.webpush())
                .json(registration)
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }

    async fn unregister(&self, endpoint: &str) -> Result<(), FeedError> {
        check(
            self.client
                .delete(self.endpoints.webpush())
                .json(&Unregister { endpoint })
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }
}
