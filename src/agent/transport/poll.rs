use std::{sync::Arc, time::Duration};

use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use super::{ConnectionState, Link, TransportError};

#[cfg(test)]
use mockall::automock;

/// The pending command endpoint of the agent service
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait CommandSource: Send + Sync {
    /// The next payload, if the agent has anything queued
    async fn fetch(&self) -> Result<Option<Value>, TransportError>;
}

pub struct HttpCommandSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpCommandSource {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait::async_trait]
impl CommandSource for HttpCommandSource {
    async fn fetch(&self) -> Result<Option<Value>, TransportError> {
        let res = self.client.get(self.url.clone()).send().await?;

        let status = res.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = res.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(TransportError::Json)
    }
}

/// Asks the [`CommandSource`] for work at a fixed interval
pub struct PollStrategy {
    source: Arc<dyn CommandSource>,
    interval: Duration,
}

impl PollStrategy {
    pub fn new(source: Arc<dyn CommandSource>, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Runs until torn down
    pub(crate) async fn run(&self, link: &Link) {
        link.set_state(ConnectionState::Connecting);

        loop {
            let res = tokio::select! {
                _ = link.cancel.cancelled() => return,
                res = self.source.fetch() => res,
            };

            match res {
                Ok(payload) => {
                    link.set_state(ConnectionState::Connected);
                    if let Some(payload) = payload {
                        let accepted = link.dispatcher.accept_payload(payload);
                        tracing::trace!(accepted, "polled agent commands");
                    }
                }
                Err(error) => {
                    link.set_state(ConnectionState::Disconnected);
                    tracing::warn!(%error, "agent poll failed");
                }
            }

            if !link.wait(self.interval).await {
                return;
            }
        }
    }
}
