use std::{sync::Arc, time::Duration};

use futures::{stream::BoxStream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{ConnectionState, Link, TransportError};

/// Inbound text frames of one connection. Ends when the connection closes.
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// Opens persistent connections to the agent service
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<FrameStream, TransportError>;
}

/// [`Connector`] over a websocket
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<FrameStream, TransportError> {
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(TransportError::Connect)?;

        let frames = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                Ok(_) => None,
                Err(error) => Some(Err(TransportError::Socket(error))),
            }
        });
        Ok(frames.boxed())
    }
}

/// Keeps one connection open, reconnecting after a fixed delay whenever it
/// ends, for as long as the transport is up
pub struct PushStrategy {
    url: Url,
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
}

impl PushStrategy {
    pub fn new(url: Url, connector: Arc<dyn Connector>, reconnect_delay: Duration) -> Self {
        Self {
            url,
            connector,
            reconnect_delay,
        }
    }

    /// Runs until torn down, or until `give_up_after` connects in a row have
    /// failed, in which case it returns true.
    pub(crate) async fn run(&self, link: &Link, give_up_after: Option<u32>) -> bool {
        let mut failures = 0;

        loop {
            link.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                _ = link.cancel.cancelled() => return false,
                res = self.connector.connect(&self.url) => res,
            };

            match connected {
                Ok(frames) => {
                    failures = 0;
                    link.set_state(ConnectionState::Connected);
                    if !self.read(link, frames).await {
                        return false;
                    }
                }
                Err(error) => {
                    failures += 1;
                    tracing::warn!(%error, url = %self.url, failures, "agent socket connect failed");
                    if give_up_after.is_some_and(|limit| failures >= limit) {
                        link.set_state(ConnectionState::Disconnected);
                        return true;
                    }
                }
            }

            link.set_state(ConnectionState::Disconnected);
            if !link.wait(self.reconnect_delay).await {
                return false;
            }
        }
    }

    /// Feeds frames to the dispatcher until the connection ends.
    /// Returns false if torn down meanwhile.
    async fn read(&self, link: &Link, mut frames: FrameStream) -> bool {
        loop {
            let frame = tokio::select! {
                _ = link.cancel.cancelled() => return false,
                frame = frames.next() => frame,
            };

            match frame {
                Some(Ok(text)) => {
                    link.dispatcher.accept_frame(&text);
                }
                Some(Err(error)) => {
                    tracing::warn!(%error, "agent socket failed");
                    return true;
                }
                None => {
                    tracing::info!("agent socket closed");
                    return true;
                }
            }
        }
    }
}
