use std::time::Duration;

use futures::SinkExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{message::AgentMessage, transport::TransportError};

/// How long a transient connection stays open after sending
pub const DEFAULT_GRACE: Duration = Duration::from_millis(300);

/// Opens a short-lived connection, sends `message` and closes it again
/// after `grace`, giving the other side time to read it.
#[tracing::instrument(skip(message), fields(kind = message.kind()))]
pub async fn send_once(url: &Url, message: &AgentMessage, grace: Duration) -> Result<(), TransportError> {
    let text = serde_json::to_string(message).map_err(TransportError::Json)?;

    let (mut socket, _) = connect_async(url.as_str())
        .await
        .map_err(TransportError::Connect)?;
    socket.send(Message::Text(text)).await?;
    tracing::debug!("sent agent message");

    tokio::time::sleep(grace).await;
    if let Err(error) = socket.close(None).await {
        tracing::debug!(%error, "closing transient agent socket");
    }
    Ok(())
}
