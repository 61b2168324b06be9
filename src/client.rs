use futures::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

use crate::sample::Sample;

/// Problems a [`BridgeClient`] can run into.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The websocket failed.
    #[error("Websocket problem")]
    Websocket(#[from] tungstenite::Error),

    /// The bridge sent something which is not a sample.
    #[error("Could not decode sample")]
    Json(#[from] serde_json::Error),

    /// The bridge closed the connection.
    #[error("The connection was closed")]
    Closed,
}

/// A passive observer of a bridge.
pub struct BridgeClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl BridgeClient {
    /// Connect to a bridge.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        let url = format!("ws://{host}:{port}/");
        info!(%url, "Connecting");

        let (stream, response) = tokio_tungstenite::connect_async(url).await?;
        debug!(status = %response.status(), "Connected");

        Ok(Self { stream })
    }

    /// Wait for the next sample.
    pub async fn next_sample(&mut self) -> Result<Sample, ClientError> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    trace!(%text, "Message");
                    return Ok(serde_json::from_str(&text)?);
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => return Err(ClientError::Closed),
                Some(Ok(other)) => trace!(?other, "Skipping non-text message"),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;

        // Drain until the bridge acknowledges.
        while let Some(message) = self.stream.next().await {
            if message.is_err() {
                break;
            }
        }

        Ok(())
    }
}
