#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::http::StatusCode;
use color_eyre::Result;
use futures::{SinkExt, Stream, StreamExt};
use serial_bridge::{
    config::{Config, Timing},
    mock::MockLines,
    sample::Sample,
    serial::{error::ReadError, RawLine},
    server::Bridge,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn test_config() -> Config {
    let mut config = Config::default();

    config.listen.host = "127.0.0.1".into();
    config.listen.port = 0;
    config.timing = Timing {
        retry_backoff_ms: 1,
        idle_poll_ms: 1,
        read_timeout_ms: 50,
        write_timeout_ms: 500,
    };

    config
}

pub async fn start_bridge_with_lines<S>(lines: S) -> (Arc<Bridge>, u16)
where
    S: Stream<Item = std::result::Result<RawLine, ReadError>> + Send + 'static,
{
    let bridge = Arc::new(Bridge::new(test_config()).expect("Test config should be valid"));
    let (port_tx, port_rx) = oneshot::channel();

    let serving = bridge.clone();
    tokio::spawn(async move { serving.serve(lines, Some(port_tx)).await });

    let port = port_rx
        .await
        .expect("Server should reply with allocated port");

    (bridge, port)
}

pub async fn start_bridge() -> (MockLines, Arc<Bridge>, u16) {
    let (feeder, lines) = MockLines::new();
    let (bridge, port) = start_bridge_with_lines(lines).await;

    (feeder, bridge, port)
}

pub async fn connect(port: u16) -> Result<Client> {
    info!("Connecting to bridge on port {port}");
    let (stream, http_response) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/")).await?;

    assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

    Ok(stream)
}

/// Wait until the bridge has registered exactly this many clients.
pub async fn wait_for_clients(bridge: &Bridge, clients: usize) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while bridge.registry().len().await != clients {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    Ok(())
}

/// Wait until the bridge has parsed at least this many samples.
pub async fn wait_for_samples(bridge: &Bridge, samples: u64) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while bridge.stats().await.samples < samples {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    Ok(())
}

pub async fn receive(client: &mut Client) -> Result<Sample> {
    let message = timeout(Duration::from_secs(5), client.next())
        .await?
        .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;

    let message = message.to_text()?;
    let sample = serde_json::from_str(message)?;

    Ok(sample)
}

pub async fn receive_text(client: &mut Client) -> Result<String> {
    let message = timeout(Duration::from_secs(5), client.next())
        .await?
        .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;

    Ok(message.to_text()?.to_owned())
}

/// True if nothing arrives within a short while.
pub async fn receives_nothing(client: &mut Client) -> bool {
    timeout(Duration::from_millis(200), client.next())
        .await
        .is_err()
}

pub async fn close(mut client: Client) -> Result<()> {
    client.close(None).await?;

    Ok(())
}

/// A bare bones HTTP GET, returning the status line and body.
pub async fn http_get(port: u16, path: &str) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;

    stream
        .write_all(format!("GET {path} HTTP/1.0\r\nHost: localhost\r\n\r\n").as_bytes())
        .await?;

    let mut response = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut response)).await??;

    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| color_eyre::eyre::eyre!("No HTTP body in {response:?}"))?;
    let status = head.lines().next().unwrap_or_default().to_owned();

    Ok((status, body.to_owned()))
}

pub async fn send_text(client: &mut Client, text: &str) -> Result<()> {
    client
        .send(tungstenite::Message::Text(text.to_owned()))
        .await?;

    Ok(())
}
