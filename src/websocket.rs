use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    registry::{self, ClientConnection},
    server::Shared,
};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(shared): Extension<Shared>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, addr, shared))
}

/// Clients only listen, so anything they send is just logged.
/// Returns when the client goes away.
pub(crate) async fn read<S>(mut receiver: S)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                trace!(%text, "client sent text, ignoring");
            }
            Ok(Message::Binary(_)) => {
                debug!("client sent binary data, ignoring");
            }
            Ok(Message::Ping(_)) => {
                trace!("socket ping");
            }
            Ok(Message::Pong(_)) => {
                trace!("socket pong");
            }
            Ok(Message::Close(_)) => {
                debug!("client disconnected");
                return;
            }
            Err(e) => {
                debug!(?e, "client read error");
                return;
            }
        }
    }

    debug!("client stream ended");
}

/// Forwards the connection's outbox to the client.
/// Returns when a write fails or takes too long.
pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut outbox: mpsc::Receiver<registry::Message>,
    write_timeout: Duration,
) {
    while let Some(message) = outbox.recv().await {
        match timeout(write_timeout, sender.send(Message::Text(message.to_string()))).await {
            Ok(Ok(())) => trace!("Sample flushed"),
            Ok(Err(_)) => {
                debug!("client disconnected");
                return;
            }
            Err(_) => {
                warn!(?write_timeout, "Write timed out, dropping client");
                return;
            }
        }
    }
}

pub(crate) async fn handle_websocket(websocket: WebSocket, addr: SocketAddr, shared: Shared) {
    let (connection, outbox) = ClientConnection::new(addr, shared.config.client_buffer);
    let id = connection.id();

    let span = info_span!("client", %id, %addr);

    async move {
        let (stream_sender, stream_receiver) = websocket.split();

        shared.stats.connection_accepted();
        shared.registry.add(connection).await;

        let mut read_handle =
            tokio::spawn(read(stream_receiver).instrument(info_span!("Read")));
        let mut write_handle = tokio::spawn(
            write(stream_sender, outbox, shared.config.timing.write_timeout())
                .instrument(info_span!("Write")),
        );

        // Whichever side stops first ends the session.
        tokio::select! {
            _ = &mut read_handle => {
                debug!("Read task joined, aborting write task");
                // This ensures the underlying TCP connection gets closed,
                // which signals the peer that the session is over.
                write_handle.abort();
            }
            _ = &mut write_handle => {
                debug!("Write task joined, aborting read task");
                read_handle.abort();
            }
        }

        shared.registry.remove(id).await;
    }
    .instrument(span)
    .await
}
