//! Binds one upgraded WebSocket to one relay.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::relay::{BranchRelay, ClientSink, ConnectionId, RelayReport, SinkError};

/// Write half of a WebSocket as a relay sink.
pub struct WebSocketSink {
    sender: SplitSink<WebSocket, Message>,
}

impl WebSocketSink {
    async fn send(&mut self, message: Message) -> Result<(), SinkError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

#[async_trait]
impl ClientSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkError> {
        self.send(Message::Text(text.into())).await
    }

    async fn send_ping(&mut self) -> Result<(), SinkError> {
        debug!("Sending ping");
        self.send(Message::Ping(Bytes::new())).await
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SinkError> {
        self.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await
    }
}

/// Runs `relay` over `socket` until either side ends the stream.
///
/// The read half only watches for the client going away and raises the
/// relay's disconnect token; clients are not expected to send data.
pub async fn serve(socket: WebSocket, relay: BranchRelay, token: Option<String>) -> RelayReport {
    let connection_id = relay.connection_id();
    info!(connection_id = %connection_id, "WebSocket connection established");

    let (sender, receiver) = socket.split();
    let disconnect = CancellationToken::new();
    let watcher = tokio::spawn(watch_client(receiver, disconnect.clone(), connection_id));

    let mut sink = WebSocketSink { sender };
    let report = relay
        .run(token.as_deref(), &mut sink, disconnect.clone())
        .await;

    disconnect.cancel();
    if let Err(e) = watcher.await {
        debug!(connection_id = %connection_id, error = %e, "client watcher ended abnormally");
    }
    info!(connection_id = %connection_id, outcome = %report.outcome, "Connection closed");
    report
}

async fn watch_client(
    mut receiver: SplitStream<WebSocket>,
    disconnect: CancellationToken,
    connection_id: ConnectionId,
) {
    loop {
        tokio::select! {
            () = disconnect.cancelled() => return,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) => {
                    info!(connection_id = %connection_id, "Client initiated close");
                    break;
                }
                None => {
                    debug!(connection_id = %connection_id, "Stream ended");
                    break;
                }
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    debug!(connection_id = %connection_id, "Control frame received");
                }
                Some(Ok(_)) => {
                    warn!(connection_id = %connection_id, "Unexpected data from client ignored");
                }
            }
        }
    }
    disconnect.cancel();
}
