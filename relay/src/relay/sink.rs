//! Client-facing side of a relay.

use async_trait::async_trait;
use thiserror::Error;

/// Failure writing to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The client closed the connection.
    #[error("client connection closed")]
    Closed,
    /// The transport reported an error.
    #[error("client transport error: {0}")]
    Transport(String),
}

/// Where a relay writes what it reads from the broker.
///
/// Disconnects are reported separately through a cancellation token, so a
/// sink only has to fail sends once the peer is gone.
#[async_trait]
pub trait ClientSink: Send {
    /// Sends one message body as a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), SinkError>;

    /// Sends a keep-alive ping.
    async fn send_ping(&mut self) -> Result<(), SinkError>;

    /// Sends a close frame with `code` and `reason`.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), SinkError>;
}
