//! WebSocket transport for relays.

pub mod connection;
pub mod handler;

pub use connection::WebSocketSink;
pub use handler::{ws_router, ConnectParams, SharedParams};
