//! Branch Relay - per-branch message relay over WebSocket.
//!
//! Publishers write each branch event twice: to a durable, TTL-bounded
//! backlog queue and to a live fanout exchange. A relay connection first
//! drains the backlog, then tails the exchange through a private queue,
//! forwarding every message body to its client as a text frame.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Shared application state.
pub mod app;
/// Branch identity and broker resource naming.
pub mod branch;
/// Message broker abstraction with AMQP and in-memory backends.
pub mod broker;
/// Connection admission.
pub mod gate;
/// Infrastructure components (config, server, telemetry, audit).
pub mod infrastructure;
/// Dual-write event publisher.
pub mod publisher;
/// Relay state machine.
pub mod relay;
/// WebSocket transport.
pub mod ws;
