//! Broker-facing value types and errors.

use std::time::Duration;
use thiserror::Error;

/// Persistence requested for a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Kept in memory only; lost on broker restart.
    Transient,
    /// Written to disk by durable queues.
    #[default]
    Persistent,
}

impl DeliveryMode {
    /// AMQP `delivery-mode` property value.
    #[must_use]
    pub const fn amqp_code(self) -> u8 {
        match self {
            Self::Transient => 1,
            Self::Persistent => 2,
        }
    }
}

/// Parameters of a queue declaration.
///
/// An empty `name` asks the broker to generate one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    /// Queue name, or empty for a server-named queue.
    pub name: String,
    /// Survives broker restart.
    pub durable: bool,
    /// Owned by the declaring channel; no other channel may use it.
    pub exclusive: bool,
    /// Removed once its owner goes away.
    pub auto_delete: bool,
    /// Per-message time to live (`x-message-ttl`).
    pub message_ttl: Option<Duration>,
}

impl QueueSpec {
    /// A durable, non-auto-deleted queue retaining messages for `ttl`.
    #[must_use]
    pub fn backlog(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            message_ttl: Some(ttl),
        }
    }

    /// A server-named, exclusive, auto-deleted queue for one subscriber.
    #[must_use]
    pub fn live_subscription() -> Self {
        Self {
            name: String::new(),
            durable: false,
            exclusive: true,
            auto_delete: true,
            message_ttl: None,
        }
    }

    /// `message_ttl` in whole milliseconds, as carried by `x-message-ttl`.
    #[must_use]
    pub fn ttl_millis(&self) -> Option<u64> {
        self.message_ttl
            .map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Parameters of a fanout exchange declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    /// Exchange name.
    pub name: String,
    /// Survives broker restart.
    pub durable: bool,
}

impl ExchangeSpec {
    /// A durable fanout exchange.
    #[must_use]
    pub fn fanout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }
}

/// Destination of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Straight into the named queue through the default exchange.
    /// Published as mandatory: an unroutable message is an error.
    Queue(&'a str),
    /// Into the named fanout exchange with an empty routing key.
    Exchange(&'a str),
}

/// A message about to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Serialized body.
    pub body: Vec<u8>,
    /// Requested persistence.
    pub delivery_mode: DeliveryMode,
}

impl OutboundMessage {
    /// A persistent message with the given body.
    #[must_use]
    pub fn persistent(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            delivery_mode: DeliveryMode::Persistent,
        }
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to ack or nack.
    pub delivery_tag: u64,
    /// Raw body.
    pub body: Vec<u8>,
    /// Set when the broker delivered this message before.
    pub redelivered: bool,
}

/// Errors raised across the broker boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("failed to connect to broker after {attempts} attempt(s): {reason}")]
    Connect {
        /// Attempts made before giving up.
        attempts: u32,
        /// Last failure reported by the transport.
        reason: String,
    },
    /// A queue or exchange does not exist.
    #[error("broker resource not found: {0}")]
    NotFound(String),
    /// A declaration clashed with an existing resource, or an exclusive
    /// resource is held by someone else.
    #[error("broker resource conflict: {0}")]
    Conflict(String),
    /// A mandatory publish matched no queue.
    #[error("message unroutable: {0}")]
    Unroutable(String),
    /// The channel or its connection is gone.
    #[error("broker channel closed")]
    ChannelClosed,
    /// Any other protocol-level failure.
    #[error("broker protocol error: {0}")]
    Protocol(String),
}
