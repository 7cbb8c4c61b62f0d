//! Message broker seam.
//!
//! The relay and the publisher talk to the broker only through
//! [`BrokerConnector`] and [`BrokerChannel`]. [`amqp::AmqpConnector`] speaks
//! AMQP 0-9-1 to RabbitMQ; [`memory::InMemoryBroker`] keeps the same
//! semantics in process for tests and local runs.

pub mod amqp;
pub mod memory;
pub mod types;

use async_trait::async_trait;
use std::time::Duration;

pub use amqp::AmqpConnector;
pub use memory::InMemoryBroker;
pub use types::{
    BrokerError, Delivery, DeliveryMode, ExchangeSpec, OutboundMessage, QueueSpec, Route,
};

/// Opens broker channels.
///
/// One connector is built at startup and shared; every relay connection and
/// every publish opens its own channel through it.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Opens a connection and a channel on it.
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// Operations on one broker channel.
///
/// Closing the channel releases everything it exclusively owns.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares a queue; returns its name (generated when `spec.name` is empty).
    /// Re-declaring with identical parameters is a no-op.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<String, BrokerError>;

    /// Declares a fanout exchange. Idempotent for identical parameters.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError>;

    /// Binds `queue` to `exchange` with an empty routing key.
    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError>;

    /// Removes the binding made by [`BrokerChannel::bind_queue`].
    async fn unbind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError>;

    /// Deletes a queue and drops its messages.
    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Publishes one message.
    async fn publish(&self, route: Route<'_>, message: &OutboundMessage)
        -> Result<(), BrokerError>;

    /// Takes one message in no-ack mode, waiting at most `timeout` for the reply.
    /// `Ok(None)` means the queue is empty. A reply that does not arrive in
    /// time is an error, since the message may already be dequeued.
    async fn get(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Starts consuming `queue` with manual acknowledgement.
    async fn consume(&self, queue: &str) -> Result<Box<dyn DeliveryStream>, BrokerError>;

    /// Acknowledges a delivery from [`BrokerChannel::consume`].
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Rejects a delivery, optionally putting it back on its queue.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Closes the channel and its connection. Safe to call more than once.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Deliveries pushed by the broker to one consumer.
#[async_trait]
pub trait DeliveryStream: Send {
    /// Waits for the next delivery. `None` once the consumer is cancelled.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;
}
