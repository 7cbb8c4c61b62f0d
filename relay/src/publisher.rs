//! Event publisher feeding the relay.
//!
//! Each publish writes the same envelope twice: first to the branch's
//! durable backlog queue, then to its live fanout exchange. The backlog copy
//! is authoritative for catch-up; the fanout copy only reaches relays that
//! are already streaming live.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::branch::{ChannelNames, PublishTarget};
use crate::broker::{
    BrokerChannel, BrokerConnector, BrokerError, ExchangeSpec, OutboundMessage, QueueSpec, Route,
};

/// Wire form of a published event: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event type name.
    pub event: String,
    /// Arbitrary JSON payload.
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Builds an envelope from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Encode`] if `payload` cannot be represented as JSON.
    pub fn new<T: Serialize + ?Sized>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, PublishError> {
        Ok(Self {
            event: event_type.into(),
            data: serde_json::to_value(payload).map_err(PublishError::Encode)?,
        })
    }

    /// Serializes the envelope to its JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Encode`] if serialization fails.
    pub fn to_body(&self) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(self).map_err(PublishError::Encode)
    }
}

/// Why a publish did not complete.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The payload could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),
    /// No channel could be opened.
    #[error("broker unavailable: {0}")]
    Connect(#[source] BrokerError),
    /// Declaring or writing the backlog queue failed; nothing was broadcast.
    #[error("backlog write failed: {0}")]
    Backlog(#[source] BrokerError),
    /// The backlog write succeeded but the live broadcast failed.
    #[error("fanout write failed: {0}")]
    Fanout(#[source] BrokerError),
}

/// Publishes branch events to the broker.
///
/// Cheap to clone; each publish opens and closes its own channel.
#[derive(Clone)]
pub struct EventPublisher {
    connector: Arc<dyn BrokerConnector>,
    backlog_ttl: Duration,
}

impl EventPublisher {
    /// Creates a publisher whose backlog queues retain messages for `backlog_ttl`.
    #[must_use]
    pub fn new(connector: Arc<dyn BrokerConnector>, backlog_ttl: Duration) -> Self {
        Self {
            connector,
            backlog_ttl,
        }
    }

    /// Publishes and reports the outcome.
    ///
    /// # Errors
    ///
    /// Returns the first failure; a [`PublishError::Fanout`] means the event
    /// is still available for backlog replay.
    pub async fn try_publish<T: Serialize + ?Sized>(
        &self,
        target: &PublishTarget,
        event_type: &str,
        payload: &T,
    ) -> Result<(), PublishError> {
        let body = EventEnvelope::new(event_type, payload)?.to_body()?;
        let channel = self
            .connector
            .open_channel()
            .await
            .map_err(PublishError::Connect)?;

        let result = self
            .dual_write(channel.as_ref(), &target.channel_names(), body)
            .await;

        if let Err(e) = channel.close().await {
            debug!(error = %e, "publisher channel close failed");
        }
        result
    }

    /// Publishes without surfacing errors: failures are logged and dropped.
    #[instrument(skip(self, target, payload), fields(channel = %target))]
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        target: &PublishTarget,
        event_type: &str,
        payload: &T,
    ) {
        match self.try_publish(target, event_type, payload).await {
            Ok(()) => {
                metrics::counter!("publisher_events_total", "outcome" => "ok").increment(1);
                info!("event published to backlog and fanout");
            }
            Err(e) => {
                metrics::counter!("publisher_events_total", "outcome" => "failed").increment(1);
                error!(error = %e, "event publish failed, dropping");
            }
        }
    }

    /// Runs [`EventPublisher::publish`] on a detached task.
    pub fn spawn_publish(
        &self,
        target: PublishTarget,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> JoinHandle<()> {
        let publisher = self.clone();
        let event_type = event_type.into();
        tokio::spawn(async move {
            publisher.publish(&target, &event_type, &payload).await;
        })
    }

    async fn dual_write(
        &self,
        channel: &dyn BrokerChannel,
        names: &ChannelNames,
        body: Vec<u8>,
    ) -> Result<(), PublishError> {
        let message = OutboundMessage::persistent(body);

        channel
            .declare_queue(&QueueSpec::backlog(&names.backlog_queue, self.backlog_ttl))
            .await
            .map_err(PublishError::Backlog)?;
        channel
            .publish(Route::Queue(&names.backlog_queue), &message)
            .await
            .map_err(PublishError::Backlog)?;

        channel
            .declare_exchange(&ExchangeSpec::fanout(&names.fanout_exchange))
            .await
            .map_err(PublishError::Fanout)?;
        channel
            .publish(Route::Exchange(&names.fanout_exchange), &message)
            .await
            .map_err(PublishError::Fanout)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchId;
    use crate::broker::InMemoryBroker;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(300);

    fn publisher(broker: &InMemoryBroker) -> EventPublisher {
        EventPublisher::new(Arc::new(broker.clone()), TTL)
    }

    #[test]
    fn envelope_wire_shape() {
        let envelope = EventEnvelope::new("order_created", &json!({"id": 7})).unwrap();
        let body = String::from_utf8(envelope.to_body().unwrap()).unwrap();
        assert_eq!(body, r#"{"event":"order_created","data":{"id":7}}"#);
    }

    #[tokio::test]
    async fn publish_writes_backlog_and_declares_fanout() {
        let broker = InMemoryBroker::new();
        let target = PublishTarget::Branch(BranchId::new("7").unwrap());

        publisher(&broker)
            .try_publish(&target, "e1", &json!({"n": 1}))
            .await
            .unwrap();

        assert_eq!(broker.queue_depth("queue_branch_7"), Some(1));
        assert!(broker.exchange_exists("exchange_branch_7"));
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn live_subscriber_receives_fanout_copy() {
        let broker = InMemoryBroker::new();
        let listener = broker.open_channel().await.unwrap();
        listener
            .declare_exchange(&ExchangeSpec::fanout("exchange_channel_name"))
            .await
            .unwrap();
        let live = listener
            .declare_queue(&QueueSpec::live_subscription())
            .await
            .unwrap();
        listener
            .bind_queue(&live, "exchange_channel_name")
            .await
            .unwrap();

        publisher(&broker)
            .try_publish(&PublishTarget::Shared, "tick", &json!(null))
            .await
            .unwrap();

        assert_eq!(broker.queue_depth("channel_name"), Some(1));
        assert_eq!(broker.queue_depth(&live), Some(1));
    }

    #[tokio::test]
    async fn conflicting_backlog_declaration_skips_broadcast() {
        let broker = InMemoryBroker::new();
        let squatter = broker.open_channel().await.unwrap();
        squatter
            .declare_queue(&QueueSpec::backlog("queue_branch_x", Duration::from_secs(1)))
            .await
            .unwrap();

        let target = PublishTarget::Branch(BranchId::new("x").unwrap());
        let err = publisher(&broker)
            .try_publish(&target, "e", &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Backlog(BrokerError::Conflict(_))));
        assert!(!broker.exchange_exists("exchange_branch_x"));
    }

    #[tokio::test]
    async fn unreachable_broker_is_logged_not_raised() {
        let broker = InMemoryBroker::new();
        broker.set_unreachable(true);
        let target = PublishTarget::Branch(BranchId::new("x").unwrap());

        publisher(&broker).publish(&target, "e", &json!({})).await;

        broker.set_unreachable(false);
        assert!(!broker.queue_exists("queue_branch_x"));
    }

    #[tokio::test]
    async fn spawned_publish_completes_in_background() {
        let broker = InMemoryBroker::new();
        let target = PublishTarget::Branch(BranchId::new("bg").unwrap());

        publisher(&broker)
            .spawn_publish(target, "e", json!({"k": "v"}))
            .await
            .unwrap();

        assert_eq!(broker.queue_depth("queue_branch_bg"), Some(1));
    }
}
