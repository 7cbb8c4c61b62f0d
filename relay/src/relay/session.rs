//! One relay connection: gate, backlog replay, live tail, teardown.

use serde::Deserialize;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::sink::ClientSink;
use super::state::{RelayOutcome, RelayState};
use crate::branch::{ChannelNames, PublishTarget};
use crate::broker::{
    BrokerChannel, BrokerConnector, BrokerError, Delivery, ExchangeSpec, QueueSpec,
};
use crate::gate::ConnectionGate;
use crate::infrastructure::audit::{log_audit, AuditEvent};

/// Identifies one client connection in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to do with a live message that was received but not delivered.
///
/// The relay stops right after the negative acknowledgement and deletes its
/// live queue, which drops a requeued message along with it. The policy only
/// changes the outcome where the queue outlives the relay, for example when
/// the delete is refused or the broker keeps the queue for another consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveFailurePolicy {
    /// Hand it back to the broker.
    #[default]
    Requeue,
    /// Discard it.
    Drop,
}

impl LiveFailurePolicy {
    /// Whether the negative acknowledgement asks for redelivery.
    #[must_use]
    pub fn requeue(self) -> bool {
        matches!(self, Self::Requeue)
    }
}

/// Tunables for a relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// TTL the backlog queue is declared with. Must match the publisher's.
    pub backlog_ttl: Duration,
    /// How long a single backlog poll may wait before the backlog counts as drained.
    pub poll_timeout: Duration,
    /// Keep-alive ping period during live streaming.
    pub ping_interval: Duration,
    /// Handling of live messages that could not be delivered.
    pub live_failure_policy: LiveFailurePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backlog_ttl: Duration::from_secs(300),
            poll_timeout: Duration::from_secs(1),
            ping_interval: Duration::from_secs(30),
            live_failure_policy: LiveFailurePolicy::Requeue,
        }
    }
}

/// Summary returned when a relay finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    /// Why the relay stopped.
    pub outcome: RelayOutcome,
    /// Messages forwarded from the backlog queue.
    pub backlog_delivered: u64,
    /// Messages forwarded from the live subscription.
    pub live_delivered: u64,
    /// State the relay ended in.
    pub final_state: RelayState,
}

/// Streams one channel's events to one client.
///
/// The channel is either a branch or the shared one-branch channel. The
/// relay first drains its backlog queue, then subscribes a private queue to
/// its fanout exchange and forwards live messages
/// until the client leaves or something fails. Every exit path goes
/// through `Closing`, which unbinds and deletes the live queue and closes
/// the broker channel before the client is closed.
///
/// A message published between the end of the drain and the live bind is
/// not replayed to this relay; it stays in the backlog for the next one.
pub struct BranchRelay {
    target: PublishTarget,
    names: ChannelNames,
    connection_id: ConnectionId,
    connector: Arc<dyn BrokerConnector>,
    gate: Arc<dyn ConnectionGate>,
    config: RelayConfig,
    state: RelayState,
    channel: Option<Arc<dyn BrokerChannel>>,
    live_queue: Option<String>,
    backlog_delivered: u64,
    live_delivered: u64,
}

impl BranchRelay {
    /// Creates a relay in `Init`; nothing is touched until [`BranchRelay::run`].
    #[must_use]
    pub fn new(
        target: PublishTarget,
        connector: Arc<dyn BrokerConnector>,
        gate: Arc<dyn ConnectionGate>,
        config: RelayConfig,
    ) -> Self {
        let names = target.channel_names();
        Self {
            target,
            names,
            connection_id: ConnectionId::generate(),
            connector,
            gate,
            config,
            state: RelayState::Init,
            channel: None,
            live_queue: None,
            backlog_delivered: 0,
            live_delivered: 0,
        }
    }

    /// Connection identifier used in this relay's logs.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Runs the relay to completion.
    ///
    /// `disconnect` must be cancelled when the client goes away; the relay
    /// checks it at every wait point.
    #[instrument(
        skip_all,
        fields(channel = %self.target, connection_id = %self.connection_id)
    )]
    pub async fn run<S: ClientSink>(
        mut self,
        token: Option<&str>,
        sink: &mut S,
        disconnect: CancellationToken,
    ) -> RelayReport {
        metrics::gauge!("relay_connections_active").increment(1.0);
        self.enter(RelayState::AuthPending);

        let outcome = match self.gate.admit(&self.target, token).await {
            Ok(()) => self.stream(sink, &disconnect).await,
            Err(e) => {
                warn!(error = %e, "connection rejected");
                log_audit(&AuditEvent::AccessDenied {
                    connection_id: self.connection_id.to_string(),
                    channel: self.target.to_string(),
                    reason: e.to_string(),
                });
                RelayOutcome::Unauthorized(e)
            }
        };

        self.close(sink, &outcome).await;
        metrics::gauge!("relay_connections_active").decrement(1.0);

        RelayReport {
            outcome,
            backlog_delivered: self.backlog_delivered,
            live_delivered: self.live_delivered,
            final_state: self.state,
        }
    }

    fn enter(&mut self, next: RelayState) {
        match self.state.advance(next) {
            Ok(()) => debug!(state = %next, "relay state changed"),
            Err(e) => warn!(error = %e, "relay state change rejected"),
        }
    }

    async fn stream<S: ClientSink>(
        &mut self,
        sink: &mut S,
        disconnect: &CancellationToken,
    ) -> RelayOutcome {
        let channel: Arc<dyn BrokerChannel> = match self.connector.open_channel().await {
            Ok(channel) => Arc::from(channel),
            Err(e) => {
                warn!(error = %e, "broker unavailable");
                return RelayOutcome::BrokerUnavailable(e);
            }
        };
        self.channel = Some(Arc::clone(&channel));

        let backlog = QueueSpec::backlog(&self.names.backlog_queue, self.config.backlog_ttl);
        if let Err(e) = channel.declare_queue(&backlog).await {
            warn!(error = %e, queue = %self.names.backlog_queue, "backlog declaration failed");
            return RelayOutcome::BrokerFailure(e);
        }

        self.enter(RelayState::BacklogReplay);
        if let ControlFlow::Break(outcome) =
            self.replay_backlog(channel.as_ref(), sink, disconnect).await
        {
            return outcome;
        }

        let live_queue = match self.subscribe_live(channel.as_ref()).await {
            Ok(queue) => queue,
            Err(e) => {
                warn!(error = %e, "live subscription failed");
                return RelayOutcome::BrokerFailure(e);
            }
        };

        self.enter(RelayState::LiveStream);
        self.stream_live(channel.as_ref(), &live_queue, sink, disconnect)
            .await
    }

    async fn replay_backlog<S: ClientSink>(
        &mut self,
        channel: &dyn BrokerChannel,
        sink: &mut S,
        disconnect: &CancellationToken,
    ) -> ControlFlow<RelayOutcome> {
        loop {
            let polled = tokio::select! {
                biased;
                () = disconnect.cancelled() => {
                    info!("client left during backlog replay");
                    return ControlFlow::Break(RelayOutcome::ClientDisconnected);
                }
                polled = channel.get(&self.names.backlog_queue, self.config.poll_timeout) => polled,
            };

            let delivery = match polled {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    info!(
                        delivered = self.backlog_delivered,
                        "backlog drained, switching to live"
                    );
                    return ControlFlow::Continue(());
                }
                Err(e) => return ControlFlow::Break(RelayOutcome::BrokerFailure(e)),
            };

            let text = match String::from_utf8(delivery.body) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable backlog message");
                    metrics::counter!("relay_messages_skipped_total", "phase" => "backlog")
                        .increment(1);
                    continue;
                }
            };

            if let Err(e) = sink.send_text(text).await {
                info!(error = %e, "client send failed during backlog replay");
                return ControlFlow::Break(RelayOutcome::ClientDisconnected);
            }
            self.backlog_delivered += 1;
            metrics::counter!("relay_messages_forwarded_total", "phase" => "backlog").increment(1);
        }
    }

    async fn subscribe_live(&mut self, channel: &dyn BrokerChannel) -> Result<String, BrokerError> {
        channel
            .declare_exchange(&ExchangeSpec::fanout(&self.names.fanout_exchange))
            .await?;
        let queue = channel
            .declare_queue(&QueueSpec::live_subscription())
            .await?;
        self.live_queue = Some(queue.clone());
        channel
            .bind_queue(&queue, &self.names.fanout_exchange)
            .await?;
        info!(live_queue = %queue, "subscribed to live fanout");
        Ok(queue)
    }

    async fn stream_live<S: ClientSink>(
        &mut self,
        channel: &dyn BrokerChannel,
        live_queue: &str,
        sink: &mut S,
        disconnect: &CancellationToken,
    ) -> RelayOutcome {
        let mut deliveries = match channel.consume(live_queue).await {
            Ok(deliveries) => deliveries,
            Err(e) => return RelayOutcome::BrokerFailure(e),
        };

        let period = self.config.ping_interval.max(Duration::from_millis(1));
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next = tokio::select! {
                biased;
                () = disconnect.cancelled() => {
                    info!("client left during live streaming");
                    return RelayOutcome::ClientDisconnected;
                }
                next = deliveries.next_delivery() => next,
                _ = ping.tick() => {
                    if let Err(e) = sink.send_ping().await {
                        info!(error = %e, "keep-alive ping failed");
                        return RelayOutcome::ClientDisconnected;
                    }
                    continue;
                }
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return RelayOutcome::BrokerFailure(e),
                None => return RelayOutcome::BrokerFailure(BrokerError::ChannelClosed),
            };

            if let ControlFlow::Break(outcome) = self.forward_live(channel, sink, delivery).await {
                return outcome;
            }
        }
    }

    async fn forward_live<S: ClientSink>(
        &mut self,
        channel: &dyn BrokerChannel,
        sink: &mut S,
        delivery: Delivery,
    ) -> ControlFlow<RelayOutcome> {
        let tag = delivery.delivery_tag;
        let requeue = self.config.live_failure_policy.requeue();

        let text = match String::from_utf8(delivery.body) {
            Ok(text) => text,
            Err(e) => {
                warn!(delivery_tag = tag, requeue, error = %e, "live message could not be decoded");
                if let Err(nack) = channel.nack(tag, requeue).await {
                    debug!(error = %nack, "nack after handling failure failed");
                }
                return ControlFlow::Break(RelayOutcome::HandlingFailure(e.to_string()));
            }
        };

        if let Err(e) = sink.send_text(text).await {
            info!(delivery_tag = tag, requeue, error = %e, "client send failed during live streaming");
            if let Err(nack) = channel.nack(tag, requeue).await {
                debug!(error = %nack, "nack after send failure failed");
            }
            return ControlFlow::Break(RelayOutcome::ClientDisconnected);
        }

        self.live_delivered += 1;
        metrics::counter!("relay_messages_forwarded_total", "phase" => "live").increment(1);
        match channel.ack(tag).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => ControlFlow::Break(RelayOutcome::BrokerFailure(e)),
        }
    }

    async fn close<S: ClientSink>(&mut self, sink: &mut S, outcome: &RelayOutcome) {
        if self.state == RelayState::Closed {
            return;
        }
        self.enter(RelayState::Closing);
        self.release_broker().await;

        if let Some(code) = outcome.close_code() {
            if let Err(e) = sink.close(code, outcome.label()).await {
                debug!(error = %e, "close frame not delivered");
            }
        }

        self.enter(RelayState::Closed);
        metrics::counter!("relay_closed_total", "reason" => outcome.label()).increment(1);
        info!(
            outcome = %outcome,
            backlog_delivered = self.backlog_delivered,
            live_delivered = self.live_delivered,
            "relay closed"
        );
    }

    async fn release_broker(&mut self) {
        let Some(channel) = self.channel.take() else {
            return;
        };

        if let Some(queue) = self.live_queue.take() {
            if let Err(e) = channel
                .unbind_queue(&queue, &self.names.fanout_exchange)
                .await
            {
                debug!(error = %e, live_queue = %queue, "live queue unbind failed");
            }
            if let Err(e) = channel.delete_queue(&queue).await {
                debug!(error = %e, live_queue = %queue, "live queue delete failed");
            }
        }

        if let Err(e) = channel.close().await {
            debug!(error = %e, "broker channel close failed");
        }
    }
}
