//! In-process broker with AMQP queue and fanout semantics.
//!
//! Behaves like RabbitMQ for everything the relay relies on:
//!
//! - queues are FIFO, each message goes to exactly one consumer or getter;
//! - `x-message-ttl` expires messages lazily against [`tokio::time::Instant`],
//!   so paused-clock tests can drive eviction with `tokio::time::advance`;
//! - fanout exchanges copy every publish to each bound queue and keep
//!   nothing for queues bound later;
//! - exclusive queues belong to the declaring channel and vanish, bindings
//!   included, when that channel closes or is dropped;
//! - unacknowledged deliveries return to their queue, flagged redelivered,
//!   when their channel closes.
//!
//! `get` never waits: an empty queue answers `Ok(None)` immediately.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use super::{
    BrokerChannel, BrokerConnector, BrokerError, Delivery, DeliveryStream, ExchangeSpec,
    OutboundMessage, QueueSpec, Route,
};

type ChannelId = u64;

/// Shared handle to one in-process broker. Clones see the same state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    next_channel: AtomicU64,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    exchanges: HashMap<String, ExchangeState>,
    channels: HashMap<ChannelId, Weak<ChannelCore>>,
    unreachable: bool,
}

impl State {
    fn remove_queue(&mut self, name: &str) {
        if let Some(queue) = self.queues.remove(name) {
            for exchange in self.exchanges.values_mut() {
                exchange.bindings.remove(name);
            }
            queue.notify.notify_waiters();
            debug!(queue = %name, "queue deleted");
        }
    }

    fn check_owner(&self, name: &str, channel: ChannelId) -> Result<(), BrokerError> {
        match self.queues.get(name) {
            Some(queue) if queue.owner.is_some_and(|owner| owner != channel) => Err(
                BrokerError::Conflict(format!("queue '{name}' is exclusive to another channel")),
            ),
            Some(_) => Ok(()),
            None => Err(BrokerError::NotFound(format!("queue '{name}'"))),
        }
    }
}

#[derive(Clone)]
struct StoredMessage {
    body: Vec<u8>,
    expires_at: Option<Instant>,
    redelivered: bool,
}

struct QueueState {
    spec: QueueSpec,
    owner: Option<ChannelId>,
    ready: VecDeque<StoredMessage>,
    notify: Arc<Notify>,
}

impl QueueState {
    fn purge_expired(&mut self, now: Instant) {
        self.ready
            .retain(|message| !matches!(message.expires_at, Some(at) if at <= now));
    }

    fn take(&mut self, now: Instant) -> Option<StoredMessage> {
        self.purge_expired(now);
        self.ready.pop_front()
    }

    fn push(&mut self, body: Vec<u8>, now: Instant) {
        let expires_at = self.spec.message_ttl.map(|ttl| now + ttl);
        self.ready.push_back(StoredMessage {
            body,
            expires_at,
            redelivered: false,
        });
        self.notify.notify_waiters();
    }

    fn requeue(&mut self, mut message: StoredMessage) {
        message.redelivered = true;
        self.ready.push_front(message);
        self.notify.notify_waiters();
    }
}

struct ExchangeState {
    spec: ExchangeSpec,
    bindings: BTreeSet<String>,
}

struct Unacked {
    queue: String,
    message: StoredMessage,
}

struct ChannelCore {
    id: ChannelId,
    closed: AtomicBool,
    killed: AtomicBool,
    next_tag: AtomicU64,
    unacked: Mutex<HashMap<u64, Unacked>>,
}

impl ChannelCore {
    fn next_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl InMemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent [`BrokerConnector::open_channel`] calls fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.state.lock().unreachable = unreachable;
    }

    /// Severs every open channel as a broker outage would.
    ///
    /// Consumers on those channels yield [`BrokerError::ChannelClosed`].
    pub fn sever_all_channels(&self) {
        let cores: Vec<Arc<ChannelCore>> = self
            .inner
            .state
            .lock()
            .channels
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for core in cores {
            core.killed.store(true, Ordering::SeqCst);
            self.release(&core);
        }
    }

    /// Whether a queue named `name` exists.
    #[must_use]
    pub fn queue_exists(&self, name: &str) -> bool {
        self.inner.state.lock().queues.contains_key(name)
    }

    /// Whether an exchange named `name` exists.
    #[must_use]
    pub fn exchange_exists(&self, name: &str) -> bool {
        self.inner.state.lock().exchanges.contains_key(name)
    }

    /// Queues currently bound to `exchange`, sorted by name.
    #[must_use]
    pub fn bindings(&self, exchange: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .exchanges
            .get(exchange)
            .map(|exchange| exchange.bindings.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Unexpired messages waiting in `queue`, or `None` if it does not exist.
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        let mut state = self.inner.state.lock();
        let queue = state.queues.get_mut(queue)?;
        queue.purge_expired(Instant::now());
        Some(queue.ready.len())
    }

    /// Number of channels that are open.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.inner
            .state
            .lock()
            .channels
            .values()
            .filter(|core| core.strong_count() > 0)
            .count()
    }

    fn release(&self, core: &ChannelCore) {
        if core.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut unacked: Vec<(u64, Unacked)> = core.unacked.lock().drain().collect();
        unacked.sort_by_key(|(tag, _)| *tag);

        let mut state = self.inner.state.lock();
        state.channels.remove(&core.id);

        for (_, pending) in unacked.into_iter().rev() {
            if let Some(queue) = state.queues.get_mut(&pending.queue) {
                queue.requeue(pending.message);
            }
        }

        let owned: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, queue)| queue.owner == Some(core.id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in owned {
            state.remove_queue(&name);
        }

        for queue in state.queues.values() {
            queue.notify.notify_waiters();
        }
        debug!(channel = core.id, "channel released");
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let mut state = self.inner.state.lock();
        if state.unreachable {
            return Err(BrokerError::Connect {
                attempts: 1,
                reason: "in-memory broker marked unreachable".into(),
            });
        }

        let id = self.inner.next_channel.fetch_add(1, Ordering::SeqCst) + 1;
        let core = Arc::new(ChannelCore {
            id,
            closed: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            next_tag: AtomicU64::new(0),
            unacked: Mutex::new(HashMap::new()),
        });
        state.channels.insert(id, Arc::downgrade(&core));
        debug!(channel = id, "channel opened");

        Ok(Box::new(InMemoryChannel {
            core,
            broker: self.clone(),
        }))
    }
}

/// One channel on an [`InMemoryBroker`]. Dropping it closes it.
pub struct InMemoryChannel {
    core: Arc<ChannelCore>,
    broker: InMemoryBroker,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.core.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        Ok(())
    }
}

fn same_queue_params(a: &QueueSpec, b: &QueueSpec) -> bool {
    a.durable == b.durable
        && a.exclusive == b.exclusive
        && a.auto_delete == b.auto_delete
        && a.message_ttl == b.message_ttl
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<String, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.inner.state.lock();

        let name = if spec.name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            spec.name.clone()
        };

        if let Some(existing) = state.queues.get(&name) {
            state.check_owner(&name, self.core.id)?;
            if !same_queue_params(&existing.spec, spec) {
                return Err(BrokerError::Conflict(format!(
                    "queue '{name}' already declared with different parameters"
                )));
            }
            return Ok(name);
        }

        let mut stored = spec.clone();
        stored.name.clone_from(&name);
        state.queues.insert(
            name.clone(),
            QueueState {
                spec: stored,
                owner: spec.exclusive.then_some(self.core.id),
                ready: VecDeque::new(),
                notify: Arc::new(Notify::new()),
            },
        );
        debug!(queue = %name, channel = self.core.id, "queue declared");
        Ok(name)
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.inner.state.lock();

        if let Some(existing) = state.exchanges.get(&spec.name) {
            if existing.spec != *spec {
                return Err(BrokerError::Conflict(format!(
                    "exchange '{}' already declared with different parameters",
                    spec.name
                )));
            }
            return Ok(());
        }

        state.exchanges.insert(
            spec.name.clone(),
            ExchangeState {
                spec: spec.clone(),
                bindings: BTreeSet::new(),
            },
        );
        debug!(exchange = %spec.name, "exchange declared");
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.inner.state.lock();
        state.check_owner(queue, self.core.id)?;
        let target = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::NotFound(format!("exchange '{exchange}'")))?;
        target.bindings.insert(queue.to_string());
        Ok(())
    }

    async fn unbind_queue(&self, queue: &str, exchange: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.inner.state.lock();
        let target = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::NotFound(format!("exchange '{exchange}'")))?;
        target.bindings.remove(queue);
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.inner.state.lock();
        match state.check_owner(queue, self.core.id) {
            Ok(()) => {
                state.remove_queue(queue);
                Ok(())
            }
            Err(BrokerError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn publish(
        &self,
        route: Route<'_>,
        message: &OutboundMessage,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut state = self.broker.inner.state.lock();

        match route {
            Route::Queue(name) => {
                let queue = state
                    .queues
                    .get_mut(name)
                    .ok_or_else(|| BrokerError::Unroutable(format!("no queue '{name}'")))?;
                queue.push(message.body.clone(), now);
            }
            Route::Exchange(name) => {
                let bound: Vec<String> = state
                    .exchanges
                    .get(name)
                    .ok_or_else(|| BrokerError::NotFound(format!("exchange '{name}'")))?
                    .bindings
                    .iter()
                    .cloned()
                    .collect();
                for queue_name in bound {
                    if let Some(queue) = state.queues.get_mut(&queue_name) {
                        queue.push(message.body.clone(), now);
                    }
                }
            }
        }
        Ok(())
    }

    async fn get(&self, queue: &str, _timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.inner.state.lock();
        state.check_owner(queue, self.core.id)?;

        let taken = state
            .queues
            .get_mut(queue)
            .and_then(|q| q.take(Instant::now()));
        Ok(taken.map(|message| Delivery {
            delivery_tag: self.core.next_tag(),
            body: message.body,
            redelivered: message.redelivered,
        }))
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn DeliveryStream>, BrokerError> {
        self.ensure_open()?;
        self.broker
            .inner
            .state
            .lock()
            .check_owner(queue, self.core.id)?;

        Ok(Box::new(InMemoryConsumer {
            broker: self.broker.clone(),
            core: Arc::clone(&self.core),
            queue: queue.to_string(),
        }))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.core
            .unacked
            .lock()
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or_else(|| BrokerError::Protocol(format!("unknown delivery tag {delivery_tag}")))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let pending = self
            .core
            .unacked
            .lock()
            .remove(&delivery_tag)
            .ok_or_else(|| BrokerError::Protocol(format!("unknown delivery tag {delivery_tag}")))?;

        if requeue {
            if let Some(queue) = self.broker.inner.state.lock().queues.get_mut(&pending.queue) {
                queue.requeue(pending.message);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.release(&self.core);
        Ok(())
    }
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        self.broker.release(&self.core);
    }
}

struct InMemoryConsumer {
    broker: InMemoryBroker,
    core: Arc<ChannelCore>,
    queue: String,
}

#[async_trait]
impl DeliveryStream for InMemoryConsumer {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        loop {
            if self.core.killed.load(Ordering::SeqCst) {
                return Some(Err(BrokerError::ChannelClosed));
            }
            if self.core.closed.load(Ordering::SeqCst) {
                return None;
            }

            let notify = {
                let state = self.broker.inner.state.lock();
                Arc::clone(&state.queues.get(&self.queue)?.notify)
            };
            // Registered before taking so a publish in between still wakes us.
            let notified = notify.notified();

            {
                let mut state = self.broker.inner.state.lock();
                let queue = state.queues.get_mut(&self.queue)?;
                if let Some(message) = queue.take(Instant::now()) {
                    let tag = self.core.next_tag();
                    self.core.unacked.lock().insert(
                        tag,
                        Unacked {
                            queue: self.queue.clone(),
                            message: message.clone(),
                        },
                    );
                    return Some(Ok(Delivery {
                        delivery_tag: tag,
                        body: message.body,
                        redelivered: message.redelivered,
                    }));
                }
            }

            notified.await;
        }
    }
}
