//! Shared application state handed to every request.

use std::sync::Arc;

use crate::branch::PublishTarget;
use crate::broker::BrokerConnector;
use crate::gate::ConnectionGate;
use crate::publisher::EventPublisher;
use crate::relay::{BranchRelay, RelayConfig};

/// Dependencies built once at startup and shared by all connections.
#[derive(Clone)]
pub struct AppState {
    connector: Arc<dyn BrokerConnector>,
    gate: Arc<dyn ConnectionGate>,
    publisher: EventPublisher,
    relay_config: RelayConfig,
}

impl AppState {
    /// Wires a publisher to `connector` using the relay's backlog TTL.
    #[must_use]
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        gate: Arc<dyn ConnectionGate>,
        relay_config: RelayConfig,
    ) -> Self {
        let publisher = EventPublisher::new(Arc::clone(&connector), relay_config.backlog_ttl);
        Self {
            connector,
            gate,
            publisher,
            relay_config,
        }
    }

    /// Broker connector used by relays and readiness checks.
    #[must_use]
    pub fn connector(&self) -> &Arc<dyn BrokerConnector> {
        &self.connector
    }

    /// Publisher sharing this state's broker.
    #[must_use]
    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// Builds a fresh relay for one connection to `target`.
    #[must_use]
    pub fn relay_for(&self, target: PublishTarget) -> BranchRelay {
        BranchRelay::new(
            target,
            Arc::clone(&self.connector),
            Arc::clone(&self.gate),
            self.relay_config.clone(),
        )
    }
}
