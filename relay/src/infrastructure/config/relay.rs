//! Relay and gate settings.

use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

use crate::relay::{LiveFailurePolicy, RelayConfig};

/// Per-connection relay tunables.
#[derive(Debug, Deserialize, Clone)]
pub struct RelaySettings {
    /// Backlog message TTL in milliseconds, shared by publisher and relay.
    pub backlog_ttl_ms: u64,
    /// Backlog poll timeout in milliseconds.
    pub poll_timeout_ms: u64,
    /// Live keep-alive ping period in seconds.
    pub ping_interval_secs: u64,
    /// What happens to a live message that could not be delivered.
    #[serde(default)]
    pub live_failure_policy: LiveFailurePolicy,
}

impl RelaySettings {
    /// Backlog TTL as a duration.
    #[must_use]
    pub fn backlog_ttl(&self) -> Duration {
        Duration::from_millis(self.backlog_ttl_ms)
    }

    /// Converts to the runtime relay configuration.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            backlog_ttl: self.backlog_ttl(),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            live_failure_policy: self.live_failure_policy,
        }
    }
}

/// Connection gate settings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GateSettings {
    /// Token every client must present. When unset any non-empty token is accepted.
    pub shared_token: Option<SecretString>,
}
