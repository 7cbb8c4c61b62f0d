//! Configuration for the branch relay.
//!
//! Values come from built-in defaults overridden by `RELAY__`-prefixed
//! environment variables, e.g. `RELAY__BROKER__HOST=rabbit`.
//!
//! # Example
//!
//! ```
//! use branch_relay::infrastructure::config::Settings;
//!
//! let settings = Settings::new().expect("Failed to load configuration");
//! assert_eq!(settings.server.port, 9090);
//! ```

pub mod broker;
pub mod relay;
pub mod server;
pub mod telemetry;

pub use broker::{BrokerMode, BrokerSettings};
pub use relay::{GateSettings, RelaySettings};
pub use server::ServerSettings;
pub use telemetry::TelemetrySettings;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Top-level configuration for the relay service.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Server settings.
    pub server: ServerSettings,
    /// Telemetry settings.
    pub telemetry: TelemetrySettings,
    /// Broker settings.
    pub broker: BrokerSettings,
    /// Relay settings.
    pub relay: RelaySettings,
    /// Gate settings.
    #[serde(default)]
    pub gate: GateSettings,
}

impl Settings {
    /// Creates a new settings instance from environment variables and defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_env(Environment::with_prefix("RELAY").separator("__"))
    }

    fn from_env(environment: Environment) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 9090)?
            .set_default("telemetry.service_name", "branch-relay")?
            .set_default("telemetry.sampling_ratio", 1.0)?
            .set_default("telemetry.log_level", "info")?
            .set_default("broker.mode", "amqp")?
            .set_default("broker.host", "localhost")?
            .set_default("broker.port", 5672)?
            .set_default("broker.user", "guest")?
            .set_default("broker.password", "guest")?
            .set_default("broker.connect_retries", 5)?
            .set_default("broker.retry_backoff_ms", 500)?
            .set_default("broker.retry_backoff_max_ms", 10_000)?
            .set_default("relay.backlog_ttl_ms", 300_000)?
            .set_default("relay.poll_timeout_ms", 1_000)?
            .set_default("relay.ping_interval_secs", 30)?
            .set_default("relay.live_failure_policy", "requeue")?
            .add_source(environment)
            .build()?;

        s.try_deserialize()
    }
}

/// Helper for strong typing addresses
pub struct BindAddress(pub String, pub u16);

impl BindAddress {
    /// Converts the bind address to a `SocketAddr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the IP address string cannot be parsed.
    pub fn to_socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        let ip = self
            .0
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid IP address '{}': {e}", self.0))?;
        Ok(std::net::SocketAddr::new(ip, self.1))
    }
}
