//! Message broker connection settings.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use crate::broker::amqp::RetryPolicy;

/// Which broker implementation backs the service.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrokerMode {
    /// RabbitMQ over AMQP 0-9-1.
    #[default]
    Amqp,
    /// In-process broker; state is lost on restart.
    Memory,
}

/// Broker connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Broker implementation.
    #[serde(default)]
    pub mode: BrokerMode,
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: SecretString,
    /// Connection attempts before giving up.
    pub connect_retries: u32,
    /// Delay after the first failed attempt, doubled on each retry.
    pub retry_backoff_ms: u64,
    /// Upper bound for a single retry delay.
    pub retry_backoff_max_ms: u64,
}

impl BrokerSettings {
    /// Connection string for the default vhost.
    #[must_use]
    pub fn dsn(&self) -> SecretString {
        SecretString::from(format!(
            "amqp://{}:{}@{}:{}//",
            self.user,
            self.password.expose_secret(),
            self.host,
            self.port
        ))
    }

    /// Startup retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_retries.max(1),
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.retry_backoff_max_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BrokerSettings {
        BrokerSettings {
            mode: BrokerMode::Amqp,
            host: "rabbit".into(),
            port: 5672,
            user: "guest".into(),
            password: SecretString::from(String::from("pw")),
            connect_retries: 0,
            retry_backoff_ms: 250,
            retry_backoff_max_ms: 1000,
        }
    }

    #[test]
    fn dsn_targets_default_vhost() {
        assert_eq!(
            settings().dsn().expose_secret(),
            "amqp://guest:pw@rabbit:5672//"
        );
    }

    #[test]
    fn retry_policy_keeps_at_least_one_attempt() {
        let policy = settings().retry_policy();
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.initial_backoff, Duration::from_millis(250));
    }
}
