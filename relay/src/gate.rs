//! Admission check run before a relay touches the broker.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::branch::PublishTarget;

/// Reasons a connection is turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// No token was presented.
    #[error("missing auth token")]
    MissingToken,
    /// The token was presented but rejected.
    #[error("invalid auth token")]
    InvalidToken,
}

/// Validates the token a client presents for a channel.
#[async_trait]
pub trait ConnectionGate: Send + Sync {
    /// Admits or rejects a connection to `target`.
    async fn admit(&self, target: &PublishTarget, token: Option<&str>) -> Result<(), GateError>;
}

fn present(token: Option<&str>) -> Result<&str, GateError> {
    match token {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(GateError::MissingToken),
    }
}

/// Admits any connection that carries a non-empty token.
///
/// Stand-in for deployments where the token is verified upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenPresenceGate;

#[async_trait]
impl ConnectionGate for TokenPresenceGate {
    async fn admit(&self, _target: &PublishTarget, token: Option<&str>) -> Result<(), GateError> {
        present(token).map(|_| ())
    }
}

/// Admits connections whose token equals a shared secret.
pub struct SharedSecretGate {
    secret: SecretString,
}

impl SharedSecretGate {
    /// Creates a gate accepting exactly `secret`.
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl ConnectionGate for SharedSecretGate {
    async fn admit(&self, _target: &PublishTarget, token: Option<&str>) -> Result<(), GateError> {
        let token = present(token)?;
        if constant_time_eq(token.as_bytes(), self.secret.expose_secret().as_bytes()) {
            Ok(())
        } else {
            Err(GateError::InvalidToken)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchId;

    fn branch() -> PublishTarget {
        PublishTarget::Branch(BranchId::new("b").unwrap())
    }

    #[tokio::test]
    async fn presence_gate_needs_a_token() {
        let gate = TokenPresenceGate;
        assert_eq!(gate.admit(&branch(), None).await, Err(GateError::MissingToken));
        assert_eq!(gate.admit(&branch(), Some("")).await, Err(GateError::MissingToken));
        assert_eq!(gate.admit(&branch(), Some("abc")).await, Ok(()));
    }

    #[tokio::test]
    async fn shared_secret_gate_compares_tokens() {
        let gate = SharedSecretGate::new(SecretString::from(String::from("s3cret")));
        assert_eq!(gate.admit(&branch(), Some("s3cret")).await, Ok(()));
        assert_eq!(
            gate.admit(&branch(), Some("s3cre")).await,
            Err(GateError::InvalidToken)
        );
        assert_eq!(gate.admit(&branch(), None).await, Err(GateError::MissingToken));
        assert_eq!(
            gate.admit(&PublishTarget::Shared, Some("nope")).await,
            Err(GateError::InvalidToken)
        );
    }
}
