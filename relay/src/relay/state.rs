//! Relay lifecycle states and terminal outcomes.

use std::fmt;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::gate::GateError;

/// WebSocket close code sent when the gate rejects a connection.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// WebSocket close code sent when the relay fails on the server side.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Lifecycle of one relay connection.
///
/// `Init → AuthPending → BacklogReplay → LiveStream → Closing → Closed`,
/// with `Closing` reachable from every active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayState {
    /// Created, nothing accepted yet.
    #[default]
    Init,
    /// Connection accepted, waiting on the gate.
    AuthPending,
    /// Draining the branch backlog queue.
    BacklogReplay,
    /// Forwarding the live fanout tail.
    LiveStream,
    /// Releasing broker and client resources.
    Closing,
    /// Finished.
    Closed,
}

impl RelayState {
    /// Whether moving from `self` to `next` is a legal step.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use RelayState::{AuthPending, BacklogReplay, Closed, Closing, Init, LiveStream};
        matches!(
            (self, next),
            (Init, AuthPending | Closing)
                | (AuthPending, BacklogReplay | Closing)
                | (BacklogReplay, LiveStream | Closing)
                | (LiveStream | Closing, Closing)
                | (Closing, Closed)
        )
    }

    /// Moves to `next` if the step is legal.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidTransition`] and leaves the state unchanged otherwise.
    pub fn advance(&mut self, next: Self) -> Result<(), RelayError> {
        if !self.can_transition_to(next) {
            return Err(RelayError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::AuthPending => write!(f, "auth_pending"),
            Self::BacklogReplay => write!(f, "backlog_replay"),
            Self::LiveStream => write!(f, "live_stream"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Relay state machine violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// A step outside the lifecycle graph was attempted.
    #[error("invalid relay transition from {from} to {to}")]
    InvalidTransition {
        /// State before the attempted step.
        from: RelayState,
        /// Requested state.
        to: RelayState,
    },
}

/// Why a relay stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The gate rejected the connection; no broker resource was touched.
    Unauthorized(GateError),
    /// The broker could not be reached when the relay started.
    BrokerUnavailable(BrokerError),
    /// The client went away or a send to it failed.
    ClientDisconnected,
    /// The broker failed while the relay was active.
    BrokerFailure(BrokerError),
    /// A live message could not be processed.
    HandlingFailure(String),
}

impl RelayOutcome {
    /// Close code to send to the client, if the client is still there.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Unauthorized(_) => Some(CLOSE_UNAUTHORIZED),
            Self::BrokerUnavailable(_) | Self::BrokerFailure(_) | Self::HandlingFailure(_) => {
                Some(CLOSE_INTERNAL_ERROR)
            }
            Self::ClientDisconnected => None,
        }
    }

    /// Short reason sent in the close frame and used as a metric label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::BrokerUnavailable(_) => "broker_unavailable",
            Self::ClientDisconnected => "client_disconnected",
            Self::BrokerFailure(_) => "broker_failure",
            Self::HandlingFailure(_) => "handling_failure",
        }
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized(e) => write!(f, "unauthorized: {e}"),
            Self::BrokerUnavailable(e) => write!(f, "broker unavailable: {e}"),
            Self::ClientDisconnected => write!(f, "client disconnected"),
            Self::BrokerFailure(e) => write!(f, "broker failure: {e}"),
            Self::HandlingFailure(reason) => write!(f, "message handling failed: {reason}"),
        }
    }
}
