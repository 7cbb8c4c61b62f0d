//! Branch identity and the broker resource names derived from it.
//!
//! Names are part of the wire contract with existing deployments and must
//! stay bit-exact: `queue_branch_{id}` and `exchange_branch_{id}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const BACKLOG_QUEUE_PREFIX: &str = "queue_branch_";
const FANOUT_EXCHANGE_PREFIX: &str = "exchange_branch_";

/// Backlog queue used by the shared, non-branched publish target.
pub const SHARED_QUEUE_NAME: &str = "channel_name";
/// Fanout exchange used by the shared, non-branched publish target.
pub const SHARED_EXCHANGE_NAME: &str = "exchange_channel_name";

/// Rejected branch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BranchIdError {
    /// The identifier was empty or whitespace only.
    #[error("branch id must not be empty")]
    Empty,
}

/// Opaque identifier scoping a relay channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchId(String);

impl BranchId {
    /// Creates a branch id, rejecting blank input.
    ///
    /// # Errors
    ///
    /// Returns [`BranchIdError::Empty`] if `id` is empty or whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, BranchIdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(BranchIdError::Empty);
        }
        Ok(Self(id))
    }

    /// Returns the underlying string id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource names for this branch.
    #[must_use]
    pub fn channel_names(&self) -> ChannelNames {
        ChannelNames {
            backlog_queue: format!("{BACKLOG_QUEUE_PREFIX}{}", self.0),
            fanout_exchange: format!("{FANOUT_EXCHANGE_PREFIX}{}", self.0),
        }
    }
}

impl TryFrom<String> for BranchId {
    type Error = BranchIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchId> for String {
    fn from(value: BranchId) -> Self {
        value.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The pair of broker resources backing one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    /// Durable, TTL-bounded backlog queue.
    pub backlog_queue: String,
    /// Durable fanout exchange for live delivery.
    pub fanout_exchange: String,
}

impl ChannelNames {
    /// Names of the shared, non-branched channel.
    #[must_use]
    pub fn shared() -> Self {
        Self {
            backlog_queue: SHARED_QUEUE_NAME.to_string(),
            fanout_exchange: SHARED_EXCHANGE_NAME.to_string(),
        }
    }
}

/// A channel events are published to and relayed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishTarget {
    /// The backlog queue and fanout exchange of one branch.
    Branch(BranchId),
    /// The single shared channel, a degenerate one-branch deployment.
    Shared,
}

impl PublishTarget {
    /// Resolves the broker resource names for this target.
    #[must_use]
    pub fn channel_names(&self) -> ChannelNames {
        match self {
            Self::Branch(id) => id.channel_names(),
            Self::Shared => ChannelNames::shared(),
        }
    }
}

impl From<BranchId> for PublishTarget {
    fn from(value: BranchId) -> Self {
        Self::Branch(value)
    }
}

impl fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch(id) => write!(f, "branch:{id}"),
            Self::Shared => f.write_str("shared"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_deployment_convention() {
        let names = BranchId::new("42").unwrap().channel_names();
        assert_eq!(names.backlog_queue, "queue_branch_42");
        assert_eq!(names.fanout_exchange, "exchange_branch_42");
    }

    #[test]
    fn shared_target_uses_fixed_names() {
        let names = PublishTarget::Shared.channel_names();
        assert_eq!(names.backlog_queue, "channel_name");
        assert_eq!(names.fanout_exchange, "exchange_channel_name");
    }

    #[test]
    fn blank_branch_id_is_rejected() {
        assert_eq!(BranchId::new("  "), Err(BranchIdError::Empty));
        assert!(serde_json::from_str::<BranchId>("\"\"").is_err());
    }
}
