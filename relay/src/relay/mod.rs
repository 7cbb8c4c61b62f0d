//! Per-connection relay from a branch's broker resources to a client.

pub mod session;
pub mod sink;
pub mod state;

pub use session::{BranchRelay, ConnectionId, LiveFailurePolicy, RelayConfig, RelayReport};
pub use sink::{ClientSink, SinkError};
pub use state::{
    RelayError, RelayOutcome, RelayState, CLOSE_INTERNAL_ERROR, CLOSE_UNAUTHORIZED,
};
