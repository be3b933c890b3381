//! Error types shared across the backplane.

use crate::interfaces::snapshot_store::StorageError;
use crate::runtime::ActorKind;

/// Result type for backplane operations.
pub type Result<T> = std::result::Result<T, BackplaneError>;

/// Errors that can occur while routing, replaying or delivering messages.
#[derive(Debug, thiserror::Error)]
pub enum BackplaneError {
    /// The requested replay position has already been evicted from the buffer.
    #[error("Replay range exceeded: requested messages after {requested}, oldest retained is {oldest_retained}")]
    ReplayRangeExceeded { requested: u64, oldest_retained: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Actor {kind}/{key} is unavailable")]
    ActorUnavailable { kind: ActorKind, key: String },

    /// The host is shutting down and refuses new activations.
    #[error("Actor host for {kind} is stopped")]
    Stopped { kind: ActorKind },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Delivery to connection '{connection_id}' failed: {message}")]
    Delivery {
        connection_id: String,
        message: String,
    },

    #[error("Observer failed: {0}")]
    Observer(String),
}

impl BackplaneError {
    /// True when the error only signals a gap in replayable history.
    pub fn is_replay_range_exceeded(&self) -> bool {
        matches!(self, Self::ReplayRangeExceeded { .. })
    }
}

impl From<serde_json::Error> for BackplaneError {
    fn from(e: serde_json::Error) -> Self {
        BackplaneError::Codec(e.to_string())
    }
}
