//! Snapshot storage interface.

use async_trait::async_trait;

use crate::runtime::ActorKind;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during snapshot storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Snapshot encode failed for {kind}/{key}: {message}")]
    Encode {
        kind: ActorKind,
        key: String,
        message: String,
    },

    #[error("Snapshot decode failed for {kind}/{key}: {message}")]
    Decode {
        kind: ActorKind,
        key: String,
        message: String,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Interface for actor state persistence.
///
/// Snapshots are opaque bytes addressed by actor kind and identity key.
/// Saves are issued from a periodic timer and on deactivation, never per
/// mutation, so implementations need not be durable per write.
///
/// Implementations:
/// - `MemorySnapshotStore`: in-process map, lost on restart
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Retrieve the latest snapshot for an actor.
    ///
    /// Returns `None` if no snapshot exists.
    async fn load(&self, kind: ActorKind, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a snapshot, replacing any previous one.
    async fn save(&self, kind: ActorKind, key: &str, snapshot: Vec<u8>) -> Result<()>;

    /// Delete the snapshot for an actor.
    async fn delete(&self, kind: ActorKind, key: &str) -> Result<()>;
}
