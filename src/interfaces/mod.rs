//! Abstract interfaces for backplane collaborators.
//!
//! These traits define the contracts for:
//! - Snapshot storage (best-effort actor persistence)
//! - Connections held by the transport
//! - Payload argument encoding
//! - Stream observers (subscription delivery)

pub mod codec;
pub mod connection;
pub mod observer;
pub mod snapshot_store;

pub use codec::ArgsCodec;
pub use connection::{HubConnection, Invocation};
pub use observer::MessageObserver;
pub use snapshot_store::{SnapshotStore, StorageError};
