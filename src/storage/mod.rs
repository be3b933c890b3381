//! Snapshot storage implementations.

pub mod memory;

pub use memory::MemorySnapshotStore;
