//! Integration tests for the hub backplane.

mod common;

#[path = "backplane/replay_test.rs"]
mod replay_test;

#[path = "backplane/routing_test.rs"]
mod routing_test;

#[path = "backplane/persistence_test.rs"]
mod persistence_test;
