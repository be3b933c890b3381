//! Hub Backplane - distributed push-messaging backplane
//!
//! Lets many server processes, each terminating its own share of client
//! connections, act as one broadcast domain. Messages addressed to everyone,
//! a group, a user or a single connection reach every matching connection
//! regardless of which process holds it, and reconnecting clients catch up
//! from a bounded, epoch-versioned replay buffer.

pub mod actors;
pub mod backplane;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod hub_context;
pub mod interfaces;
pub mod lifetime;
pub mod message;
pub mod runtime;
pub mod storage;
pub mod subscription;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backplane::Backplane;
pub use codec::JsonArgsCodec;
pub use config::BackplaneConfig;
pub use directory::{ActorDirectory, Target};
pub use error::{BackplaneError, Result};
pub use hub_context::HubContext;
pub use lifetime::HubLifetimeManager;
pub use message::{BroadcastEnvelope, DirectEnvelope, Epoch, Handle, Payload, SubscriptionHandle};
