//! Actors hosted by the backplane.
//!
//! Stream actors (the hub-wide "all" stream and one private stream per
//! connection) buffer messages for replay and feed subscribers. Membership
//! actors (groups and users) hold sets of connection ids and fan messages out
//! to those connections' streams.

pub mod membership;
pub mod stream;

pub use membership::{MembershipActor, MembershipMessage};
pub use stream::{StreamActor, StreamItem, StreamMessage, StreamSettings};

use crate::message::{BroadcastEnvelope, Payload};

/// Hub-wide broadcast stream, keyed by hub name.
pub type AllStreamActor = StreamActor<BroadcastEnvelope>;

/// One connection's private stream, keyed by scoped connection id.
pub type ClientStreamActor = StreamActor<Payload>;
