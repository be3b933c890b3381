//! Message model: payloads, envelopes and replay positions.
//!
//! Everything here is a plain value type. Payload bodies are opaque bytes
//! produced by an [`ArgsCodec`](crate::interfaces::ArgsCodec); the backplane
//! never looks inside them.

use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator between the hub name and an identifier in scoped ids.
pub const SCOPE_SEPARATOR: &str = "::";

/// Lineage of a replayable stream.
///
/// A new epoch is generated whenever a stream starts without persisted state,
/// which invalidates every handle issued under the previous epoch.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Epoch(pub Uuid);

impl Epoch {
    pub fn generate() -> Self {
        Epoch(Uuid::new_v4())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a message in a replayable stream.
///
/// The default handle carries no position: subscribing with it means
/// "live only". Sequences are only comparable within one epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub sequence: u64,
    pub epoch: Epoch,
}

impl Handle {
    pub fn new(sequence: u64, epoch: Epoch) -> Self {
        Self { sequence, epoch }
    }

    /// True for the default "no known position" handle.
    pub fn is_none(&self) -> bool {
        self.sequence == 0 && self.epoch.is_nil()
    }

    /// Whether `self` should replace `current` as the last delivered position.
    ///
    /// A handle from a different epoch always wins: sequences restart with a
    /// new epoch, so only forward progress inside one epoch is comparable.
    pub fn supersedes(&self, current: &Handle) -> bool {
        if self.is_none() {
            return false;
        }
        self.epoch != current.epoch || self.sequence > current.sequence
    }

    /// Converts to the optional form used by subscription calls.
    pub fn as_position(&self) -> Option<Handle> {
        (!self.is_none()).then_some(*self)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.sequence, self.epoch)
    }
}

/// A method invocation with serialized arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub method: String,
    pub body: Bytes,
}

impl Payload {
    pub fn new(method: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: method.into(),
            body: body.into(),
        }
    }
}

/// A message for every member of a target, minus an exclusion set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub excluding: HashSet<String>,
    pub payload: Payload,
}

impl BroadcastEnvelope {
    /// Envelope that excludes nobody.
    pub fn to_everyone(payload: Payload) -> Self {
        Self {
            excluding: HashSet::new(),
            payload,
        }
    }

    pub fn excluding<I, S>(payload: Payload, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluding: excluded.into_iter().map(Into::into).collect(),
            payload,
        }
    }

    pub fn is_excluded(&self, id: &str) -> bool {
        self.excluding.contains(id)
    }

    /// Prefixes every excluded id with the hub name.
    pub fn scoped(self, hub: &str) -> Self {
        Self {
            excluding: self.excluding.iter().map(|id| scope_id(hub, id)).collect(),
            payload: self.payload,
        }
    }

    /// Strips the hub prefix from every excluded id; ids from other hubs are dropped.
    pub fn unscoped(self, hub: &str) -> Self {
        Self {
            excluding: self
                .excluding
                .iter()
                .filter_map(|id| unscope_id(hub, id).map(str::to_string))
                .collect(),
            payload: self.payload,
        }
    }
}

/// A message for exactly one connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectEnvelope {
    pub target: String,
    pub payload: Payload,
}

impl DirectEnvelope {
    pub fn new(target: impl Into<String>, payload: Payload) -> Self {
        Self {
            target: target.into(),
            payload,
        }
    }
}

/// Correlation id of an active subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle(pub Uuid);

impl SubscriptionHandle {
    pub fn generate() -> Self {
        SubscriptionHandle(Uuid::new_v4())
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscription({})", self.0)
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scopes an identifier to a hub: `"{hub}::{id}"`.
pub fn scope_id(hub: &str, id: &str) -> String {
    format!("{hub}{SCOPE_SEPARATOR}{id}")
}

/// Reverses [`scope_id`], returning `None` for ids scoped to another hub.
pub fn unscope_id<'a>(hub: &str, scoped: &'a str) -> Option<&'a str> {
    scoped
        .strip_prefix(hub)
        .and_then(|rest| rest.strip_prefix(SCOPE_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_handle_is_none() {
        let handle = Handle::default();
        assert!(handle.is_none());
        assert_eq!(handle.as_position(), None);
    }

    #[test]
    fn test_supersedes_same_epoch() {
        let epoch = Epoch::generate();
        let current = Handle::new(4, epoch);
        assert!(Handle::new(5, epoch).supersedes(&current));
        assert!(!Handle::new(4, epoch).supersedes(&current));
        assert!(!Handle::new(3, epoch).supersedes(&current));
    }

    #[test]
    fn test_supersedes_new_epoch_even_when_lower() {
        let current = Handle::new(40, Epoch::generate());
        assert!(Handle::new(1, Epoch::generate()).supersedes(&current));
    }

    #[test]
    fn test_none_never_supersedes() {
        let current = Handle::new(3, Epoch::generate());
        assert!(!Handle::default().supersedes(&current));
        assert!(!Handle::default().supersedes(&Handle::default()));
    }

    #[test]
    fn test_scope_round_trip() {
        let scoped = scope_id("ChatHub", "conn-1");
        assert_eq!(scoped, "ChatHub::conn-1");
        assert_eq!(unscope_id("ChatHub", &scoped), Some("conn-1"));
        assert_eq!(unscope_id("OtherHub", &scoped), None);
        assert_eq!(unscope_id("Chat", &scoped), None);
    }

    #[test]
    fn test_envelope_scoping_drops_foreign_ids() {
        let payload = Payload::new("notify", Bytes::from_static(b"[]"));
        let envelope = BroadcastEnvelope::excluding(payload, ["a", "b"]).scoped("Hub");
        assert!(envelope.is_excluded("Hub::a"));
        assert!(envelope.is_excluded("Hub::b"));

        let mut foreign = envelope.clone();
        foreign.excluding.insert("Other::c".to_string());
        let local = foreign.unscoped("Hub");
        assert_eq!(local.excluding.len(), 2);
        assert!(local.is_excluded("a"));
        assert!(!local.is_excluded("c"));
    }
}
