//! Hub-scoped addressing of backplane actors.
//!
//! An [`ActorDirectory`] belongs to one hub. It turns hub-local identifiers
//! (connection ids, group names, user ids) into scoped actor keys, so hubs
//! sharing one [`Backplane`] never deliver into each other. Every call made
//! through it carries a [`CancelLink`] that forwards the caller's
//! cancellation for exactly the duration of the call.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::actors::{
    AllStreamActor, ClientStreamActor, MembershipActor, MembershipMessage, StreamMessage,
};
use crate::backplane::Backplane;
use crate::error::Result;
use crate::interfaces::MessageObserver;
use crate::message::{
    scope_id, unscope_id, BroadcastEnvelope, DirectEnvelope, Handle, Payload, SubscriptionHandle,
};
use crate::runtime::{Actor, ActorKind, ActorRef, CancelLink};

/// Logical destination of a message within a hub.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    All,
    Connection(String),
    Group(String),
    User(String),
}

/// Something that accepts broadcast envelopes.
#[async_trait]
pub trait MessageAcceptor: Send + Sync {
    async fn accept(
        &self,
        envelope: BroadcastEnvelope,
        cancel: Option<&CancellationToken>,
    ) -> Result<()>;
}

/// Call `actor`, handing it a token linked to `cancel`.
async fn call_linked<A, R, F>(
    actor: &ActorRef<A>,
    cancel: Option<&CancellationToken>,
    build: F,
) -> Result<R>
where
    A: Actor,
    F: FnOnce(CancellationToken, oneshot::Sender<R>) -> A::Message,
{
    let link = CancelLink::bridge(cancel);
    let remote = link.token().clone();
    let result = actor
        .call_cancellable(link.token(), |reply| build(remote, reply))
        .await;
    drop(link);
    result
}

/// Resolves hub-local targets to actors.
#[derive(Clone)]
pub struct ActorDirectory {
    hub: String,
    backplane: Backplane,
}

impl ActorDirectory {
    pub fn new(hub: impl Into<String>, backplane: Backplane) -> Self {
        Self {
            hub: hub.into(),
            backplane,
        }
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    pub fn backplane(&self) -> &Backplane {
        &self.backplane
    }

    /// The hub's shared broadcast stream, keyed by the hub name itself.
    pub fn all(&self) -> AllStream {
        AllStream {
            hub: self.hub.clone(),
            actor: self.backplane.all_streams().get(self.hub.as_str()),
        }
    }

    pub fn connection(&self, connection_id: &str) -> ConnectionStream {
        ConnectionStream {
            connection_id: connection_id.to_string(),
            actor: self
                .backplane
                .client_streams()
                .get(scope_id(&self.hub, connection_id)),
        }
    }

    pub fn group(&self, group: &str) -> Membership {
        Membership {
            hub: self.hub.clone(),
            actor: self.backplane.groups().get(scope_id(&self.hub, group)),
        }
    }

    pub fn user(&self, user: &str) -> Membership {
        Membership {
            hub: self.hub.clone(),
            actor: self.backplane.users().get(scope_id(&self.hub, user)),
        }
    }

    pub fn resolve(&self, target: &Target) -> Box<dyn MessageAcceptor> {
        match target {
            Target::All => Box::new(self.all()),
            Target::Connection(id) => Box::new(self.connection(id)),
            Target::Group(name) => Box::new(self.group(name)),
            Target::User(id) => Box::new(self.user(id)),
        }
    }

    /// Push a direct envelope into its target connection's stream.
    pub async fn deliver(
        &self,
        envelope: DirectEnvelope,
        cancel: Option<&CancellationToken>,
    ) -> Result<Handle> {
        self.connection(&envelope.target)
            .push(envelope.payload, cancel)
            .await
    }

    /// Route `envelope` to `target`.
    pub async fn send(
        &self,
        target: &Target,
        envelope: BroadcastEnvelope,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.resolve(target).accept(envelope, cancel).await
    }
}

/// A hub's "all" stream.
///
/// Exclusion sets are scoped on the way in and unscoped on the way out, so
/// callers only ever see hub-local connection ids.
pub struct AllStream {
    hub: String,
    actor: ActorRef<AllStreamActor>,
}

impl AllStream {
    pub async fn publish(
        &self,
        envelope: BroadcastEnvelope,
        cancel: Option<&CancellationToken>,
    ) -> Result<Handle> {
        let envelope = envelope.scoped(&self.hub);
        call_linked(&self.actor, cancel, |cancel, reply| StreamMessage::Push {
            message: envelope,
            cancel,
            reply,
        })
        .await
    }

    pub async fn subscribe(
        &self,
        observer: Arc<dyn MessageObserver<BroadcastEnvelope>>,
        from: Option<Handle>,
    ) -> Result<SubscriptionHandle> {
        let observer: Arc<dyn MessageObserver<BroadcastEnvelope>> = Arc::new(UnscopingObserver {
            hub: self.hub.clone(),
            inner: observer,
        });
        self.actor
            .call(|reply| StreamMessage::Subscribe {
                observer,
                from,
                reply,
            })
            .await?
    }

    pub async fn unsubscribe(&self, subscription: SubscriptionHandle) -> Result<bool> {
        self.actor
            .call(|reply| StreamMessage::Unsubscribe {
                subscription,
                reply,
            })
            .await
    }

    pub async fn messages_since(&self, handle: Handle) -> Result<Vec<(BroadcastEnvelope, Handle)>> {
        let messages = self
            .actor
            .call(|reply| StreamMessage::MessagesSince { handle, reply })
            .await??;
        Ok(messages
            .into_iter()
            .map(|(envelope, handle)| (envelope.unscoped(&self.hub), handle))
            .collect())
    }

    pub async fn head(&self) -> Result<Handle> {
        self.actor
            .call(|reply| StreamMessage::Head { reply })
            .await
    }
}

#[async_trait]
impl MessageAcceptor for AllStream {
    async fn accept(
        &self,
        envelope: BroadcastEnvelope,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.publish(envelope, cancel).await.map(|_| ())
    }
}

struct UnscopingObserver {
    hub: String,
    inner: Arc<dyn MessageObserver<BroadcastEnvelope>>,
}

#[async_trait]
impl MessageObserver<BroadcastEnvelope> for UnscopingObserver {
    async fn on_message(&self, envelope: BroadcastEnvelope, handle: Handle) -> Result<()> {
        self.inner
            .on_message(envelope.unscoped(&self.hub), handle)
            .await
    }

    async fn on_subscription_ended(&self, subscription: SubscriptionHandle) {
        self.inner.on_subscription_ended(subscription).await
    }
}

/// One connection's private stream.
pub struct ConnectionStream {
    connection_id: String,
    actor: ActorRef<ClientStreamActor>,
}

impl ConnectionStream {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub async fn push(&self, payload: Payload, cancel: Option<&CancellationToken>) -> Result<Handle> {
        call_linked(&self.actor, cancel, |cancel, reply| StreamMessage::Push {
            message: payload,
            cancel,
            reply,
        })
        .await
    }

    pub async fn subscribe(
        &self,
        observer: Arc<dyn MessageObserver<Payload>>,
        from: Option<Handle>,
    ) -> Result<SubscriptionHandle> {
        self.actor
            .call(|reply| StreamMessage::Subscribe {
                observer,
                from,
                reply,
            })
            .await?
    }

    pub async fn unsubscribe(&self, subscription: SubscriptionHandle) -> Result<bool> {
        self.actor
            .call(|reply| StreamMessage::Unsubscribe {
                subscription,
                reply,
            })
            .await
    }

    pub async fn messages_since(&self, handle: Handle) -> Result<Vec<(Payload, Handle)>> {
        self.actor
            .call(|reply| StreamMessage::MessagesSince { handle, reply })
            .await?
    }
}

#[async_trait]
impl MessageAcceptor for ConnectionStream {
    /// A connection stream has a single recipient; the exclusion set is ignored.
    async fn accept(
        &self,
        envelope: BroadcastEnvelope,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.push(envelope.payload, cancel).await.map(|_| ())
    }
}

/// A group or user: a set of connections.
pub struct Membership {
    hub: String,
    actor: ActorRef<MembershipActor>,
}

impl Membership {
    pub fn kind(&self) -> ActorKind {
        self.actor.kind()
    }

    /// Returns true when the connection was not yet a member.
    pub async fn add(&self, connection_id: &str, cancel: Option<&CancellationToken>) -> Result<bool> {
        let member = scope_id(&self.hub, connection_id);
        call_linked(&self.actor, cancel, |_, reply| MembershipMessage::Add { member, reply }).await
    }

    /// Returns true when the connection was a member.
    pub async fn remove(
        &self,
        connection_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        let member = scope_id(&self.hub, connection_id);
        call_linked(&self.actor, cancel, |_, reply| MembershipMessage::Remove { member, reply })
            .await
    }

    /// Hub-local connection ids of every member, sorted.
    pub async fn members(&self) -> Result<Vec<String>> {
        let members = self
            .actor
            .call(|reply| MembershipMessage::Members { reply })
            .await?;
        Ok(members
            .iter()
            .filter_map(|member| unscope_id(&self.hub, member).map(str::to_string))
            .collect())
    }

    /// Fan out to every member not excluded; returns how many were targeted.
    pub async fn broadcast(
        &self,
        envelope: BroadcastEnvelope,
        cancel: Option<&CancellationToken>,
    ) -> Result<usize> {
        let envelope = envelope.scoped(&self.hub);
        call_linked(&self.actor, cancel, |cancel, reply| MembershipMessage::Accept {
            envelope,
            cancel,
            reply,
        })
        .await?
    }
}

#[async_trait]
impl MessageAcceptor for Membership {
    async fn accept(
        &self,
        envelope: BroadcastEnvelope,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.broadcast(envelope, cancel).await.map(|_| ())
    }
}
