//! Group and user membership actors.
//!
//! Both kinds hold a set of scoped connection ids. Accepting an envelope
//! pushes its payload into the private stream of every member that is not
//! excluded, concurrently. The set is persisted on the flush timer and on
//! deactivation, only when it changed.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::stream::StreamMessage;
use super::ClientStreamActor;
use crate::error::{BackplaneError, Result};
use crate::message::BroadcastEnvelope;
use crate::runtime::{Actor, ActorContext, ActorHost};
use crate::utils::dispatch;

pub enum MembershipMessage {
    /// Reply is true when the member was newly inserted.
    Add {
        member: String,
        reply: oneshot::Sender<bool>,
    },
    /// Reply is true when the member was present.
    Remove {
        member: String,
        reply: oneshot::Sender<bool>,
    },
    Members {
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Fan the payload out to every member not excluded by the envelope.
    ///
    /// Replies with the number of members dispatched to, or `Cancelled` once
    /// `cancel` fires. Dispatches already started keep running.
    Accept {
        envelope: BroadcastEnvelope,
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<usize>>,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MembershipSnapshot {
    members: Vec<String>,
}

pub struct MembershipActor {
    members: HashSet<String>,
    dirty: bool,
}

impl MembershipActor {
    async fn accept(
        &self,
        envelope: BroadcastEnvelope,
        cancel: CancellationToken,
        clients: &ActorHost<ClientStreamActor>,
    ) -> Result<usize> {
        let targets: Vec<&String> = self
            .members
            .iter()
            .filter(|member| !envelope.is_excluded(member))
            .collect();

        let dispatches: Vec<_> = targets
            .iter()
            .map(|member| {
                let stream = clients.get(member.as_str());
                let payload = envelope.payload.clone();
                dispatch::spawn_logged("Member dispatch", member.to_string(), async move {
                    stream
                        .call(|reply| StreamMessage::Push {
                            message: payload,
                            cancel: CancellationToken::new(),
                            reply,
                        })
                        .await
                        .map(|_| ())
                })
            })
            .collect();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BackplaneError::Cancelled),
            _ = join_all(dispatches) => Ok(targets.len()),
        }
    }
}

#[async_trait]
impl Actor for MembershipActor {
    type Message = MembershipMessage;
    type Deps = ActorHost<ClientStreamActor>;

    async fn activate(ctx: &ActorContext<Self>) -> Self {
        let snapshot: MembershipSnapshot = ctx.load_snapshot().await.unwrap_or_default();
        debug!(kind = %ctx.kind, key = %ctx.key, members = snapshot.members.len(), "Membership restored");
        Self {
            members: snapshot.members.into_iter().collect(),
            dirty: false,
        }
    }

    async fn handle(&mut self, message: MembershipMessage, ctx: &ActorContext<Self>) {
        match message {
            MembershipMessage::Add { member, reply } => {
                let inserted = self.members.insert(member);
                self.dirty |= inserted;
                let _ = reply.send(inserted);
            }
            MembershipMessage::Remove { member, reply } => {
                let removed = self.members.remove(&member);
                self.dirty |= removed;
                let _ = reply.send(removed);
            }
            MembershipMessage::Members { reply } => {
                let mut members: Vec<String> = self.members.iter().cloned().collect();
                members.sort();
                let _ = reply.send(members);
            }
            MembershipMessage::Accept {
                envelope,
                cancel,
                reply,
            } => {
                let result = self.accept(envelope, cancel, &ctx.deps).await;
                if let Ok(count) = &result {
                    debug!(kind = %ctx.kind, key = %ctx.key, dispatched = count, "Envelope fanned out");
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn flush(&mut self, ctx: &ActorContext<Self>) {
        if !self.dirty {
            return;
        }
        let mut members: Vec<String> = self.members.iter().cloned().collect();
        members.sort();
        match ctx.save_snapshot(&MembershipSnapshot { members }).await {
            Ok(()) => self.dirty = false,
            Err(e) => warn!(kind = %ctx.kind, key = %ctx.key, error = %e, "Membership snapshot failed, will retry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::actors::StreamSettings;
    use crate::interfaces::MessageObserver;
    use crate::message::{Handle, Payload};
    use crate::runtime::{ActorKind, HostOptions};
    use crate::storage::MemorySnapshotStore;
    use crate::test_utils::RecordingObserver;

    struct Fixture {
        groups: ActorHost<MembershipActor>,
        clients: ActorHost<ClientStreamActor>,
        store: Arc<MemorySnapshotStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemorySnapshotStore::new());
        let clients = ActorHost::new(
            ActorKind::ClientStream,
            StreamSettings {
                capacity: 10,
                persistence_enabled: false,
            },
            store.clone(),
            HostOptions::default(),
        );
        let groups = ActorHost::new(
            ActorKind::Group,
            clients.clone(),
            store.clone(),
            HostOptions::default(),
        );
        Fixture {
            groups,
            clients,
            store,
        }
    }

    async fn add(host: &ActorHost<MembershipActor>, member: &str) -> bool {
        host.get("Hub::g")
            .call(|reply| MembershipMessage::Add {
                member: member.to_string(),
                reply,
            })
            .await
            .unwrap()
    }

    async fn remove(host: &ActorHost<MembershipActor>, member: &str) -> bool {
        host.get("Hub::g")
            .call(|reply| MembershipMessage::Remove {
                member: member.to_string(),
                reply,
            })
            .await
            .unwrap()
    }

    async fn observe(fixture: &Fixture, member: &str) -> Arc<RecordingObserver<Payload>> {
        let observer = RecordingObserver::new();
        let dyn_observer: Arc<dyn MessageObserver<Payload>> = observer.clone();
        fixture
            .clients
            .get(member)
            .call(|reply| StreamMessage::Subscribe {
                observer: dyn_observer,
                from: None::<Handle>,
                reply,
            })
            .await
            .unwrap()
            .unwrap();
        observer
    }

    #[tokio::test]
    async fn test_add_and_remove_are_idempotent() {
        let f = fixture();
        assert!(add(&f.groups, "Hub::c1").await);
        assert!(!add(&f.groups, "Hub::c1").await);
        assert!(remove(&f.groups, "Hub::c1").await);
        assert!(!remove(&f.groups, "Hub::c1").await);
        assert!(!remove(&f.groups, "Hub::never").await);
    }

    #[tokio::test]
    async fn test_unchanged_membership_is_not_persisted() {
        let f = fixture();
        remove(&f.groups, "Hub::absent").await;
        f.groups.deactivate("Hub::g").await;
        assert!(!f.store.contains(ActorKind::Group, "Hub::g").await);
    }

    #[tokio::test]
    async fn test_membership_survives_reactivation() {
        let f = fixture();
        add(&f.groups, "Hub::c1").await;
        add(&f.groups, "Hub::c2").await;
        f.groups.deactivate("Hub::g").await;
        assert!(f.store.contains(ActorKind::Group, "Hub::g").await);

        let members = f
            .groups
            .get("Hub::g")
            .call(|reply| MembershipMessage::Members { reply })
            .await
            .unwrap();
        assert_eq!(members, vec!["Hub::c1".to_string(), "Hub::c2".to_string()]);
    }

    #[tokio::test]
    async fn test_accept_skips_excluded_members() {
        let f = fixture();
        for member in ["Hub::c1", "Hub::c2", "Hub::c3"] {
            add(&f.groups, member).await;
        }
        let c1 = observe(&f, "Hub::c1").await;
        let c2 = observe(&f, "Hub::c2").await;
        let c3 = observe(&f, "Hub::c3").await;

        let payload = Payload::new("notify", bytes::Bytes::from_static(b"[1]"));
        let dispatched = f
            .groups
            .get("Hub::g")
            .call(|reply| MembershipMessage::Accept {
                envelope: BroadcastEnvelope::excluding(payload, ["Hub::c2"]),
                cancel: CancellationToken::new(),
                reply,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatched, 2);

        assert_eq!(c1.wait_for_messages(1).await.len(), 1);
        assert_eq!(c3.wait_for_messages(1).await.len(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(c2.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_accept_with_no_members() {
        let f = fixture();
        let payload = Payload::new("notify", bytes::Bytes::new());
        let dispatched = f
            .groups
            .get("Hub::empty")
            .call(|reply| MembershipMessage::Accept {
                envelope: BroadcastEnvelope::to_everyone(payload),
                cancel: CancellationToken::new(),
                reply,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatched, 0);
    }

    #[tokio::test]
    async fn test_accept_returns_cancelled_when_token_fires() {
        let f = fixture();
        add(&f.groups, "Hub::c1").await;
        let c1 = observe(&f, "Hub::c1").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let payload = Payload::new("notify", bytes::Bytes::new());
        let result = f
            .groups
            .get("Hub::g")
            .call(|reply| MembershipMessage::Accept {
                envelope: BroadcastEnvelope::to_everyone(payload),
                cancel,
                reply,
            })
            .await
            .unwrap();
        assert!(matches!(result, Err(BackplaneError::Cancelled)));

        // Dispatches already spawned still land; only the wait stops.
        assert_eq!(c1.wait_for_messages(1).await.len(), 1);
    }
}
