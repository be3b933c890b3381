//! Process-wide actor hosts.
//!
//! One [`Backplane`] hosts every actor kind for all hubs in the process.
//! Hubs share the hosts; their identifiers never collide because every key
//! is scoped by hub name (see [`ActorDirectory`]).

use std::sync::Arc;

use tracing::info;

use crate::actors::{AllStreamActor, ClientStreamActor, MembershipActor, StreamSettings};
use crate::config::BackplaneConfig;
use crate::directory::ActorDirectory;
use crate::interfaces::SnapshotStore;
use crate::runtime::{ActorHost, ActorKind};
use crate::storage::MemorySnapshotStore;

/// Actor hosts for the "all" streams, client streams, groups and users.
#[derive(Clone)]
pub struct Backplane {
    all: ActorHost<AllStreamActor>,
    clients: ActorHost<ClientStreamActor>,
    groups: ActorHost<MembershipActor>,
    users: ActorHost<MembershipActor>,
}

impl Backplane {
    pub fn new(config: &BackplaneConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let persistence_enabled = config.persistence.enabled;
        let stream_options = config.stream_host_options();
        let membership_options = config.membership_host_options();

        let all = ActorHost::new(
            ActorKind::AllStream,
            StreamSettings {
                capacity: config.streams.all.capacity,
                persistence_enabled,
            },
            Arc::clone(&store),
            stream_options,
        );
        let clients = ActorHost::new(
            ActorKind::ClientStream,
            StreamSettings {
                capacity: config.streams.client.capacity,
                persistence_enabled,
            },
            Arc::clone(&store),
            stream_options,
        );
        let groups = ActorHost::new(
            ActorKind::Group,
            clients.clone(),
            Arc::clone(&store),
            membership_options,
        );
        let users = ActorHost::new(ActorKind::User, clients.clone(), store, membership_options);

        info!(
            all_capacity = config.streams.all.capacity,
            client_capacity = config.streams.client.capacity,
            persistence_enabled,
            "Backplane started"
        );

        Self {
            all,
            clients,
            groups,
            users,
        }
    }

    /// Backplane whose snapshots live in process memory.
    pub fn in_memory(config: &BackplaneConfig) -> Self {
        Self::new(config, Arc::new(MemorySnapshotStore::new()))
    }

    /// Addressing for one hub.
    pub fn directory(&self, hub: impl Into<String>) -> ActorDirectory {
        ActorDirectory::new(hub, self.clone())
    }

    pub fn all_streams(&self) -> &ActorHost<AllStreamActor> {
        &self.all
    }

    pub fn client_streams(&self) -> &ActorHost<ClientStreamActor> {
        &self.clients
    }

    pub fn groups(&self) -> &ActorHost<MembershipActor> {
        &self.groups
    }

    pub fn users(&self) -> &ActorHost<MembershipActor> {
        &self.users
    }

    /// Deactivate every actor, persisting dirty state and ending all
    /// subscriptions.
    ///
    /// Hosts stop accepting activations first, so observers reacting to
    /// their ended notices cannot bring streams back.
    pub async fn shutdown(&self) {
        self.groups.stop();
        self.users.stop();
        self.clients.stop();
        self.all.stop();
        self.groups.deactivate_all().await;
        self.users.deactivate_all().await;
        self.clients.deactivate_all().await;
        self.all.deactivate_all().await;
        info!("Backplane stopped");
    }
}
