//! Sending to a hub's clients without holding a connection.
//!
//! Background jobs and other services use a [`HubContext`] to reach clients
//! of a hub. Everything goes through the backplane actors; there is no local
//! shortcut, since the caller holds no connections.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backplane::Backplane;
use crate::directory::ActorDirectory;
use crate::error::Result;
use crate::interfaces::ArgsCodec;
use crate::message::{BroadcastEnvelope, DirectEnvelope, Payload};

/// Await every send, then report the first failure, if any.
///
/// One failing target never stops the others.
pub(crate) async fn join_sends<F>(sends: impl IntoIterator<Item = F>) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    join_all(sends)
        .await
        .into_iter()
        .collect::<Result<Vec<()>>>()
        .map(|_| ())
}

/// Routes method invocations to every kind of target of one hub.
#[derive(Clone)]
pub struct MessageSender {
    directory: ActorDirectory,
    codec: Arc<dyn ArgsCodec>,
}

impl MessageSender {
    pub fn new(directory: ActorDirectory, codec: Arc<dyn ArgsCodec>) -> Self {
        Self { directory, codec }
    }

    pub fn directory(&self) -> &ActorDirectory {
        &self.directory
    }

    /// Encode a method call into a payload.
    pub fn encode(&self, method: &str, args: &[Value]) -> Result<Payload> {
        Ok(Payload::new(method, self.codec.serialize(args)?))
    }

    pub async fn all(
        &self,
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.all_except(method, args, &[], cancel).await
    }

    pub async fn all_except(
        &self,
        method: &str,
        args: &[Value],
        excluded: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let envelope = BroadcastEnvelope::excluding(self.encode(method, args)?, excluded.iter().cloned());
        let handle = self.directory.all().publish(envelope, cancel).await?;
        debug!(hub = %self.directory.hub(), method, %handle, "Published to all");
        Ok(())
    }

    pub async fn connection(
        &self,
        connection_id: &str,
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let payload = self.encode(method, args)?;
        self.push_to_connection(connection_id, payload, cancel).await
    }

    pub async fn connections(
        &self,
        connection_ids: &[String],
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let payload = self.encode(method, args)?;
        join_sends(
            connection_ids
                .iter()
                .map(|id| self.push_to_connection(id, payload.clone(), cancel)),
        )
        .await
    }

    /// Push an already encoded payload into a connection's stream.
    pub async fn push_to_connection(
        &self,
        connection_id: &str,
        payload: Payload,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.directory
            .deliver(DirectEnvelope::new(connection_id, payload), cancel)
            .await
            .map(|_| ())
    }

    pub async fn group(
        &self,
        group: &str,
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.group_except(group, method, args, &[], cancel).await
    }

    pub async fn group_except(
        &self,
        group: &str,
        method: &str,
        args: &[Value],
        excluded: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let envelope = BroadcastEnvelope::excluding(self.encode(method, args)?, excluded.iter().cloned());
        let dispatched = self.directory.group(group).broadcast(envelope, cancel).await?;
        debug!(hub = %self.directory.hub(), group, method, dispatched, "Sent to group");
        Ok(())
    }

    pub async fn groups(
        &self,
        groups: &[String],
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let payload = self.encode(method, args)?;
        join_sends(groups.iter().map(|group| {
            let envelope = BroadcastEnvelope::to_everyone(payload.clone());
            async move {
                self.directory
                    .group(group)
                    .broadcast(envelope, cancel)
                    .await
                    .map(|_| ())
            }
        }))
        .await
    }

    pub async fn user(
        &self,
        user: &str,
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let envelope = BroadcastEnvelope::to_everyone(self.encode(method, args)?);
        let dispatched = self.directory.user(user).broadcast(envelope, cancel).await?;
        debug!(hub = %self.directory.hub(), user, method, dispatched, "Sent to user");
        Ok(())
    }

    pub async fn users(
        &self,
        users: &[String],
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let payload = self.encode(method, args)?;
        join_sends(users.iter().map(|user| {
            let envelope = BroadcastEnvelope::to_everyone(payload.clone());
            async move {
                self.directory
                    .user(user)
                    .broadcast(envelope, cancel)
                    .await
                    .map(|_| ())
            }
        }))
        .await
    }
}

/// Group membership management for one hub.
#[derive(Clone)]
pub struct GroupManager {
    directory: ActorDirectory,
}

impl GroupManager {
    pub fn new(directory: ActorDirectory) -> Self {
        Self { directory }
    }

    pub async fn add_to_group(
        &self,
        connection_id: &str,
        group: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let added = self.directory.group(group).add(connection_id, cancel).await?;
        debug!(hub = %self.directory.hub(), connection_id, group, added, "Added to group");
        Ok(())
    }

    pub async fn remove_from_group(
        &self,
        connection_id: &str,
        group: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let removed = self.directory.group(group).remove(connection_id, cancel).await?;
        debug!(hub = %self.directory.hub(), connection_id, group, removed, "Removed from group");
        Ok(())
    }
}

/// Clients and groups of one hub, reachable from anywhere in the process.
pub struct HubContext {
    clients: MessageSender,
    groups: GroupManager,
}

impl HubContext {
    pub fn new(backplane: &Backplane, hub: impl Into<String>, codec: Arc<dyn ArgsCodec>) -> Self {
        let directory = backplane.directory(hub);
        Self {
            clients: MessageSender::new(directory.clone(), codec),
            groups: GroupManager::new(directory),
        }
    }

    pub fn clients(&self) -> &MessageSender {
        &self.clients
    }

    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }
}
