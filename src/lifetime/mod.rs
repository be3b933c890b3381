//! Connection-lifetime coordinator.
//!
//! A [`HubLifetimeManager`] ties the connections this process terminates for
//! one hub to the backplane. It keeps:
//! - a registry of local connections with the last handle delivered on each
//!   connection's private stream
//! - one process-wide subscription to the hub's "all" stream, plus the last
//!   handle delivered on it
//!
//! When a stream ends a subscription (the actor was deactivated) the manager
//! re-subscribes from the last delivered handle, falling back to live-only
//! when the handle is no longer replayable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backplane::Backplane;
use crate::error::{BackplaneError, Result};
use crate::hub_context::{join_sends, GroupManager, MessageSender};
use crate::interfaces::{ArgsCodec, HubConnection, Invocation, MessageObserver};
use crate::message::{BroadcastEnvelope, Handle, Payload, SubscriptionHandle};
use crate::subscription::MessageObservable;
use crate::utils::dispatch;

struct LocalConnection {
    connection: Arc<dyn HubConnection>,
    own_handle: Handle,
}

struct Inner {
    hub: String,
    observable: MessageObservable,
    sender: MessageSender,
    groups: GroupManager,
    codec: Arc<dyn ArgsCodec>,
    connections: RwLock<HashMap<String, LocalConnection>>,
    all_subscription: Mutex<Option<SubscriptionHandle>>,
    latest_all: RwLock<Handle>,
    shutting_down: AtomicBool,
}

/// Binds local connections of one hub to the backplane.
#[derive(Clone)]
pub struct HubLifetimeManager {
    inner: Arc<Inner>,
}

impl HubLifetimeManager {
    /// Create the manager and subscribe this process to the hub's "all" stream.
    pub async fn create(
        hub: impl Into<String>,
        backplane: &Backplane,
        codec: Arc<dyn ArgsCodec>,
    ) -> Result<Self> {
        let directory = backplane.directory(hub);
        let inner = Arc::new(Inner {
            hub: directory.hub().to_string(),
            observable: MessageObservable::new(directory.clone()),
            sender: MessageSender::new(directory.clone(), Arc::clone(&codec)),
            groups: GroupManager::new(directory),
            codec,
            connections: RwLock::new(HashMap::new()),
            all_subscription: Mutex::new(None),
            latest_all: RwLock::new(Handle::default()),
            shutting_down: AtomicBool::new(false),
        });
        inner.ensure_all_subscription().await?;
        info!(hub = %inner.hub, "Hub lifetime manager created");
        Ok(Self { inner })
    }

    pub fn hub(&self) -> &str {
        &self.inner.hub
    }

    /// Register a connection and start delivering to it.
    ///
    /// A connection id that is still registered keeps its last delivered
    /// handle, so its backlog is replayed from there.
    ///
    /// On failure the connection is not left registered.
    pub async fn on_connected(&self, connection: Arc<dyn HubConnection>) -> Result<()> {
        let inner = &self.inner;
        let connection_id = connection.connection_id().to_string();
        let user = connection.user_identifier().map(str::to_string);

        // Registered before subscribing so the replayed backlog has a target.
        let (own_handle, previous) = {
            let mut connections = inner.connections.write().await;
            let own_handle = connections
                .get(&connection_id)
                .map(|local| local.own_handle)
                .unwrap_or_default();
            let previous = connections.insert(
                connection_id.clone(),
                LocalConnection {
                    connection,
                    own_handle,
                },
            );
            (own_handle, previous.is_some())
        };

        if let Err(e) = inner.attach(&connection_id, user.as_deref(), own_handle).await {
            inner.detach_failed(&connection_id, user.as_deref()).await;
            warn!(hub = %inner.hub, %connection_id, previous, error = %e, "Connection rejected");
            return Err(e);
        }

        info!(hub = %inner.hub, %connection_id, user = ?user, "Connection registered");
        Ok(())
    }

    /// Forget a connection: drop it from its user and stop its stream
    /// subscription. Group memberships are left to the caller.
    pub async fn on_disconnected(&self, connection_id: &str) -> Result<()> {
        let inner = &self.inner;
        let removed = inner.connections.write().await.remove(connection_id);
        let user = removed
            .as_ref()
            .and_then(|local| local.connection.user_identifier().map(str::to_string));

        let user_removal = match &user {
            Some(user) => inner
                .sender
                .directory()
                .user(user)
                .remove(connection_id, None)
                .await
                .map(|_| ()),
            None => Ok(()),
        };
        let unsubscribe = inner.observable.unsubscribe_from_connection(connection_id).await;

        info!(hub = %inner.hub, connection_id, known = removed.is_some(), "Connection removed");
        user_removal?;
        unsubscribe.map(|_| ())
    }

    pub async fn add_to_group(
        &self,
        connection_id: &str,
        group: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner.groups.add_to_group(connection_id, group, cancel).await
    }

    pub async fn remove_from_group(
        &self,
        connection_id: &str,
        group: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner
            .groups
            .remove_from_group(connection_id, group, cancel)
            .await
    }

    pub async fn send_all(
        &self,
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner.sender.all(method, args, cancel).await
    }

    pub async fn send_all_except(
        &self,
        method: &str,
        args: &[Value],
        excluded: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner
            .sender
            .all_except(method, args, excluded, cancel)
            .await
    }

    /// Send to one connection. A connection held by this process is written
    /// to directly and its stream is bypassed.
    pub async fn send_connection(
        &self,
        connection_id: &str,
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let payload = self.inner.sender.encode(method, args)?;
        self.inner.send_payload(connection_id, payload, cancel).await
    }

    pub async fn send_connections(
        &self,
        connection_ids: &[String],
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let payload = self.inner.sender.encode(method, args)?;
        join_sends(
            connection_ids
                .iter()
                .map(|id| self.inner.send_payload(id, payload.clone(), cancel)),
        )
        .await
    }

    pub async fn send_group(
        &self,
        group: &str,
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner.sender.group(group, method, args, cancel).await
    }

    pub async fn send_group_except(
        &self,
        group: &str,
        method: &str,
        args: &[Value],
        excluded: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner
            .sender
            .group_except(group, method, args, excluded, cancel)
            .await
    }

    pub async fn send_groups(
        &self,
        groups: &[String],
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner.sender.groups(groups, method, args, cancel).await
    }

    pub async fn send_user(
        &self,
        user: &str,
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner.sender.user(user, method, args, cancel).await
    }

    pub async fn send_users(
        &self,
        users: &[String],
        method: &str,
        args: &[Value],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner.sender.users(users, method, args, cancel).await
    }

    /// Stop listening to the "all" stream. Connection subscriptions stay
    /// until their connections disconnect, but are no longer renewed when
    /// their streams end them.
    pub async fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        inner.shutting_down.store(true, Ordering::SeqCst);
        let subscription = inner.all_subscription.lock().await.take();
        if let Some(subscription) = subscription {
            inner.observable.unsubscribe_from_all(subscription).await?;
        }
        info!(hub = %inner.hub, "Hub lifetime manager shut down");
        Ok(())
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    pub async fn is_connected(&self, connection_id: &str) -> bool {
        self.inner.connections.read().await.contains_key(connection_id)
    }

    /// Last handle delivered on a local connection's private stream.
    pub async fn own_handle(&self, connection_id: &str) -> Option<Handle> {
        self.inner
            .connections
            .read()
            .await
            .get(connection_id)
            .map(|local| local.own_handle)
    }

    /// Last handle delivered on the hub's "all" stream.
    pub async fn latest_all_handle(&self) -> Handle {
        *self.inner.latest_all.read().await
    }

    pub async fn all_subscription(&self) -> Option<SubscriptionHandle> {
        *self.inner.all_subscription.lock().await
    }

    pub async fn connection_subscription(&self, connection_id: &str) -> Option<SubscriptionHandle> {
        self.inner
            .observable
            .connection_subscription(connection_id)
            .await
    }
}

impl Inner {
    fn all_observer(self: &Arc<Self>) -> Arc<dyn MessageObserver<BroadcastEnvelope>> {
        Arc::new(AllObserver {
            inner: Arc::downgrade(self),
        })
    }

    fn connection_observer(self: &Arc<Self>, connection_id: &str) -> Arc<dyn MessageObserver<Payload>> {
        Arc::new(ConnectionObserver {
            inner: Arc::downgrade(self),
            connection_id: connection_id.to_string(),
        })
    }

    /// Join the user and start the connection's subscriptions.
    async fn attach(
        self: &Arc<Self>,
        connection_id: &str,
        user: Option<&str>,
        own_handle: Handle,
    ) -> Result<()> {
        if let Some(user) = user {
            self.sender
                .directory()
                .user(user)
                .add(connection_id, None)
                .await?;
        }
        self.observable
            .subscribe_to_connection_or_live(
                connection_id,
                self.connection_observer(connection_id),
                own_handle,
            )
            .await?;
        self.ensure_all_subscription().await
    }

    /// Undo a partial [`attach`](Self::attach). Best effort: the original
    /// error is what the caller reports.
    async fn detach_failed(&self, connection_id: &str, user: Option<&str>) {
        self.connections.write().await.remove(connection_id);
        if let Some(user) = user {
            let _ = self
                .sender
                .directory()
                .user(user)
                .remove(connection_id, None)
                .await;
        }
        let _ = self.observable.unsubscribe_from_connection(connection_id).await;
    }

    /// Subscribe to the "all" stream unless already subscribed.
    async fn ensure_all_subscription(self: &Arc<Self>) -> Result<()> {
        let mut current = self.all_subscription.lock().await;
        if current.is_some() {
            return Ok(());
        }
        let from = *self.latest_all.read().await;
        let subscription = self
            .observable
            .subscribe_to_all_or_live(self.all_observer(), from)
            .await?;
        *current = Some(subscription);
        Ok(())
    }

    async fn send_payload(
        &self,
        connection_id: &str,
        payload: Payload,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(BackplaneError::Cancelled);
        }
        let local = self.connections.read().await.contains_key(connection_id);
        if local {
            debug!(hub = %self.hub, connection_id, method = %payload.method, "Delivering locally");
            return self.deliver_own(connection_id, payload, Handle::default()).await;
        }
        self.sender
            .push_to_connection(connection_id, payload, cancel)
            .await
    }

    fn decode(&self, payload: Payload) -> Result<Invocation> {
        let args = self.codec.deserialize(&payload.body)?;
        Ok(Invocation {
            method: payload.method,
            args,
        })
    }

    /// Write a message from a connection's private stream.
    async fn deliver_own(&self, connection_id: &str, payload: Payload, handle: Handle) -> Result<()> {
        let connection = {
            let connections = self.connections.read().await;
            match connections.get(connection_id) {
                Some(local) if !local.connection.is_aborted() => Arc::clone(&local.connection),
                _ => {
                    debug!(hub = %self.hub, connection_id, %handle, "Connection gone, message skipped");
                    return Ok(());
                }
            }
        };

        connection.write(self.decode(payload)?).await?;

        if let Some(local) = self.connections.write().await.get_mut(connection_id) {
            if handle.supersedes(&local.own_handle) {
                local.own_handle = handle;
            }
        }
        Ok(())
    }

    /// Write a message from the "all" stream to every local connection it
    /// does not exclude.
    async fn deliver_all(&self, envelope: BroadcastEnvelope, handle: Handle) -> Result<()> {
        let targets: Vec<(String, Arc<dyn HubConnection>)> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(id, local)| !envelope.is_excluded(id) && !local.connection.is_aborted())
            .map(|(id, local)| (id.clone(), Arc::clone(&local.connection)))
            .collect();

        let invocation = self.decode(envelope.payload)?;
        let delivered = join_all(targets.iter().map(|(id, connection)| {
            dispatch::logged("Delivery", id, connection.write(invocation.clone()))
        }))
        .await;
        debug!(
            hub = %self.hub,
            %handle,
            targets = targets.len(),
            delivered = delivered.iter().filter(|ok| **ok).count(),
            "Delivered broadcast"
        );

        let mut latest = self.latest_all.write().await;
        if handle.supersedes(&latest) {
            *latest = handle;
        }
        Ok(())
    }

    async fn on_all_ended(self: &Arc<Self>, ended: SubscriptionHandle) {
        let mut current = self.all_subscription.lock().await;
        if *current != Some(ended) {
            return;
        }
        *current = None;
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let from = *self.latest_all.read().await;
        match self.observable.resubscribe_to_all(self.all_observer(), from).await {
            Ok(subscription) => {
                info!(hub = %self.hub, %subscription, from = %from, "Resubscribed to all stream");
                *current = Some(subscription);
            }
            // The next connection to arrive tries again.
            Err(e) => error!(hub = %self.hub, error = %e, "Failed to resubscribe to all stream"),
        }
    }

    async fn on_connection_ended(self: &Arc<Self>, connection_id: &str, ended: SubscriptionHandle) {
        if !self
            .observable
            .forget_connection_subscription(connection_id, ended)
            .await
        {
            return;
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let from = match self.connections.read().await.get(connection_id) {
            Some(local) if !local.connection.is_aborted() => local.own_handle,
            _ => return,
        };

        match self
            .observable
            .resubscribe_to_connection(connection_id, self.connection_observer(connection_id), from)
            .await
        {
            Ok(subscription) => {
                info!(hub = %self.hub, connection_id, %subscription, from = %from, "Resubscribed to connection stream");
                // Disconnected while we were resubscribing.
                if !self.connections.read().await.contains_key(connection_id) {
                    if let Err(e) = self.observable.unsubscribe_from_connection(connection_id).await {
                        warn!(hub = %self.hub, connection_id, error = %e, "Failed to drop stale subscription");
                    }
                }
            }
            Err(e) => {
                error!(hub = %self.hub, connection_id, error = %e, "Failed to resubscribe to connection stream")
            }
        }
    }
}

struct AllObserver {
    inner: Weak<Inner>,
}

#[async_trait]
impl MessageObserver<BroadcastEnvelope> for AllObserver {
    async fn on_message(&self, envelope: BroadcastEnvelope, handle: Handle) -> Result<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.deliver_all(envelope, handle).await,
            None => Ok(()),
        }
    }

    async fn on_subscription_ended(&self, subscription: SubscriptionHandle) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_all_ended(subscription).await;
        }
    }
}

struct ConnectionObserver {
    inner: Weak<Inner>,
    connection_id: String,
}

#[async_trait]
impl MessageObserver<Payload> for ConnectionObserver {
    async fn on_message(&self, payload: Payload, handle: Handle) -> Result<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.deliver_own(&self.connection_id, payload, handle).await,
            None => Ok(()),
        }
    }

    async fn on_subscription_ended(&self, subscription: SubscriptionHandle) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .on_connection_ended(&self.connection_id, subscription)
                .await;
        }
    }
}
