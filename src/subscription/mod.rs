//! Subscription layer.
//!
//! Registers observers on a hub's "all" stream and on connection streams.
//! Subscribing from a handle replays what the observer missed; when the
//! handle has fallen out of the replay window the `_or_live` variants accept
//! the gap and attach live-only instead of failing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::directory::ActorDirectory;
use crate::error::{BackplaneError, Result};
use crate::interfaces::MessageObserver;
use crate::message::{BroadcastEnvelope, Handle, Payload, SubscriptionHandle};
use crate::utils::retry::{is_retryable, resubscribe_backoff};

/// Subscribe from `from`, falling back to live-only on a replay gap.
async fn or_live<F, Fut>(stream: &str, from: Handle, subscribe: F) -> Result<SubscriptionHandle>
where
    F: Fn(Option<Handle>) -> Fut,
    Fut: Future<Output = Result<SubscriptionHandle>>,
{
    match subscribe(from.as_position()).await {
        Err(BackplaneError::ReplayRangeExceeded {
            requested,
            oldest_retained,
        }) => {
            warn!(
                %stream,
                requested,
                oldest_retained,
                "Unable to replay missed messages, subscribing live-only"
            );
            subscribe(None).await
        }
        other => other,
    }
}

/// Observer registration for one hub.
pub struct MessageObservable {
    directory: ActorDirectory,
    connections: RwLock<HashMap<String, SubscriptionHandle>>,
}

impl MessageObservable {
    pub fn new(directory: ActorDirectory) -> Self {
        Self {
            directory,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &ActorDirectory {
        &self.directory
    }

    /// Observe the hub's "all" stream.
    ///
    /// Fails with `ReplayRangeExceeded` if `from` is older than the retained
    /// window; nothing is attached in that case.
    pub async fn subscribe_to_all(
        &self,
        observer: Arc<dyn MessageObserver<BroadcastEnvelope>>,
        from: Option<Handle>,
    ) -> Result<SubscriptionHandle> {
        let subscription = self.directory.all().subscribe(observer, from).await?;
        info!(hub = %self.directory.hub(), %subscription, "Subscribed to all stream");
        Ok(subscription)
    }

    pub async fn subscribe_to_all_or_live(
        &self,
        observer: Arc<dyn MessageObserver<BroadcastEnvelope>>,
        from: Handle,
    ) -> Result<SubscriptionHandle> {
        or_live(self.directory.hub(), from, |from| {
            self.subscribe_to_all(Arc::clone(&observer), from)
        })
        .await
    }

    /// [`subscribe_to_all_or_live`](Self::subscribe_to_all_or_live), retrying
    /// transient failures with backoff.
    pub async fn resubscribe_to_all(
        &self,
        observer: Arc<dyn MessageObserver<BroadcastEnvelope>>,
        from: Handle,
    ) -> Result<SubscriptionHandle> {
        let hub = self.directory.hub();
        (|| self.subscribe_to_all_or_live(Arc::clone(&observer), from))
            .retry(resubscribe_backoff())
            .when(is_retryable)
            .notify(|err: &BackplaneError, dur: Duration| {
                warn!(%hub, error = %err, delay = ?dur, "Resubscribe to all stream failed, retrying");
            })
            .await
    }

    pub async fn unsubscribe_from_all(&self, subscription: SubscriptionHandle) -> Result<bool> {
        let removed = self.directory.all().unsubscribe(subscription).await?;
        debug!(hub = %self.directory.hub(), %subscription, removed, "Unsubscribed from all stream");
        Ok(removed)
    }

    /// Observe one connection's private stream.
    ///
    /// The subscription is remembered per connection; a previous one for the
    /// same connection is detached first so messages are never doubled.
    pub async fn subscribe_to_connection(
        &self,
        connection_id: &str,
        observer: Arc<dyn MessageObserver<Payload>>,
        from: Option<Handle>,
    ) -> Result<SubscriptionHandle> {
        let stream = self.directory.connection(connection_id);
        let previous = self.connections.read().await.get(connection_id).copied();
        if let Some(previous) = previous {
            stream.unsubscribe(previous).await?;
        }

        let subscription = stream.subscribe(observer, from).await?;
        self.connections
            .write()
            .await
            .insert(connection_id.to_string(), subscription);
        info!(
            hub = %self.directory.hub(),
            connection_id,
            %subscription,
            replay = from.is_some(),
            "Subscribed to connection stream"
        );
        Ok(subscription)
    }

    pub async fn subscribe_to_connection_or_live(
        &self,
        connection_id: &str,
        observer: Arc<dyn MessageObserver<Payload>>,
        from: Handle,
    ) -> Result<SubscriptionHandle> {
        or_live(connection_id, from, |from| {
            self.subscribe_to_connection(connection_id, Arc::clone(&observer), from)
        })
        .await
    }

    pub async fn resubscribe_to_connection(
        &self,
        connection_id: &str,
        observer: Arc<dyn MessageObserver<Payload>>,
        from: Handle,
    ) -> Result<SubscriptionHandle> {
        (|| self.subscribe_to_connection_or_live(connection_id, Arc::clone(&observer), from))
            .retry(resubscribe_backoff())
            .when(is_retryable)
            .notify(|err: &BackplaneError, dur: Duration| {
                warn!(connection_id, error = %err, delay = ?dur, "Resubscribe to connection failed, retrying");
            })
            .await
    }

    /// Detach the remembered subscription of `connection_id`.
    ///
    /// Returns false when the connection had no subscription.
    pub async fn unsubscribe_from_connection(&self, connection_id: &str) -> Result<bool> {
        let subscription = self.connections.write().await.remove(connection_id);
        let Some(subscription) = subscription else {
            return Ok(false);
        };
        let removed = self
            .directory
            .connection(connection_id)
            .unsubscribe(subscription)
            .await?;
        debug!(connection_id, %subscription, removed, "Unsubscribed from connection stream");
        Ok(removed)
    }

    /// Current subscription of `connection_id`, if any.
    pub async fn connection_subscription(&self, connection_id: &str) -> Option<SubscriptionHandle> {
        self.connections.read().await.get(connection_id).copied()
    }

    /// Forget `subscription` if it is still the one recorded for the
    /// connection. Used when the stream ended it.
    pub async fn forget_connection_subscription(
        &self,
        connection_id: &str,
        subscription: SubscriptionHandle,
    ) -> bool {
        let mut connections = self.connections.write().await;
        if connections.get(connection_id) == Some(&subscription) {
            connections.remove(connection_id);
            true
        } else {
            false
        }
    }
}
