//! Test utilities and mock implementations.
//!
//! Recording implementations of the backplane's collaborator traits, for
//! exercising actors and coordinators without a real transport or store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{BackplaneError, Result};
use crate::interfaces::snapshot_store::{Result as StorageResult, SnapshotStore, StorageError};
use crate::interfaces::{HubConnection, Invocation, MessageObserver};
use crate::message::{Handle, SubscriptionHandle};
use crate::runtime::ActorKind;

/// Upper bound for the `wait_for_*` helpers.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Poll `check` until it yields a value or [`WAIT_TIMEOUT`] elapses.
pub async fn eventually<T, F, Fut>(mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Observer that records everything delivered to it.
pub struct RecordingObserver<T> {
    received: RwLock<Vec<(T, Handle)>>,
    ended: RwLock<Vec<SubscriptionHandle>>,
    fail: RwLock<bool>,
}

impl<T: Clone + Send + Sync> RecordingObserver<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            received: RwLock::new(Vec::new()),
            ended: RwLock::new(Vec::new()),
            fail: RwLock::new(false),
        })
    }

    /// Make `on_message` record and then fail.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }

    pub async fn received(&self) -> Vec<(T, Handle)> {
        self.received.read().await.clone()
    }

    pub async fn messages(&self) -> Vec<T> {
        self.received
            .read()
            .await
            .iter()
            .map(|(message, _)| message.clone())
            .collect()
    }

    pub async fn handles(&self) -> Vec<Handle> {
        self.received.read().await.iter().map(|(_, h)| *h).collect()
    }

    pub async fn ended(&self) -> Vec<SubscriptionHandle> {
        self.ended.read().await.clone()
    }

    /// Wait until at least `count` messages arrived and return them.
    pub async fn wait_for_messages(&self, count: usize) -> Vec<T> {
        eventually(move || async move {
            let messages = self.messages().await;
            (messages.len() >= count).then_some(messages)
        })
        .await
        .unwrap_or_default()
    }

    /// Wait for a subscription-ended notification.
    pub async fn wait_for_end(&self) -> Option<SubscriptionHandle> {
        eventually(move || async move { self.ended.read().await.first().copied() }).await
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> MessageObserver<T> for RecordingObserver<T> {
    async fn on_message(&self, message: T, handle: Handle) -> Result<()> {
        self.received.write().await.push((message, handle));
        if *self.fail.read().await {
            return Err(BackplaneError::Observer("recording observer set to fail".to_string()));
        }
        Ok(())
    }

    async fn on_subscription_ended(&self, subscription: SubscriptionHandle) {
        self.ended.write().await.push(subscription);
    }
}

/// Connection that records every invocation written to it.
pub struct RecordingConnection {
    id: String,
    user: Option<String>,
    aborted: AtomicBool,
    written: RwLock<Vec<Invocation>>,
    fail_on_write: RwLock<bool>,
}

impl RecordingConnection {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Self::build(id.into(), None)
    }

    pub fn with_user(id: impl Into<String>, user: impl Into<String>) -> Arc<Self> {
        Self::build(id.into(), Some(user.into()))
    }

    fn build(id: String, user: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            user,
            aborted: AtomicBool::new(false),
            written: RwLock::new(Vec::new()),
            fail_on_write: RwLock::new(false),
        })
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    pub async fn invocations(&self) -> Vec<Invocation> {
        self.written.read().await.clone()
    }

    pub async fn methods(&self) -> Vec<String> {
        self.written
            .read()
            .await
            .iter()
            .map(|i| i.method.clone())
            .collect()
    }

    /// Wait until at least `count` invocations were written and return them.
    pub async fn wait_for_invocations(&self, count: usize) -> Vec<Invocation> {
        eventually(move || async move {
            let written = self.invocations().await;
            (written.len() >= count).then_some(written)
        })
        .await
        .unwrap_or_default()
    }
}

#[async_trait]
impl HubConnection for RecordingConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn user_identifier(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    async fn write(&self, invocation: Invocation) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(BackplaneError::Delivery {
                connection_id: self.id.clone(),
                message: "recording connection set to fail".to_string(),
            });
        }
        self.written.write().await.push(invocation);
        Ok(())
    }
}

/// Snapshot store whose every operation fails.
#[derive(Default)]
pub struct FailingSnapshotStore;

#[async_trait]
impl SnapshotStore for FailingSnapshotStore {
    async fn load(&self, _kind: ActorKind, _key: &str) -> StorageResult<Option<Vec<u8>>> {
        Err(StorageError::Backend("store offline".to_string()))
    }

    async fn save(&self, _kind: ActorKind, _key: &str, _snapshot: Vec<u8>) -> StorageResult<()> {
        Err(StorageError::Backend("store offline".to_string()))
    }

    async fn delete(&self, _kind: ActorKind, _key: &str) -> StorageResult<()> {
        Err(StorageError::Backend("store offline".to_string()))
    }
}
