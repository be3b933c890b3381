//! Shared utilities for integration tests.
//!
//! Provides an in-memory connection and helpers for wiring lifetime
//! managers onto one backplane, standing in for separate server processes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use hub_backplane::interfaces::{HubConnection, Invocation};
use hub_backplane::utils::bootstrap::init_tracing;
use hub_backplane::{Backplane, BackplaneConfig, HubLifetimeManager, JsonArgsCodec, Payload, Result};

/// How long to wait for asynchronous delivery before giving up.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause long enough for any stray delivery to land.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Backplane config with the given replay capacity on every stream.
pub fn config(capacity: usize) -> BackplaneConfig {
    let mut config = BackplaneConfig::for_test();
    config.streams.all.capacity = capacity;
    config.streams.client.capacity = capacity;
    config
}

pub fn payload(method: &str) -> Payload {
    Payload::new(method, Bytes::from_static(b"[]"))
}

/// A lifetime manager, i.e. one server process, for `hub`.
///
/// Set `BACKPLANE_LOG=debug` to see routing while a test runs.
pub async fn process(hub: &str, backplane: &Backplane) -> HubLifetimeManager {
    init_tracing();
    HubLifetimeManager::create(hub, backplane, Arc::new(JsonArgsCodec))
        .await
        .unwrap()
}

/// Connection that keeps every invocation written to it.
pub struct TestConnection {
    id: String,
    user: Option<String>,
    written: Mutex<Vec<Invocation>>,
}

impl TestConnection {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            user: None,
            written: Mutex::new(Vec::new()),
        })
    }

    pub fn for_user(id: &str, user: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            user: Some(user.to_string()),
            written: Mutex::new(Vec::new()),
        })
    }

    pub async fn methods(&self) -> Vec<String> {
        self.written
            .lock()
            .await
            .iter()
            .map(|invocation| invocation.method.clone())
            .collect()
    }

    /// Wait for at least `count` invocations and return their methods.
    pub async fn wait_for(&self, count: usize) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + DELIVERY_TIMEOUT;
        loop {
            let methods = self.methods().await;
            if methods.len() >= count || tokio::time::Instant::now() >= deadline {
                return methods;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl HubConnection for TestConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn user_identifier(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn is_aborted(&self) -> bool {
        false
    }

    async fn write(&self, invocation: Invocation) -> Result<()> {
        self.written.lock().await.push(invocation);
        Ok(())
    }
}
