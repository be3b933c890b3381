//! In-process virtual actor host.
//!
//! Every actor identity (`kind` + string key) maps to at most one live
//! activation: a mailbox drained by a single task that owns the actor state.
//! Callers never construct actors. They ask an [`ActorHost`] for an
//! [`ActorRef`] and send messages; the first message activates the actor,
//! restoring its snapshot when it has one.
//!
//! ```text
//! ActorRef::call ──► host.mailbox(key) ──► mpsc ──► activation task
//!                         │                          ├─ A::activate (restore)
//!                         └─ spawn on first use      ├─ A::handle   (one at a time)
//!                                                    ├─ A::flush    (timer)
//!                                                    └─ A::deactivate (idle / explicit)
//! ```
//!
//! Deactivation removes the identity from the host before the mailbox closes;
//! anything already queued is still handled, and later sends transparently
//! activate a fresh instance. A stopped host activates nothing new.

mod cancel;

pub use cancel::CancelLink;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BackplaneError, Result};
use crate::interfaces::snapshot_store::{SnapshotStore, StorageError};

/// Kinds of actors hosted by the backplane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActorKind {
    /// Shared broadcast stream of a hub.
    AllStream,
    /// Private stream of one connection.
    ClientStream,
    Group,
    User,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::AllStream => "all",
            ActorKind::ClientStream => "client",
            ActorKind::Group => "group",
            ActorKind::User => "user",
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stateful entity driven by its activation task.
#[async_trait]
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;

    /// Shared collaborators handed to every activation of this kind.
    type Deps: Clone + Send + Sync + 'static;

    /// Build the in-memory instance, restoring persisted state if present.
    async fn activate(ctx: &ActorContext<Self>) -> Self;

    async fn handle(&mut self, message: Self::Message, ctx: &ActorContext<Self>);

    /// Periodic persistence hook.
    async fn flush(&mut self, _ctx: &ActorContext<Self>) {}

    /// Called once when the activation ends.
    async fn deactivate(&mut self, ctx: &ActorContext<Self>) {
        self.flush(ctx).await;
    }
}

/// Identity and collaborators of one activation.
pub struct ActorContext<A: Actor> {
    pub kind: ActorKind,
    pub key: String,
    pub deps: A::Deps,
    store: Arc<dyn SnapshotStore>,
}

impl<A: Actor> ActorContext<A> {
    /// Load and decode this actor's snapshot.
    ///
    /// Failures are logged and treated as "no snapshot": the actor starts
    /// fresh rather than refusing to activate.
    pub async fn load_snapshot<S: DeserializeOwned>(&self) -> Option<S> {
        let bytes = match self.store.load(self.kind, &self.key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!(kind = %self.kind, key = %self.key, error = %e, "Snapshot load failed, starting fresh");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                let e = StorageError::Decode {
                    kind: self.kind,
                    key: self.key.clone(),
                    message: e.to_string(),
                };
                warn!(error = %e, "Discarding unreadable snapshot");
                None
            }
        }
    }

    pub async fn save_snapshot<S: Serialize>(&self, state: &S) -> std::result::Result<(), StorageError> {
        let bytes = serde_json::to_vec(state).map_err(|e| StorageError::Encode {
            kind: self.kind,
            key: self.key.clone(),
            message: e.to_string(),
        })?;
        self.store.save(self.kind, &self.key, bytes).await
    }
}

/// Timers governing activations of one actor kind.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostOptions {
    /// Period of the `flush` hook; `None` disables it.
    pub flush_interval: Option<Duration>,
    /// Deactivate after this long without messages; `None` keeps actors alive.
    pub idle_timeout: Option<Duration>,
}

enum Envelope<A: Actor> {
    Call(A::Message),
    Deactivate(oneshot::Sender<()>),
}

struct Activation<A: Actor> {
    mailbox: mpsc::UnboundedSender<Envelope<A>>,
    generation: u64,
}

struct HostInner<A: Actor> {
    kind: ActorKind,
    deps: A::Deps,
    store: Arc<dyn SnapshotStore>,
    options: HostOptions,
    activations: Mutex<HashMap<String, Activation<A>>>,
    next_generation: AtomicU64,
    stopped: AtomicBool,
}

/// Hosts every activation of one actor kind.
pub struct ActorHost<A: Actor> {
    inner: Arc<HostInner<A>>,
}

impl<A: Actor> Clone for ActorHost<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Actor> ActorHost<A> {
    pub fn new(
        kind: ActorKind,
        deps: A::Deps,
        store: Arc<dyn SnapshotStore>,
        options: HostOptions,
    ) -> Self {
        Self {
            inner: Arc::new(HostInner {
                kind,
                deps,
                store,
                options,
                activations: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn kind(&self) -> ActorKind {
        self.inner.kind
    }

    /// Reference to an actor identity. Nothing is activated until it is used.
    pub fn get(&self, key: impl Into<String>) -> ActorRef<A> {
        ActorRef {
            host: self.clone(),
            key: key.into(),
        }
    }

    pub async fn is_active(&self, key: &str) -> bool {
        self.inner.activations.lock().await.contains_key(key)
    }

    pub async fn active_count(&self) -> usize {
        self.inner.activations.lock().await.len()
    }

    /// Deactivate one identity and wait for its deactivation hook to finish.
    ///
    /// Returns false when the identity was not active.
    pub async fn deactivate(&self, key: &str) -> bool {
        let activation = self.inner.activations.lock().await.remove(key);
        let Some(activation) = activation else {
            return false;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if activation.mailbox.send(Envelope::Deactivate(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        true
    }

    /// Refuse new activations from now on. Live activations keep running
    /// until deactivated.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub async fn deactivate_all(&self) {
        let keys: Vec<String> = self.inner.activations.lock().await.keys().cloned().collect();
        for key in keys {
            self.deactivate(&key).await;
        }
    }

    async fn mailbox(&self, key: &str) -> Result<mpsc::UnboundedSender<Envelope<A>>> {
        let mut activations = self.inner.activations.lock().await;
        if let Some(activation) = activations.get(key) {
            if !activation.mailbox.is_closed() {
                return Ok(activation.mailbox.clone());
            }
        }
        if self.is_stopped() {
            return Err(BackplaneError::Stopped {
                kind: self.inner.kind,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let ctx = ActorContext {
            kind: self.inner.kind,
            key: key.to_string(),
            deps: self.inner.deps.clone(),
            store: Arc::clone(&self.inner.store),
        };
        tokio::spawn(run_activation(
            Arc::downgrade(&self.inner),
            ctx,
            rx,
            generation,
            self.inner.options,
        ));
        activations.insert(
            key.to_string(),
            Activation {
                mailbox: tx.clone(),
                generation,
            },
        );
        Ok(tx)
    }
}

/// Location-transparent reference to one actor identity.
pub struct ActorRef<A: Actor> {
    host: ActorHost<A>,
    key: String,
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            key: self.key.clone(),
        }
    }
}

impl<A: Actor> ActorRef<A> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> ActorKind {
        self.host.kind()
    }

    /// Enqueue a message without waiting for it to be handled.
    pub async fn tell(&self, message: A::Message) -> Result<()> {
        let mut envelope = Envelope::Call(message);
        // A mailbox can close between lookup and send when the activation
        // retires; the message comes back and goes to a fresh activation.
        for _ in 0..2 {
            let mailbox = self.host.mailbox(&self.key).await?;
            match mailbox.send(envelope) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => envelope = returned,
            }
        }
        Err(self.unavailable())
    }

    /// Send a request built around a reply channel and wait for the reply.
    pub async fn call<R, F>(&self, build: F) -> Result<R>
    where
        F: FnOnce(oneshot::Sender<R>) -> A::Message,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tell(build(reply_tx)).await?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    /// Like [`call`](Self::call), but stops waiting once `cancel` fires.
    ///
    /// The request itself stays queued; the actor observes the same token
    /// through its message if it needs to stop work early.
    pub async fn call_cancellable<R, F>(&self, cancel: &CancellationToken, build: F) -> Result<R>
    where
        F: FnOnce(oneshot::Sender<R>) -> A::Message,
    {
        if cancel.is_cancelled() {
            return Err(BackplaneError::Cancelled);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tell(build(reply_tx)).await?;
        tokio::select! {
            biased;
            // The actor drops the reply of work it skipped for a fired token.
            reply = reply_rx => reply.map_err(|_| {
                if cancel.is_cancelled() {
                    BackplaneError::Cancelled
                } else {
                    self.unavailable()
                }
            }),
            _ = cancel.cancelled() => Err(BackplaneError::Cancelled),
        }
    }

    fn unavailable(&self) -> BackplaneError {
        BackplaneError::ActorUnavailable {
            kind: self.kind(),
            key: self.key.clone(),
        }
    }
}

async fn run_activation<A: Actor>(
    host: Weak<HostInner<A>>,
    ctx: ActorContext<A>,
    mut mailbox: mpsc::UnboundedReceiver<Envelope<A>>,
    generation: u64,
    options: HostOptions,
) {
    let mut actor = A::activate(&ctx).await;
    debug!(kind = %ctx.kind, key = %ctx.key, generation, "Actor activated");

    let mut flush_timer = options
        .flush_interval
        .map(|period| tokio::time::interval_at(Instant::now() + period, period));
    let mut last_activity = Instant::now();
    let mut waiting = Vec::new();

    loop {
        tokio::select! {
            envelope = mailbox.recv() => match envelope {
                Some(Envelope::Call(message)) => {
                    actor.handle(message, &ctx).await;
                    last_activity = Instant::now();
                }
                Some(Envelope::Deactivate(done)) => {
                    waiting.push(done);
                    break;
                }
                None => break,
            },
            _ = next_tick(&mut flush_timer) => actor.flush(&ctx).await,
            _ = idle_deadline(options.idle_timeout, last_activity) => {
                retire(&host, &ctx.key, generation).await;
                debug!(kind = %ctx.kind, key = %ctx.key, "Actor idle");
                break;
            }
        }
    }

    mailbox.close();
    while let Ok(envelope) = mailbox.try_recv() {
        match envelope {
            Envelope::Call(message) => actor.handle(message, &ctx).await,
            Envelope::Deactivate(done) => waiting.push(done),
        }
    }

    actor.deactivate(&ctx).await;
    info!(kind = %ctx.kind, key = %ctx.key, generation, "Actor deactivated");
    for done in waiting {
        let _ = done.send(());
    }
}

/// Detach an idle activation from its host, unless it was already replaced.
async fn retire<A: Actor>(host: &Weak<HostInner<A>>, key: &str, generation: u64) {
    let Some(host) = host.upgrade() else {
        return;
    };
    let mut activations = host.activations.lock().await;
    if activations.get(key).map(|a| a.generation) == Some(generation) {
        activations.remove(key);
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn idle_deadline(timeout: Option<Duration>, since: Instant) {
    match timeout {
        Some(timeout) => tokio::time::sleep_until(since + timeout).await,
        None => std::future::pending().await,
    }
}
