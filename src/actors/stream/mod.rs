//! Replayable stream actor.
//!
//! A stream actor owns one [`RewindableBuffer`] and the set of observers
//! attached to it. Pushes are appended to the buffer and queued to every
//! observer; the actor never waits on observer I/O. Each subscription has its
//! own delivery pump task, so one slow or failing observer only delays itself.
//!
//! Subscribing with a handle reads the backlog and attaches the observer in
//! the same actor turn. No push can slip between the two, so the observer
//! sees every message after the handle exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{BufferSnapshot, RewindableBuffer};
use crate::error::Result;
use crate::interfaces::MessageObserver;
use crate::message::{Handle, SubscriptionHandle};
use crate::runtime::{Actor, ActorContext};
use crate::utils::dispatch;

/// Element types a stream can carry and persist.
pub trait StreamItem: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> StreamItem for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Per-kind stream settings shared by every activation.
#[derive(Clone, Copy, Debug)]
pub struct StreamSettings {
    /// Replay window; zero disables replay.
    pub capacity: usize,
    /// Snapshot the buffer on flush and restore it on activation.
    pub persistence_enabled: bool,
}

/// Requests understood by a [`StreamActor`].
pub enum StreamMessage<T> {
    /// Append to the buffer and publish to subscribers.
    Push {
        message: T,
        cancel: CancellationToken,
        reply: oneshot::Sender<Handle>,
    },
    Subscribe {
        observer: Arc<dyn MessageObserver<T>>,
        from: Option<Handle>,
        reply: oneshot::Sender<Result<SubscriptionHandle>>,
    },
    Unsubscribe {
        subscription: SubscriptionHandle,
        reply: oneshot::Sender<bool>,
    },
    MessagesSince {
        handle: Handle,
        reply: oneshot::Sender<Result<Vec<(T, Handle)>>>,
    },
    /// Handle of the newest message.
    Head { reply: oneshot::Sender<Handle> },
    SubscriberCount { reply: oneshot::Sender<usize> },
}

enum Delivery<T> {
    Message(T, Handle),
    Ended,
}

pub struct StreamActor<T> {
    buffer: RewindableBuffer<T>,
    subscribers: HashMap<SubscriptionHandle, mpsc::UnboundedSender<Delivery<T>>>,
}

impl<T: StreamItem> StreamActor<T> {
    fn publish(&mut self, message: &T, handle: Handle) {
        self.subscribers.retain(|subscription, queue| {
            let open = queue
                .send(Delivery::Message(message.clone(), handle))
                .is_ok();
            if !open {
                debug!(%subscription, "Dropping subscriber with closed delivery queue");
            }
            open
        });
    }

    fn subscribe(
        &mut self,
        observer: Arc<dyn MessageObserver<T>>,
        from: Option<Handle>,
        ctx: &ActorContext<Self>,
    ) -> Result<SubscriptionHandle> {
        let backlog = match from {
            Some(handle) => self.buffer.messages_since(&handle)?,
            None => Vec::new(),
        };

        let subscription = SubscriptionHandle::generate();
        let queue = spawn_pump(subscription, observer, ctx.key.clone());
        let replayed = backlog.len();
        for (message, handle) in backlog {
            let _ = queue.send(Delivery::Message(message, handle));
        }
        self.subscribers.insert(subscription, queue);

        info!(
            kind = %ctx.kind,
            key = %ctx.key,
            %subscription,
            replayed,
            "Observer subscribed"
        );
        Ok(subscription)
    }
}

#[async_trait]
impl<T: StreamItem> Actor for StreamActor<T> {
    type Message = StreamMessage<T>;
    type Deps = StreamSettings;

    async fn activate(ctx: &ActorContext<Self>) -> Self {
        let settings = ctx.deps;
        let restored = if settings.persistence_enabled {
            ctx.load_snapshot::<BufferSnapshot<T>>().await
        } else {
            None
        };
        let buffer = match restored {
            Some(snapshot) => RewindableBuffer::restore(settings.capacity, snapshot),
            None => RewindableBuffer::new(settings.capacity),
        };
        info!(
            kind = %ctx.kind,
            key = %ctx.key,
            epoch = %buffer.epoch(),
            latest_sequence = buffer.latest_sequence(),
            "Stream activated"
        );
        Self {
            buffer,
            subscribers: HashMap::new(),
        }
    }

    async fn handle(&mut self, message: StreamMessage<T>, ctx: &ActorContext<Self>) {
        match message {
            StreamMessage::Push {
                message,
                cancel,
                reply,
            } => {
                if cancel.is_cancelled() {
                    debug!(key = %ctx.key, "Push cancelled before it was handled");
                    return;
                }
                let handle = self.buffer.push_back(message.clone());
                self.publish(&message, handle);
                debug!(key = %ctx.key, %handle, subscribers = self.subscribers.len(), "Message pushed");
                let _ = reply.send(handle);
            }
            StreamMessage::Subscribe {
                observer,
                from,
                reply,
            } => {
                let _ = reply.send(self.subscribe(observer, from, ctx));
            }
            StreamMessage::Unsubscribe {
                subscription,
                reply,
            } => {
                // Dropping the queue lets the pump drain what it already has.
                let removed = self.subscribers.remove(&subscription).is_some();
                if removed {
                    debug!(key = %ctx.key, %subscription, "Observer unsubscribed");
                }
                let _ = reply.send(removed);
            }
            StreamMessage::MessagesSince { handle, reply } => {
                let _ = reply.send(self.buffer.messages_since(&handle));
            }
            StreamMessage::Head { reply } => {
                let _ = reply.send(self.buffer.head());
            }
            StreamMessage::SubscriberCount { reply } => {
                let _ = reply.send(self.subscribers.len());
            }
        }
    }

    async fn flush(&mut self, ctx: &ActorContext<Self>) {
        if !ctx.deps.persistence_enabled || !self.buffer.is_dirty() {
            return;
        }
        match ctx.save_snapshot(&self.buffer.snapshot()).await {
            Ok(()) => self.buffer.mark_clean(),
            Err(e) => warn!(key = %ctx.key, error = %e, "Stream snapshot failed, will retry"),
        }
    }

    async fn deactivate(&mut self, ctx: &ActorContext<Self>) {
        self.flush(ctx).await;
        let ended = self.subscribers.len();
        for (_, queue) in self.subscribers.drain() {
            let _ = queue.send(Delivery::Ended);
        }
        debug!(key = %ctx.key, ended, "Subscriptions ended");
    }
}

/// Start the ordered delivery task of one subscription.
fn spawn_pump<T: StreamItem>(
    subscription: SubscriptionHandle,
    observer: Arc<dyn MessageObserver<T>>,
    stream: String,
) -> mpsc::UnboundedSender<Delivery<T>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            match delivery {
                Delivery::Message(message, handle) => {
                    dispatch::logged(
                        "Observer delivery",
                        &stream,
                        observer.on_message(message, handle),
                    )
                    .await;
                }
                Delivery::Ended => {
                    dispatch::logged("Subscription end notification", &stream, async {
                        observer.on_subscription_ended(subscription).await;
                        Ok(())
                    })
                    .await;
                    break;
                }
            }
        }
    });
    tx
}
