//! Stream observer interface.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Handle, SubscriptionHandle};

/// Receives messages pushed into a stream actor.
///
/// Calls for one subscription arrive in sequence order and never overlap.
/// Errors are logged by the delivering task and do not affect the stream or
/// other observers.
#[async_trait]
pub trait MessageObserver<T>: Send + Sync {
    async fn on_message(&self, message: T, handle: Handle) -> Result<()>;

    /// The stream stopped delivering to this subscription (for example the
    /// actor was deactivated). No further messages follow.
    async fn on_subscription_ended(&self, subscription: SubscriptionHandle);
}
