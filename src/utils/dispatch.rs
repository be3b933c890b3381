//! Dispatch-and-log tasks.
//!
//! Delivery to subscribers and members runs outside the caller's turn. A
//! failing or panicking delivery is logged here and never propagated, so a
//! misbehaving connection cannot take down the actor that fed it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::error::Result;

/// Outcome of a guarded delivery.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Failed(String),
    Panicked(String),
}

/// Await `fut`, converting errors and panics into an [`Outcome`].
pub async fn guarded<F, T>(fut: F) -> Outcome<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Outcome::Completed(value),
        Ok(Err(e)) => Outcome::Failed(e.to_string()),
        Err(panic) => Outcome::Panicked(panic_message(panic.as_ref())),
    }
}

/// Await `fut` and log any failure under `target`.
///
/// Returns true when the delivery completed.
pub async fn logged<F>(what: &'static str, target: &str, fut: F) -> bool
where
    F: Future<Output = Result<()>>,
{
    match guarded(fut).await {
        Outcome::Completed(()) => true,
        Outcome::Failed(message) => {
            warn!(%target, error = %message, "{} failed", what);
            false
        }
        Outcome::Panicked(message) => {
            error!(%target, panic = %message, "{} panicked", what);
            false
        }
    }
}

/// Spawn `fut` as an independent task whose failure is only logged.
pub fn spawn_logged<F>(what: &'static str, target: String, fut: F) -> JoinHandle<bool>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move { logged(what, &target, fut).await })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackplaneError;

    #[tokio::test]
    async fn test_guarded_completed() {
        let outcome = guarded(async { Ok(5) }).await;
        assert!(matches!(outcome, Outcome::Completed(5)));
    }

    #[tokio::test]
    async fn test_guarded_error() {
        let outcome: Outcome<()> =
            guarded(async { Err(BackplaneError::Observer("boom".to_string())) }).await;
        match outcome {
            Outcome::Failed(message) => assert!(message.contains("boom")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_guarded_panic() {
        let outcome: Outcome<()> = guarded(async { panic!("delivery exploded") }).await;
        match outcome {
            Outcome::Panicked(message) => assert_eq!(message, "delivery exploded"),
            other => panic!("Expected Panicked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_logged_swallows_failure() {
        let handle = spawn_logged("test delivery", "conn-1".to_string(), async {
            Err(BackplaneError::Observer("closed".to_string()))
        });
        assert!(!handle.await.unwrap());

        let handle = spawn_logged("test delivery", "conn-1".to_string(), async { Ok(()) });
        assert!(handle.await.unwrap());
    }
}
