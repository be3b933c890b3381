//! Forwarding a caller's cancellation into an actor call.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Link from a caller's cancellation token to the token carried by one
/// actor call.
///
/// The link is registered on creation and torn down when dropped, so a
/// caller token that outlives the call can never cancel anything afterwards.
/// Keep the link alive for exactly the duration of the call.
pub struct CancelLink {
    remote: CancellationToken,
    watcher: Option<JoinHandle<()>>,
}

impl CancelLink {
    /// Create the call's token and forward `caller` into it.
    ///
    /// Must be called from within a tokio runtime when `caller` is set.
    pub fn bridge(caller: Option<&CancellationToken>) -> Self {
        let remote = CancellationToken::new();
        let watcher = match caller {
            Some(caller) if caller.is_cancelled() => {
                remote.cancel();
                None
            }
            Some(caller) => {
                let caller = caller.clone();
                let forward = remote.clone();
                Some(tokio::spawn(async move {
                    caller.cancelled().await;
                    forward.cancel();
                }))
            }
            None => None,
        };
        Self { remote, watcher }
    }

    /// Token to hand to the actor call.
    pub fn token(&self) -> &CancellationToken {
        &self.remote
    }

    /// True while a caller token is still being watched.
    pub fn is_linked(&self) -> bool {
        self.watcher.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl Drop for CancelLink {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_caller_cancellation_is_forwarded() {
        let caller = CancellationToken::new();
        let link = CancelLink::bridge(Some(&caller));
        assert!(link.is_linked());
        assert!(!link.token().is_cancelled());

        caller.cancel();
        tokio::time::timeout(Duration::from_secs(1), link.token().cancelled())
            .await
            .expect("remote token should be cancelled");
    }

    #[tokio::test]
    async fn test_already_cancelled_caller_cancels_immediately() {
        let caller = CancellationToken::new();
        caller.cancel();
        let link = CancelLink::bridge(Some(&caller));
        assert!(link.token().is_cancelled());
        assert!(!link.is_linked());
    }

    #[tokio::test]
    async fn test_dropping_link_deregisters() {
        let caller = CancellationToken::new();
        let link = CancelLink::bridge(Some(&caller));
        let remote = link.token().clone();
        drop(link);

        tokio::task::yield_now().await;
        caller.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!remote.is_cancelled());
    }

    #[tokio::test]
    async fn test_no_caller_never_cancels() {
        let link = CancelLink::bridge(None);
        assert!(!link.is_linked());
        assert!(!link.token().is_cancelled());
    }
}
