//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::error::BackplaneError;

/// Backoff for re-subscribing after a stream ended a subscription.
///
/// - Min delay: 10ms
/// - Max delay: 1s
/// - Max attempts: 5
/// - Jitter enabled
pub fn resubscribe_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(5)
        .with_jitter()
}

/// Determines if a backplane error is transient.
///
/// Retryable:
/// - `ActorUnavailable`: the activation retired mid-call
/// - `Storage`: snapshot backend hiccup
///
/// Non-retryable:
/// - `ReplayRangeExceeded`: the gap never closes; fall back to live-only
/// - `Cancelled`: the caller gave up
/// - `Stopped`: the host is shutting down
pub fn is_retryable(error: &BackplaneError) -> bool {
    matches!(
        error,
        BackplaneError::ActorUnavailable { .. } | BackplaneError::Storage(_)
    )
}
