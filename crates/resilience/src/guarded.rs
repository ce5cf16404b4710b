//! Breaker-aware wrapper around one outbound operation.

use std::future::Future;
use std::sync::Arc;

use crate::breaker::Breaker;
use crate::error::GuardError;

/// Result of a guarded call. Every variant carries a value: either the
/// action's result or the fallback.
#[derive(Debug)]
pub enum GuardedOutcome<T, E> {
    /// The action ran and succeeded.
    Completed(T),
    /// The breaker refused the call; the fallback stands in.
    Rejected(T),
    /// The liveness probe failed; the action was never attempted.
    Unavailable(T),
    /// The action ran and failed.
    Failed(T, E),
}

impl<T, E> GuardedOutcome<T, E> {
    /// Returns true if the value is a fallback rather than a live result.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, GuardedOutcome::Completed(_))
    }

    /// Lenient conversion: an open breaker degrades silently to the fallback.
    pub fn into_result(self) -> Result<T, GuardError<E>> {
        match self {
            GuardedOutcome::Completed(v) | GuardedOutcome::Rejected(v) => Ok(v),
            GuardedOutcome::Unavailable(_) => Err(GuardError::Unavailable),
            GuardedOutcome::Failed(_, e) => Err(GuardError::Call(e)),
        }
    }

    /// Strict conversion: an open breaker is an error like any other
    /// unavailability. Used where a fallback value would hide a missed
    /// side effect.
    pub fn into_required(self) -> Result<T, GuardError<E>> {
        match self {
            GuardedOutcome::Completed(v) => Ok(v),
            GuardedOutcome::Rejected(_) => Err(GuardError::Rejected),
            GuardedOutcome::Unavailable(_) => Err(GuardError::Unavailable),
            GuardedOutcome::Failed(_, e) => Err(GuardError::Call(e)),
        }
    }
}

/// Runs actions behind a shared [`Breaker`].
#[derive(Debug, Clone)]
pub struct GuardedCaller {
    breaker: Arc<Breaker>,
}

impl GuardedCaller {
    pub fn new(breaker: Arc<Breaker>) -> Self {
        Self { breaker }
    }

    pub fn breaker(&self) -> &Breaker {
        &self.breaker
    }

    /// Probes the dependency, asks the breaker, then runs `action`.
    ///
    /// A failed probe counts as a breaker failure without running the action.
    pub async fn call<T, E, P, PF, A, AF, F>(
        &self,
        probe: P,
        action: A,
        fallback: F,
    ) -> GuardedOutcome<T, E>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = bool>,
        A: FnOnce() -> AF,
        AF: Future<Output = Result<T, E>>,
        F: FnOnce() -> T,
    {
        if !probe().await {
            self.breaker.record_failure();
            tracing::debug!(breaker = %self.breaker.name(), "health probe failed");
            return GuardedOutcome::Unavailable(fallback());
        }

        if !self.breaker.admit() {
            tracing::debug!(breaker = %self.breaker.name(), "call rejected by open breaker");
            return GuardedOutcome::Rejected(fallback());
        }

        match action().await {
            Ok(value) => {
                self.breaker.record_success();
                GuardedOutcome::Completed(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                GuardedOutcome::Failed(fallback(), e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, BreakerState};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn caller(threshold: usize) -> GuardedCaller {
        let config = BreakerConfig {
            failure_threshold: threshold,
            failure_window: Duration::from_secs(60),
            cool_down: Duration::from_secs(60),
            half_open_successes: 1,
        };
        GuardedCaller::new(Arc::new(Breaker::new("test", config)))
    }

    #[tokio::test]
    async fn test_failed_probe_skips_action() {
        let caller = caller(3);
        let invoked = AtomicUsize::new(0);

        let outcome = caller
            .call(
                || async { false },
                || async {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(vec![1, 2, 3])
                },
                Vec::new,
            )
            .await;

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert!(matches!(outcome, GuardedOutcome::Unavailable(ref v) if v.is_empty()));
        assert!(matches!(outcome.into_result(), Err(GuardError::Unavailable)));
        assert_eq!(caller.breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_success_returns_result() {
        let caller = caller(3);
        let outcome = caller
            .call(|| async { true }, || async { Ok::<_, String>(7) }, || 0)
            .await;

        assert!(!outcome.is_degraded());
        assert_eq!(outcome.into_required().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_action_error_returns_fallback_and_error() {
        let caller = caller(3);
        let outcome = caller
            .call(
                || async { true },
                || async { Err::<i32, _>("boom".to_string()) },
                || -1,
            )
            .await;

        assert!(matches!(outcome, GuardedOutcome::Failed(-1, _)));
        match outcome.into_result() {
            Err(GuardError::Call(e)) => assert_eq!(e, "boom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(caller.breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_degrades_without_error() {
        let caller = caller(1);
        let _ = caller
            .call(
                || async { true },
                || async { Err::<i32, _>("boom".to_string()) },
                || 0,
            )
            .await;
        assert_eq!(caller.breaker().state(), BreakerState::Open);

        let invoked = AtomicUsize::new(0);
        let outcome = caller
            .call(
                || async { true },
                || async {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(5)
                },
                || 0,
            )
            .await;

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert!(matches!(outcome, GuardedOutcome::Rejected(0)));
        assert_eq!(outcome.into_result().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_breaker_is_an_error_when_required() {
        let caller = caller(1);
        caller.breaker().record_failure();

        let result = caller
            .call(|| async { true }, || async { Ok::<_, String>(()) }, || ())
            .await
            .into_required();

        let err = result.unwrap_err();
        assert!(matches!(err, GuardError::Rejected));
        assert!(err.is_unavailable());
    }
}
