//! Guarded call error types.

use thiserror::Error;

/// Why a guarded call did not produce a live result.
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The dependency failed its liveness probe; the action was not attempted.
    #[error("service unavailable")]
    Unavailable,

    /// The breaker is open and the caller required a live result.
    #[error("circuit breaker open")]
    Rejected,

    /// The action ran and failed.
    #[error("{0}")]
    Call(E),
}

impl<E> GuardError<E> {
    /// Returns true when the dependency could not be reached at all, as opposed
    /// to the action running and returning an error.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, GuardError::Unavailable | GuardError::Rejected)
    }
}
