//! Saga error types.

use common::{BookId, LibraryId};
use thiserror::Error;

use crate::services::Dependency;

/// Broad classes of failure, deciding how each saga step reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input; fail fast with no side effects.
    Validation,
    /// A business rule refused the request; the user must change it.
    BusinessRule,
    /// The dependency could not be reached; worth retrying later.
    TransientUnavailable,
    /// The dependency answered with something unusable; retrying won't help.
    PermanentDownstream,
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request itself is invalid.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The user already holds as many books as their rating allows.
    #[error("You rented maximum amount of books: {active} active, {stars} stars")]
    QuotaExceeded { active: u32, stars: i32 },

    /// No copies of the book are left in the library.
    #[error("Book not available: {book_id} in library {library_id}")]
    BookUnavailable {
        book_id: BookId,
        library_id: LibraryId,
    },

    /// A downstream service could not be reached.
    #[error("{0} unavailable")]
    ServiceUnavailable(Dependency),

    /// A downstream resource does not exist.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// A downstream service answered with an unexpected status.
    #[error("{dependency} responded with status {status}: {message}")]
    Downstream {
        dependency: Dependency,
        status: u16,
        message: String,
    },

    /// A downstream service answered with a body that could not be decoded.
    #[error("Malformed response from {dependency}: {reason}")]
    MalformedResponse {
        dependency: Dependency,
        reason: String,
    },

    /// A partial mutation could not be rolled back.
    #[error("Compensation step '{step}' failed: {reason}")]
    CompensationFailed { step: &'static str, reason: String },

    /// The retry queue transport failed.
    #[error("Retry transport error: {0}")]
    Transport(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Validation(_) => ErrorKind::Validation,
            SagaError::QuotaExceeded { .. } | SagaError::BookUnavailable { .. } => {
                ErrorKind::BusinessRule
            }
            SagaError::ServiceUnavailable(_) => ErrorKind::TransientUnavailable,
            SagaError::NotFound { .. }
            | SagaError::Downstream { .. }
            | SagaError::MalformedResponse { .. }
            | SagaError::CompensationFailed { .. }
            | SagaError::Transport(_)
            | SagaError::Serialization(_) => ErrorKind::PermanentDownstream,
        }
    }

    /// Returns true if the failure is transient and the step may be replayed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientUnavailable
    }

    pub fn not_found(what: &'static str, id: impl ToString) -> Self {
        SagaError::NotFound {
            what,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailability_is_retryable() {
        assert!(SagaError::ServiceUnavailable(Dependency::Catalog).is_retryable());
        assert!(!SagaError::Validation("bad date".into()).is_retryable());
        assert!(!SagaError::QuotaExceeded { active: 2, stars: 2 }.is_retryable());
        assert!(
            !SagaError::Downstream {
                dependency: Dependency::Rating,
                status: 500,
                message: String::new(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            SagaError::BookUnavailable {
                book_id: BookId::new(),
                library_id: LibraryId::new(),
            }
            .kind(),
            ErrorKind::BusinessRule
        );
        assert_eq!(
            SagaError::not_found("reservation", "abc").kind(),
            ErrorKind::PermanentDownstream
        );
    }

    #[test]
    fn test_unavailable_message_names_service() {
        let err = SagaError::ServiceUnavailable(Dependency::Rating);
        assert_eq!(err.to_string(), "Bonus Service unavailable");
        assert_eq!(err.kind(), ErrorKind::TransientUnavailable);
    }
}
