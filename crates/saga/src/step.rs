//! Steps of the return saga.

use serde::{Deserialize, Serialize};

use crate::retry::RetryQueue;
use crate::services::Dependency;

/// One resumable step of a book return, in execution order.
///
/// ```text
/// UpdateStatus ──► ConfirmStatus ──► RestockBook ──► UpdateCondition ──► ApplyRating
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStep {
    /// Mark the reservation Returned or Expired.
    UpdateStatus,
    /// Re-read the reservation to learn the final status and the book.
    ConfirmStatus,
    /// Put the copy back into the library's available count.
    RestockBook,
    /// Record the condition the book came back in.
    UpdateCondition,
    /// Reward or penalize the user.
    ApplyRating,
}

impl ReturnStep {
    pub const ALL: [ReturnStep; 5] = [
        ReturnStep::UpdateStatus,
        ReturnStep::ConfirmStatus,
        ReturnStep::RestockBook,
        ReturnStep::UpdateCondition,
        ReturnStep::ApplyRating,
    ];

    /// The service this step calls.
    pub fn dependency(&self) -> Dependency {
        match self {
            ReturnStep::UpdateStatus | ReturnStep::ConfirmStatus => Dependency::Reservation,
            ReturnStep::RestockBook | ReturnStep::UpdateCondition => Dependency::Catalog,
            ReturnStep::ApplyRating => Dependency::Rating,
        }
    }

    /// The queue that holds this step when it has to be deferred.
    pub fn queue(&self) -> RetryQueue {
        RetryQueue::for_dependency(self.dependency())
    }

    /// Steps from this one (inclusive) to the end of the saga.
    pub fn remaining(self) -> impl Iterator<Item = ReturnStep> {
        Self::ALL.into_iter().filter(move |step| *step >= self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStep::UpdateStatus => "update_status",
            ReturnStep::ConfirmStatus => "confirm_status",
            ReturnStep::RestockBook => "restock_book",
            ReturnStep::UpdateCondition => "update_condition",
            ReturnStep::ApplyRating => "apply_rating",
        }
    }
}

impl std::fmt::Display for ReturnStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_map_to_owning_queue() {
        assert_eq!(ReturnStep::UpdateStatus.queue(), RetryQueue::Reservation);
        assert_eq!(ReturnStep::ConfirmStatus.queue(), RetryQueue::Reservation);
        assert_eq!(ReturnStep::RestockBook.queue(), RetryQueue::Catalog);
        assert_eq!(ReturnStep::UpdateCondition.queue(), RetryQueue::Catalog);
        assert_eq!(ReturnStep::ApplyRating.queue(), RetryQueue::Rating);
    }

    #[test]
    fn test_remaining_starts_at_step() {
        let rest: Vec<_> = ReturnStep::UpdateCondition.remaining().collect();
        assert_eq!(
            rest,
            vec![ReturnStep::UpdateCondition, ReturnStep::ApplyRating]
        );
        assert_eq!(ReturnStep::UpdateStatus.remaining().count(), 5);
    }

    #[test]
    fn test_serialized_name() {
        let json = serde_json::to_string(&ReturnStep::RestockBook).unwrap();
        assert_eq!(json, "\"restock_book\"");
        assert_eq!(ReturnStep::RestockBook.to_string(), "restock_book");
    }
}
