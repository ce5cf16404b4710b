//! Deferred work of a return saga, as carried on the retry queues.

use chrono::NaiveDate;
use common::{BookCondition, BookId, LibraryId, ReservationId};
use serde::{Deserialize, Serialize};

use crate::retry::RetryQueue;
use crate::step::ReturnStep;

/// Rate delta for a return on time in good order.
pub const RETURN_REWARD: i32 = 1;

/// Rate delta for a late return or a damaged book.
pub const RETURN_PENALTY: i32 = -10;

/// What is left to do for one book return.
///
/// Fields that are not known yet when the event is built are omitted from
/// the payload. `book_uid` and `library_uid` are filled in once the
/// reservation has been read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEvent {
    pub username: String,
    #[serde(rename = "reservation_uid")]
    pub reservation_id: ReservationId,
    #[serde(rename = "book_uid", default, skip_serializing_if = "Option::is_none")]
    pub book_id: Option<BookId>,
    #[serde(rename = "library_uid", default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<LibraryId>,
    pub rate_delta: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<BookCondition>,
    #[serde(rename = "date", default, skip_serializing_if = "Option::is_none")]
    pub return_date: Option<NaiveDate>,
    pub resume_at: ReturnStep,
}

impl RetryEvent {
    /// Starts a return from the first step.
    pub fn new(
        username: impl Into<String>,
        reservation_id: ReservationId,
        return_date: NaiveDate,
        condition: BookCondition,
    ) -> Self {
        Self {
            username: username.into(),
            reservation_id,
            book_id: None,
            library_id: None,
            rate_delta: RETURN_REWARD,
            condition: Some(condition),
            return_date: Some(return_date),
            resume_at: ReturnStep::UpdateStatus,
        }
    }

    /// The queue this event belongs on.
    pub fn queue(&self) -> RetryQueue {
        self.resume_at.queue()
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_unknown_fields_are_omitted() {
        let event = RetryEvent::new(
            "alice",
            ReservationId::new(),
            date("2024-01-15"),
            BookCondition::Good,
        );
        let json = serde_json::to_value(&event).unwrap();

        assert!(json.get("book_uid").is_none());
        assert!(json.get("library_uid").is_none());
        assert_eq!(json["date"], "2024-01-15");
        assert_eq!(json["condition"], "GOOD");
        assert_eq!(json["rate_delta"], 1);
        assert_eq!(json["resume_at"], "update_status");
    }

    #[test]
    fn test_decodes_sparse_payload() {
        let reservation_id = ReservationId::new();
        let payload = serde_json::json!({
            "username": "alice",
            "reservation_uid": reservation_id.to_string(),
            "rate_delta": -10,
            "resume_at": "apply_rating"
        });
        let event = RetryEvent::from_bytes(payload.to_string().as_bytes()).unwrap();

        assert_eq!(event.reservation_id, reservation_id);
        assert_eq!(event.rate_delta, RETURN_PENALTY);
        assert_eq!(event.book_id, None);
        assert_eq!(event.queue(), RetryQueue::Rating);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(RetryEvent::from_bytes(b"{not json").is_err());
        assert!(RetryEvent::from_bytes(br#"{"username":"alice"}"#).is_err());
    }
}
