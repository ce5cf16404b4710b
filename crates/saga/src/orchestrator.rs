//! Create and return sagas across the catalog, reservation and rating services.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use common::{
    Book, BookCondition, BookId, BookInfo, Library, LibraryId, Reservation, ReservationDetails,
    ReservationId, ReservationStatus,
};

use crate::error::SagaError;
use crate::events::{RETURN_PENALTY, RetryEvent};
use crate::retry::{RetryDispatcher, RetryQueue, StepReplayer};
use crate::services::{
    CatalogService, NewReservation, OperationKey, RatingService, ReservationStore,
};
use crate::step::ReturnStep;

const CHECKOUT: &str = "checkout";
const RESTOCK: &str = "restock";
const RATING: &str = "rating";

/// Input of the create saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReservation {
    pub username: String,
    pub book_id: BookId,
    pub library_id: LibraryId,
    pub till_date: NaiveDate,
}

/// Input of the return saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnBook {
    pub username: String,
    pub reservation_id: ReservationId,
    pub return_date: NaiveDate,
    pub condition: BookCondition,
}

/// Result of a return that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnOutcome {
    /// Every step ran.
    Completed,
    /// A dependency was down; the rest was queued and will be replayed.
    Deferred { step: ReturnStep, queue: RetryQueue },
}

/// Drives reservation sagas.
///
/// The create saga is all-or-nothing: it fails fast on validation and
/// business rules, and undoes the reservation if the stock update fails.
/// The return saga never fails because a dependency is down; what is left
/// is queued through the [`RetryDispatcher`] and replayed later through the
/// [`StepReplayer`] impl.
pub struct ReservationOrchestrator {
    catalog: Arc<dyn CatalogService>,
    reservations: Arc<dyn ReservationStore>,
    rating: Arc<dyn RatingService>,
    dispatcher: RetryDispatcher,
    today: fn() -> NaiveDate,
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

impl ReservationOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogService>,
        reservations: Arc<dyn ReservationStore>,
        rating: Arc<dyn RatingService>,
        dispatcher: RetryDispatcher,
    ) -> Self {
        Self {
            catalog,
            reservations,
            rating,
            dispatcher,
            today: utc_today,
        }
    }

    /// Overrides the calendar used for the start date of new reservations.
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Rents a book.
    #[tracing::instrument(
        skip(self, request),
        fields(username = %request.username, book_id = %request.book_id, library_id = %request.library_id)
    )]
    pub async fn create_reservation(
        &self,
        request: CreateReservation,
    ) -> Result<ReservationDetails, SagaError> {
        metrics::counter!("saga_create_total").increment(1);
        let started = Instant::now();

        let result = self.run_create(request).await;

        metrics::histogram!("saga_duration_seconds", "saga" => "create")
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(details) => {
                tracing::info!(reservation_id = %details.reservation_id, "Reservation created");
            }
            Err(e) => {
                metrics::counter!("saga_create_failed", "kind" => kind_label(e)).increment(1);
                tracing::warn!(error = %e, "Reservation not created");
            }
        }
        result
    }

    async fn run_create(&self, request: CreateReservation) -> Result<ReservationDetails, SagaError> {
        let start_date = (self.today)();
        if request.till_date <= start_date {
            return Err(SagaError::Validation(format!(
                "tillDate {} must be after {start_date}",
                request.till_date
            )));
        }

        let active = self.reservations.count_active(&request.username).await?;
        let rating = self.rating.get(&request.username).await?;
        if i64::from(active) >= i64::from(rating.stars) {
            return Err(SagaError::QuotaExceeded {
                active,
                stars: rating.stars,
            });
        }

        let book = self.catalog.get_book(request.book_id).await?;
        if book.available_count <= 0 {
            return Err(SagaError::BookUnavailable {
                book_id: request.book_id,
                library_id: request.library_id,
            });
        }

        let reservation = self
            .reservations
            .create(NewReservation {
                username: request.username,
                book_id: request.book_id,
                library_id: request.library_id,
                start_date,
                till_date: request.till_date,
            })
            .await?;

        let key = OperationKey::new(reservation.reservation_id, CHECKOUT);
        if let Err(cause) = self
            .catalog
            .adjust_book_count(reservation.library_id, reservation.book_id, -1, &key)
            .await
        {
            return Err(self.undo_create(&reservation, cause).await);
        }

        Ok(self.describe(reservation, Some(book.info())).await)
    }

    /// Deletes a reservation whose checkout failed, returning the error to report.
    async fn undo_create(&self, reservation: &Reservation, cause: SagaError) -> SagaError {
        metrics::counter!("saga_compensations_total").increment(1);
        tracing::warn!(
            reservation_id = %reservation.reservation_id,
            error = %cause,
            "Checkout failed, deleting reservation"
        );

        match self.reservations.delete(reservation.reservation_id).await {
            Ok(()) => cause,
            Err(e) => {
                tracing::error!(
                    reservation_id = %reservation.reservation_id,
                    error = %e,
                    "Could not delete reservation after failed checkout"
                );
                SagaError::CompensationFailed {
                    step: "delete_reservation",
                    reason: format!("{cause}; delete failed: {e}"),
                }
            }
        }
    }

    /// Enriches a reservation with catalog data, degrading to placeholders
    /// when the catalog cannot answer.
    async fn describe(
        &self,
        reservation: Reservation,
        known_book: Option<BookInfo>,
    ) -> ReservationDetails {
        let book = match self.catalog.get_book(reservation.book_id).await {
            Ok(book) => book.info(),
            Err(e) => {
                tracing::warn!(book_id = %reservation.book_id, error = %e, "Book details unavailable");
                known_book.unwrap_or_else(|| BookInfo::unknown(reservation.book_id))
            }
        };
        let library = match self.catalog.get_library(reservation.library_id).await {
            Ok(library) => library,
            Err(e) => {
                tracing::warn!(library_id = %reservation.library_id, error = %e, "Library details unavailable");
                Library::unknown(reservation.library_id)
            }
        };
        ReservationDetails::new(reservation, book, library)
    }

    /// All reservations of a user with book and library details.
    #[tracing::instrument(skip(self))]
    pub async fn list_reservations(
        &self,
        username: &str,
    ) -> Result<Vec<ReservationDetails>, SagaError> {
        let reservations = self.reservations.list(username).await?;
        let mut details = Vec::with_capacity(reservations.len());
        for reservation in reservations {
            details.push(self.describe(reservation, None).await);
        }
        Ok(details)
    }

    /// Returns a rented book.
    #[tracing::instrument(
        skip(self, request),
        fields(username = %request.username, reservation_id = %request.reservation_id)
    )]
    pub async fn return_book(&self, request: ReturnBook) -> Result<ReturnOutcome, SagaError> {
        metrics::counter!("saga_return_total").increment(1);
        let started = Instant::now();

        // Ownership is checked again by ConfirmStatus when the reservation
        // service cannot be read here.
        match self.reservations.get(request.reservation_id).await {
            Ok(reservation) => check_owner(&reservation, &request.username)?,
            Err(e) if e.is_retryable() => {
                tracing::debug!(error = %e, "Ownership check deferred");
            }
            Err(e) => return Err(e),
        }

        let mut event = RetryEvent::new(
            request.username,
            request.reservation_id,
            request.return_date,
            request.condition,
        );
        let result = self.run_steps(&mut event).await;

        metrics::histogram!("saga_duration_seconds", "saga" => "return")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                tracing::info!(rate_delta = event.rate_delta, "Book returned");
                Ok(ReturnOutcome::Completed)
            }
            Err(e) if e.is_retryable() => {
                let step = event.resume_at;
                let queue = step.queue();
                metrics::counter!("saga_return_deferred_total", "step" => step.as_str())
                    .increment(1);
                tracing::warn!(error = %e, step = %step, queue = %queue, "Return deferred");
                self.dispatcher.enqueue(&event, queue).await;
                Ok(ReturnOutcome::Deferred { step, queue })
            }
            Err(e) => {
                tracing::warn!(error = %e, step = %event.resume_at, "Return failed");
                Err(e)
            }
        }
    }

    /// Runs the return steps from `event.resume_at` to the end.
    ///
    /// On failure `event` describes exactly the work still to do, with
    /// `resume_at` set to the failed step.
    async fn run_steps(&self, event: &mut RetryEvent) -> Result<(), SagaError> {
        for step in event.resume_at.remaining() {
            event.resume_at = step;
            self.run_step(step, event).await?;
            tracing::debug!(step = %step, "Return step done");
        }
        Ok(())
    }

    async fn run_step(&self, step: ReturnStep, event: &mut RetryEvent) -> Result<(), SagaError> {
        let reservation_id = event.reservation_id;
        match step {
            ReturnStep::UpdateStatus => {
                let return_date = event.return_date.ok_or_else(|| {
                    SagaError::Validation(format!("return of {reservation_id} has no date"))
                })?;
                self.reservations
                    .update_status(reservation_id, return_date)
                    .await
            }
            ReturnStep::ConfirmStatus => {
                let reservation = self.reservations.get(reservation_id).await?;
                check_owner(&reservation, &event.username)?;
                if reservation.status == ReservationStatus::Expired {
                    event.rate_delta = RETURN_PENALTY;
                }
                event.book_id = Some(reservation.book_id);
                event.library_id = Some(reservation.library_id);
                Ok(())
            }
            ReturnStep::RestockBook => {
                let (library_id, book_id) = copy_location(event)?;
                let key = OperationKey::new(reservation_id, RESTOCK);
                self.catalog
                    .adjust_book_count(library_id, book_id, 1, &key)
                    .await
            }
            ReturnStep::UpdateCondition => {
                let (_, book_id) = copy_location(event)?;
                if let Some(condition) = event.condition {
                    let book: Book = self.catalog.get_book(book_id).await?;
                    if book.condition != condition {
                        self.catalog.set_book_condition(book_id, condition).await?;
                        event.rate_delta = RETURN_PENALTY;
                    }
                }
                event.condition = None;
                Ok(())
            }
            ReturnStep::ApplyRating => {
                let key = OperationKey::new(reservation_id, RATING);
                self.rating
                    .apply_delta(&event.username, event.rate_delta, &key)
                    .await
            }
        }
    }
}

fn check_owner(reservation: &Reservation, username: &str) -> Result<(), SagaError> {
    if reservation.username == username {
        Ok(())
    } else {
        Err(SagaError::Validation(format!(
            "reservation {} does not belong to {username}",
            reservation.reservation_id
        )))
    }
}

fn copy_location(event: &RetryEvent) -> Result<(LibraryId, BookId), SagaError> {
    match (event.library_id, event.book_id) {
        (Some(library_id), Some(book_id)) => Ok((library_id, book_id)),
        _ => Err(SagaError::Validation(format!(
            "return of {} is missing the book or library",
            event.reservation_id
        ))),
    }
}

fn kind_label(error: &SagaError) -> &'static str {
    match error.kind() {
        crate::error::ErrorKind::Validation => "validation",
        crate::error::ErrorKind::BusinessRule => "business_rule",
        crate::error::ErrorKind::TransientUnavailable => "unavailable",
        crate::error::ErrorKind::PermanentDownstream => "downstream",
    }
}

#[async_trait]
impl StepReplayer for ReservationOrchestrator {
    #[tracing::instrument(
        skip(self, event),
        fields(reservation_id = %event.reservation_id, step = %event.resume_at, queue = %queue)
    )]
    async fn replay(&self, event: &mut RetryEvent, queue: RetryQueue) -> Result<(), SagaError> {
        match self.run_steps(event).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() && event.queue() != queue => {
                let next = event.queue();
                tracing::info!(error = %e, next_queue = %next, "Handing return to another queue");
                metrics::counter!("saga_return_deferred_total", "step" => event.resume_at.as_str())
                    .increment(1);
                self.dispatcher.try_enqueue(event, next).await
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::InMemoryTransport;
    use crate::services::{InMemoryCatalogService, InMemoryRatingService, InMemoryReservationStore};
    use crate::services::Dependency;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn new_year() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    struct Fixture {
        catalog: InMemoryCatalogService,
        reservations: InMemoryReservationStore,
        rating: InMemoryRatingService,
        transport: InMemoryTransport,
        orchestrator: ReservationOrchestrator,
        library_id: LibraryId,
        book_id: BookId,
    }

    fn fixture(stars: i32, copies: i32) -> Fixture {
        let catalog = InMemoryCatalogService::new();
        let reservations = InMemoryReservationStore::new();
        let rating = InMemoryRatingService::new().with_user("alice", stars);
        let transport = InMemoryTransport::recording();

        let library_id = LibraryId::new();
        let book = Book {
            book_id: BookId::new(),
            name: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            genre: "Science Fiction".to_string(),
            condition: BookCondition::Good,
            available_count: copies,
        };
        let book_id = book.book_id;
        catalog.add_book(library_id, book);

        let orchestrator = ReservationOrchestrator::new(
            Arc::new(catalog.clone()),
            Arc::new(reservations.clone()),
            Arc::new(rating.clone()),
            RetryDispatcher::new(Arc::new(transport.clone())),
        )
        .with_clock(new_year);

        Fixture {
            catalog,
            reservations,
            rating,
            transport,
            orchestrator,
            library_id,
            book_id,
        }
    }

    fn create_request(f: &Fixture, till: &str) -> CreateReservation {
        CreateReservation {
            username: "alice".to_string(),
            book_id: f.book_id,
            library_id: f.library_id,
            till_date: date(till),
        }
    }

    #[tokio::test]
    async fn test_due_date_must_follow_start_date() {
        let f = fixture(5, 1);
        f.catalog.set_unavailable(true);

        let result = f
            .orchestrator
            .create_reservation(create_request(&f, "2024-01-01"))
            .await;

        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(f.reservations.reservation_count(), 0);
    }

    #[tokio::test]
    async fn test_library_details_degrade_to_placeholder() {
        let f = fixture(5, 1);

        let details = f
            .orchestrator
            .create_reservation(create_request(&f, "2024-01-10"))
            .await
            .unwrap();

        assert_eq!(details.library, Library::unknown(f.library_id));
        assert_eq!(details.book.name, "Dune");
        assert_eq!(details.start_date, new_year());
        assert_eq!(f.catalog.available_count(f.book_id), Some(0));
    }

    #[tokio::test]
    async fn test_unavailable_rating_fails_create() {
        let f = fixture(5, 1);
        f.rating.set_unavailable(true);

        let result = f
            .orchestrator
            .create_reservation(create_request(&f, "2024-01-10"))
            .await;

        assert!(matches!(
            result,
            Err(SagaError::ServiceUnavailable(Dependency::Rating))
        ));
        assert_eq!(f.transport.total_published(), 0);
    }

    #[tokio::test]
    async fn test_failed_delete_reports_compensation_failure() {
        let f = fixture(5, 1);
        f.catalog.fail_next_count_updates(1);
        f.reservations.set_fail_on_delete(true);

        let result = f
            .orchestrator
            .create_reservation(create_request(&f, "2024-01-10"))
            .await;

        assert!(matches!(
            result,
            Err(SagaError::CompensationFailed {
                step: "delete_reservation",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_damaged_return_updates_condition_and_penalizes() {
        let f = fixture(5, 1);
        let created = f
            .orchestrator
            .create_reservation(create_request(&f, "2024-01-10"))
            .await
            .unwrap();

        let outcome = f
            .orchestrator
            .return_book(ReturnBook {
                username: "alice".to_string(),
                reservation_id: created.reservation_id,
                return_date: date("2024-01-05"),
                condition: BookCondition::Bad,
            })
            .await
            .unwrap();

        assert_eq!(outcome, ReturnOutcome::Completed);
        assert_eq!(f.catalog.condition(f.book_id), Some(BookCondition::Bad));
        assert_eq!(f.catalog.available_count(f.book_id), Some(1));
        assert_eq!(f.rating.stars("alice"), 0);
    }

    #[tokio::test]
    async fn test_unknown_reservation_fails_return() {
        let f = fixture(5, 1);

        let result = f
            .orchestrator
            .return_book(ReturnBook {
                username: "alice".to_string(),
                reservation_id: ReservationId::new(),
                return_date: date("2024-01-05"),
                condition: BookCondition::Good,
            })
            .await;

        assert!(matches!(result, Err(SagaError::NotFound { .. })));
        assert_eq!(f.transport.total_published(), 0);
    }

    #[tokio::test]
    async fn test_return_by_other_user_is_rejected() {
        let f = fixture(5, 1);
        let created = f
            .orchestrator
            .create_reservation(create_request(&f, "2024-01-10"))
            .await
            .unwrap();

        let result = f
            .orchestrator
            .return_book(ReturnBook {
                username: "mallory".to_string(),
                reservation_id: created.reservation_id,
                return_date: date("2024-01-05"),
                condition: BookCondition::Good,
            })
            .await;

        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(
            f.reservations.status(created.reservation_id),
            Some(ReservationStatus::Rented)
        );
        assert_eq!(f.catalog.available_count(f.book_id), Some(0));
        assert_eq!(f.rating.updates(), 0);
        assert_eq!(f.transport.total_published(), 0);
    }

    #[tokio::test]
    async fn test_deferred_return_by_other_user_stops_at_confirmation() {
        let f = fixture(5, 1);
        let created = f
            .orchestrator
            .create_reservation(create_request(&f, "2024-01-10"))
            .await
            .unwrap();
        f.reservations.set_unavailable(true);
        f.orchestrator
            .return_book(ReturnBook {
                username: "mallory".to_string(),
                reservation_id: created.reservation_id,
                return_date: date("2024-01-05"),
                condition: BookCondition::Good,
            })
            .await
            .unwrap();
        f.reservations.set_unavailable(false);
        let mut queued =
            RetryEvent::from_bytes(&f.transport.published(RetryQueue::Reservation)[0]).unwrap();

        let result = f
            .orchestrator
            .replay(&mut queued, RetryQueue::Reservation)
            .await;

        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(queued.resume_at, ReturnStep::ConfirmStatus);
        assert_eq!(f.catalog.available_count(f.book_id), Some(0));
        assert_eq!(f.rating.updates(), 0);
    }

    #[tokio::test]
    async fn test_condition_failure_is_queued_on_its_own() {
        let f = fixture(5, 1);
        let created = f
            .orchestrator
            .create_reservation(create_request(&f, "2024-01-10"))
            .await
            .unwrap();
        f.catalog.set_condition_updates_unavailable(true);

        let outcome = f
            .orchestrator
            .return_book(ReturnBook {
                username: "alice".to_string(),
                reservation_id: created.reservation_id,
                return_date: date("2024-01-05"),
                condition: BookCondition::Excellent,
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReturnOutcome::Deferred {
                step: ReturnStep::UpdateCondition,
                queue: RetryQueue::Catalog,
            }
        );
        let published = f.transport.published(RetryQueue::Catalog);
        assert_eq!(published.len(), 1);
        let event = RetryEvent::from_bytes(&published[0]).unwrap();
        assert_eq!(event.resume_at, ReturnStep::UpdateCondition);
        assert_eq!(event.condition, Some(BookCondition::Excellent));
        assert_eq!(f.catalog.available_count(f.book_id), Some(1));
        assert_eq!(f.rating.updates(), 0);
    }

    #[tokio::test]
    async fn test_replay_hands_off_to_other_queue() {
        let f = fixture(5, 1);
        let created = f
            .orchestrator
            .create_reservation(create_request(&f, "2024-01-10"))
            .await
            .unwrap();
        f.reservations.set_unavailable(true);

        f.orchestrator
            .return_book(ReturnBook {
                username: "alice".to_string(),
                reservation_id: created.reservation_id,
                return_date: date("2024-01-05"),
                condition: BookCondition::Good,
            })
            .await
            .unwrap();
        let mut queued =
            RetryEvent::from_bytes(&f.transport.published(RetryQueue::Reservation)[0]).unwrap();

        f.reservations.set_unavailable(false);
        f.rating.set_unavailable(true);
        f.orchestrator
            .replay(&mut queued, RetryQueue::Reservation)
            .await
            .unwrap();

        let handed_off =
            RetryEvent::from_bytes(&f.transport.published(RetryQueue::Rating)[0]).unwrap();
        assert_eq!(handed_off.resume_at, ReturnStep::ApplyRating);
        assert_eq!(handed_off.rate_delta, 1);
        assert_eq!(handed_off.book_id, Some(f.book_id));
        assert_eq!(handed_off.condition, None);
        assert_eq!(f.catalog.available_count(f.book_id), Some(1));
    }

    #[tokio::test]
    async fn test_replay_on_owning_queue_reports_unavailability() {
        let f = fixture(5, 1);
        let created = f
            .orchestrator
            .create_reservation(create_request(&f, "2024-01-10"))
            .await
            .unwrap();
        f.rating.set_unavailable(true);
        f.orchestrator
            .return_book(ReturnBook {
                username: "alice".to_string(),
                reservation_id: created.reservation_id,
                return_date: date("2024-01-05"),
                condition: BookCondition::Good,
            })
            .await
            .unwrap();
        let mut queued =
            RetryEvent::from_bytes(&f.transport.published(RetryQueue::Rating)[0]).unwrap();

        let result = f.orchestrator.replay(&mut queued, RetryQueue::Rating).await;

        assert!(matches!(
            result,
            Err(SagaError::ServiceUnavailable(Dependency::Rating))
        ));
        assert_eq!(f.transport.total_published(), 1);
    }
}
