//! Reservation store trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{BookId, LibraryId, Reservation, ReservationId, ReservationStatus};

use super::Dependency;
use crate::error::SagaError;

/// A reservation to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub username: String,
    pub book_id: BookId,
    pub library_id: LibraryId,
    pub start_date: NaiveDate,
    pub till_date: NaiveDate,
}

/// Persistence of reservation records.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Creates a reservation in the Rented state.
    async fn create(&self, reservation: NewReservation) -> Result<Reservation, SagaError>;

    async fn get(&self, reservation_id: ReservationId) -> Result<Reservation, SagaError>;

    /// All reservations of a user.
    async fn list(&self, username: &str) -> Result<Vec<Reservation>, SagaError>;

    /// Closes a rented reservation: Returned, or Expired when `return_date`
    /// is past the due date. A reservation that is already closed is left as is.
    async fn update_status(
        &self,
        reservation_id: ReservationId,
        return_date: NaiveDate,
    ) -> Result<(), SagaError>;

    async fn delete(&self, reservation_id: ReservationId) -> Result<(), SagaError>;

    /// Number of the user's reservations still in the Rented state.
    async fn count_active(&self, username: &str) -> Result<u32, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryReservationState {
    reservations: HashMap<ReservationId, Reservation>,
    unavailable: bool,
    reads_unavailable: bool,
    fail_on_delete: bool,
}

/// In-memory reservation store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReservationStore {
    state: Arc<RwLock<InMemoryReservationState>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an existing reservation.
    pub fn insert(&self, reservation: Reservation) {
        self.write()
            .reservations
            .insert(reservation.reservation_id, reservation);
    }

    /// Makes every call fail as if the reservation service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Makes lookups (`get`) fail as unavailable while writes still succeed.
    pub fn set_reads_unavailable(&self, unavailable: bool) {
        self.write().reads_unavailable = unavailable;
    }

    /// Configures the service to fail on delete.
    pub fn set_fail_on_delete(&self, fail: bool) {
        self.write().fail_on_delete = fail;
    }

    pub fn reservation_count(&self) -> usize {
        self.read().reservations.len()
    }

    pub fn status(&self, reservation_id: ReservationId) -> Option<ReservationStatus> {
        self.read()
            .reservations
            .get(&reservation_id)
            .map(|r| r.status)
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryReservationState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryReservationState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(state: &InMemoryReservationState) -> Result<(), SagaError> {
        if state.unavailable {
            return Err(SagaError::ServiceUnavailable(Dependency::Reservation));
        }
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn create(&self, reservation: NewReservation) -> Result<Reservation, SagaError> {
        let mut state = self.write();
        Self::check_available(&state)?;

        let created = Reservation {
            reservation_id: ReservationId::new(),
            username: reservation.username,
            book_id: reservation.book_id,
            library_id: reservation.library_id,
            status: ReservationStatus::Rented,
            start_date: reservation.start_date,
            till_date: reservation.till_date,
        };
        state
            .reservations
            .insert(created.reservation_id, created.clone());
        Ok(created)
    }

    async fn get(&self, reservation_id: ReservationId) -> Result<Reservation, SagaError> {
        let state = self.read();
        Self::check_available(&state)?;
        if state.reads_unavailable {
            return Err(SagaError::ServiceUnavailable(Dependency::Reservation));
        }
        state
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| SagaError::not_found("reservation", reservation_id))
    }

    async fn list(&self, username: &str) -> Result<Vec<Reservation>, SagaError> {
        let state = self.read();
        Self::check_available(&state)?;
        let mut reservations: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.username == username)
            .cloned()
            .collect();
        reservations.sort_by_key(|r| (r.start_date, r.reservation_id));
        Ok(reservations)
    }

    async fn update_status(
        &self,
        reservation_id: ReservationId,
        return_date: NaiveDate,
    ) -> Result<(), SagaError> {
        let mut state = self.write();
        Self::check_available(&state)?;
        let reservation = state
            .reservations
            .get_mut(&reservation_id)
            .ok_or_else(|| SagaError::not_found("reservation", reservation_id))?;

        if reservation.status.is_active() {
            reservation.status = ReservationStatus::on_return(return_date, reservation.till_date);
        }
        Ok(())
    }

    async fn delete(&self, reservation_id: ReservationId) -> Result<(), SagaError> {
        let mut state = self.write();
        Self::check_available(&state)?;
        if state.fail_on_delete {
            return Err(SagaError::Downstream {
                dependency: Dependency::Reservation,
                status: 500,
                message: "delete failed".to_string(),
            });
        }
        state.reservations.remove(&reservation_id);
        Ok(())
    }

    async fn count_active(&self, username: &str) -> Result<u32, SagaError> {
        let state = self.read();
        Self::check_available(&state)?;
        let count = state
            .reservations
            .values()
            .filter(|r| r.username == username && r.status.is_active())
            .count();
        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn new_reservation(username: &str) -> NewReservation {
        NewReservation {
            username: username.to_string(),
            book_id: BookId::new(),
            library_id: LibraryId::new(),
            start_date: date("2024-01-01"),
            till_date: date("2024-01-10"),
        }
    }

    #[tokio::test]
    async fn test_create_and_count_active() {
        let store = InMemoryReservationStore::new();
        store.create(new_reservation("alice")).await.unwrap();
        let second = store.create(new_reservation("alice")).await.unwrap();
        store.create(new_reservation("bob")).await.unwrap();

        assert_eq!(second.status, ReservationStatus::Rented);
        assert_eq!(store.count_active("alice").await.unwrap(), 2);

        store
            .update_status(second.reservation_id, date("2024-01-05"))
            .await
            .unwrap();
        assert_eq!(store.count_active("alice").await.unwrap(), 1);
        assert_eq!(store.list("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_late_return_expires() {
        let store = InMemoryReservationStore::new();
        let created = store.create(new_reservation("alice")).await.unwrap();

        store
            .update_status(created.reservation_id, date("2024-01-15"))
            .await
            .unwrap();
        assert_eq!(
            store.status(created.reservation_id),
            Some(ReservationStatus::Expired)
        );
    }

    #[tokio::test]
    async fn test_update_status_keeps_closed_reservation() {
        let store = InMemoryReservationStore::new();
        let created = store.create(new_reservation("alice")).await.unwrap();

        store
            .update_status(created.reservation_id, date("2024-01-05"))
            .await
            .unwrap();
        store
            .update_status(created.reservation_id, date("2024-02-01"))
            .await
            .unwrap();

        assert_eq!(
            store.status(created.reservation_id),
            Some(ReservationStatus::Returned)
        );
    }

    #[tokio::test]
    async fn test_delete_removes_reservation() {
        let store = InMemoryReservationStore::new();
        let created = store.create(new_reservation("alice")).await.unwrap();
        store.delete(created.reservation_id).await.unwrap();

        assert_eq!(store.reservation_count(), 0);
        assert!(matches!(
            store.get(created.reservation_id).await,
            Err(SagaError::NotFound { .. })
        ));
    }
}
