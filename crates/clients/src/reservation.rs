//! Reservation service client.

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{BookId, LibraryId, Reservation, ReservationId};
use resilience::{BreakerRegistry, GuardedCaller};
use saga::{Dependency, NewReservation, ReservationStore, SagaError};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::endpoint::{Endpoint, Exchange, USER_HEADER, read_breaker, write_breaker};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody {
    #[serde(rename = "bookUid")]
    book_id: BookId,
    #[serde(rename = "libraryUid")]
    library_id: LibraryId,
    start_date: NaiveDate,
    till_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct Amount {
    amount: u32,
}

/// [`ReservationStore`] over the reservation service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpReservationClient {
    endpoint: Endpoint,
    reads: GuardedCaller,
    writes: GuardedCaller,
}

impl HttpReservationClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client, registry: &BreakerRegistry) -> Self {
        let dependency = Dependency::Reservation;
        Self {
            endpoint: Endpoint::new(dependency, base_url, http),
            reads: registry.caller(&read_breaker(dependency)),
            writes: registry.caller(&write_breaker(dependency)),
        }
    }

    async fn fetch_one(&self, reservation_id: ReservationId) -> Exchange<Reservation> {
        self.endpoint
            .fetch(
                self.endpoint
                    .get(&format!("/api/v1/reservation/{reservation_id}")),
                ("reservation", reservation_id.to_string()),
            )
            .await
    }

    /// PUT of the return date. The service refuses to close a reservation
    /// twice; a refusal for one that is already closed counts as done.
    async fn close(&self, reservation_id: ReservationId, return_date: NaiveDate) -> Exchange<()> {
        let endpoint = &self.endpoint;
        let answer = endpoint
            .execute(
                endpoint
                    .put(&format!("/api/v1/reservation/{reservation_id}"))
                    .json(&json!({ "date": return_date })),
                ("reservation", reservation_id.to_string()),
            )
            .await?;

        match answer {
            Err(SagaError::Downstream { status, .. }) if (400..500).contains(&status) => {
                match self.fetch_one(reservation_id).await? {
                    Ok(current) if !current.status.is_active() => {
                        tracing::debug!(status = %current.status, "Reservation already closed");
                        Ok(Ok(()))
                    }
                    Ok(_) => Ok(answer),
                    Err(e) => Ok(Err(e)),
                }
            }
            other => Ok(other),
        }
    }
}

#[async_trait]
impl ReservationStore for HttpReservationClient {
    #[tracing::instrument(skip(self, reservation), fields(username = %reservation.username))]
    async fn create(&self, reservation: NewReservation) -> Result<Reservation, SagaError> {
        let endpoint = &self.endpoint;
        let body = CreateBody {
            book_id: reservation.book_id,
            library_id: reservation.library_id,
            start_date: reservation.start_date,
            till_date: reservation.till_date,
        };
        endpoint
            .required(&self.writes, || {
                endpoint.fetch(
                    endpoint
                        .post("/api/v1/reservation")
                        .header(USER_HEADER, reservation.username.as_str())
                        .json(&body),
                    ("book", reservation.book_id.to_string()),
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, reservation_id: ReservationId) -> Result<Reservation, SagaError> {
        self.endpoint
            .required(&self.reads, || self.fetch_one(reservation_id))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, username: &str) -> Result<Vec<Reservation>, SagaError> {
        let endpoint = &self.endpoint;
        endpoint
            .required(&self.reads, || {
                endpoint.fetch(
                    endpoint
                        .get("/api/v1/reservation")
                        .header(USER_HEADER, username),
                    ("user", username.to_string()),
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn update_status(
        &self,
        reservation_id: ReservationId,
        return_date: NaiveDate,
    ) -> Result<(), SagaError> {
        self.endpoint
            .required(&self.writes, || self.close(reservation_id, return_date))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, reservation_id: ReservationId) -> Result<(), SagaError> {
        let endpoint = &self.endpoint;
        let result = endpoint
            .required(&self.writes, || {
                endpoint.execute(
                    endpoint.delete(&format!("/api/v1/reservation/{reservation_id}")),
                    ("reservation", reservation_id.to_string()),
                )
            })
            .await;
        match result {
            Err(SagaError::NotFound { .. }) => Ok(()),
            other => other,
        }
    }

    #[tracing::instrument(skip(self))]
    async fn count_active(&self, username: &str) -> Result<u32, SagaError> {
        let endpoint = &self.endpoint;
        let amount: Amount = endpoint
            .required(&self.reads, || {
                endpoint.fetch(
                    endpoint
                        .get("/api/v1/reservation/amount")
                        .header(USER_HEADER, username),
                    ("user", username.to_string()),
                )
            })
            .await?;
        Ok(amount.amount)
    }
}
