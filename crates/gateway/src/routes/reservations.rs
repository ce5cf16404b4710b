//! Reservation saga endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use common::{BookCondition, BookId, LibraryId, ReservationDetails, ReservationId};
use saga::{CreateReservation, ReturnBook, ReturnOutcome};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::UserName;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeBookRequest {
    #[serde(rename = "bookUid")]
    pub book_id: BookId,
    #[serde(rename = "libraryUid")]
    pub library_id: LibraryId,
    pub till_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ReturnBookRequest {
    pub date: NaiveDate,
    pub condition: BookCondition,
}

// -- Handlers --

/// POST /api/v1/reservations: rent a book.
#[tracing::instrument(skip(state, user, payload), fields(username = %user.0))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    user: UserName,
    payload: Result<Json<TakeBookRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReservationDetails>), ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let details = state
        .orchestrator
        .create_reservation(CreateReservation {
            username: user.0,
            book_id: req.book_id,
            library_id: req.library_id,
            till_date: req.till_date,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(details)))
}

/// POST /api/v1/reservations/{id}/return: return a rented book.
///
/// Answers 204 whether the saga finished or left steps queued for retry.
#[tracing::instrument(skip(state, user, id, payload), fields(username = %user.0))]
pub async fn return_book(
    State(state): State<Arc<AppState>>,
    user: UserName,
    id: Result<Path<ReservationId>, PathRejection>,
    payload: Result<Json<ReturnBookRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(reservation_id) = id.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let outcome = state
        .orchestrator
        .return_book(ReturnBook {
            username: user.0,
            reservation_id,
            return_date: req.date,
            condition: req.condition,
        })
        .await?;

    if let ReturnOutcome::Deferred { step, queue } = outcome {
        tracing::info!(%reservation_id, %step, %queue, "return accepted, remaining steps queued");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/reservations: the caller's reservations.
#[tracing::instrument(skip(state, user), fields(username = %user.0))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    user: UserName,
) -> Result<Json<Vec<ReservationDetails>>, ApiError> {
    let details = state.orchestrator.list_reservations(&user.0).await?;
    Ok(Json(details))
}
