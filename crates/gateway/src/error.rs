//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::{ErrorKind, SagaError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request from the client.
    BadRequest(String),
    /// Saga or downstream failure.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        let body = serde_json::json!({ "message": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::BusinessRule => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TransientUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::PermanentDownstream => match &err {
            SagaError::NotFound { .. } => StatusCode::NOT_FOUND,
            SagaError::Downstream { .. } | SagaError::MalformedResponse { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };
    if status.is_server_error() {
        tracing::error!(error = %err, status = status.as_u16(), "request failed");
    }
    (status, err.to_string())
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ReservationId;
    use saga::Dependency;

    fn status_of(err: SagaError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(SagaError::Validation("bad date".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SagaError::QuotaExceeded { active: 2, stars: 2 }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(SagaError::ServiceUnavailable(Dependency::Rating)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(SagaError::not_found("reservation", ReservationId::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SagaError::Downstream {
                dependency: Dependency::Catalog,
                status: 500,
                message: "boom".into(),
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(SagaError::CompensationFailed {
                step: "delete_reservation",
                reason: "timeout".into(),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_bad_request() {
        let response = ApiError::BadRequest("missing X-User-Name".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
