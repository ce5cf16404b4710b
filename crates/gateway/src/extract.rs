//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use clients::USER_HEADER;

use crate::error::ApiError;

/// Caller identity taken from the `X-User-Name` header.
#[derive(Debug, Clone)]
pub struct UserName(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserName {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::BadRequest(format!("{USER_HEADER} header is required")))?;
        Ok(UserName(value.to_string()))
    }
}
