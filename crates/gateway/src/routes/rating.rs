//! Rating endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::UserRating;
use saga::RatingService;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::UserName;

/// GET /api/v1/rating
#[tracing::instrument(skip(state, user), fields(username = %user.0))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    user: UserName,
) -> Result<Json<UserRating>, ApiError> {
    let rating = state.rating.get(&user.0).await?;
    Ok(Json(rating))
}
