//! Health check endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub breakers: BTreeMap<String, &'static str>,
}

/// GET /manage/health: liveness plus the state of every breaker.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let breakers = state
        .breakers
        .snapshot()
        .into_iter()
        .map(|(name, breaker)| (name, breaker.as_str()))
        .collect();
    Json(HealthResponse {
        status: "UP",
        breakers,
    })
}
