//! Library and book listings.
//!
//! Listings degrade to an empty page while the catalog breaker is open.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use common::{Book, Library, LibraryId, Page};
use saga::CatalogService;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct LibrariesQuery {
    pub city: String,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooksQuery {
    pub page: Option<u32>,
    pub size: Option<u32>,
    #[serde(default)]
    pub show_all: bool,
}

/// GET /api/v1/libraries?city=&page=&size=
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LibrariesQuery>, QueryRejection>,
) -> Result<Json<Page<Library>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let page = state
        .catalog
        .list_libraries(
            &query.city,
            query.page.unwrap_or_default(),
            query.size.unwrap_or_default(),
        )
        .await?;
    Ok(Json(page))
}

/// GET /api/v1/libraries/{id}/books?page=&size=&showAll=
#[tracing::instrument(skip(state))]
pub async fn books(
    State(state): State<Arc<AppState>>,
    id: Result<Path<LibraryId>, PathRejection>,
    query: Result<Query<BooksQuery>, QueryRejection>,
) -> Result<Json<Page<Book>>, ApiError> {
    let Path(library_id) = id.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let page = state
        .catalog
        .list_library_books(
            library_id,
            query.page.unwrap_or_default(),
            query.size.unwrap_or_default(),
            query.show_all,
        )
        .await?;
    Ok(Json(page))
}
