//! Library service client.

use async_trait::async_trait;
use common::{Book, BookCondition, BookId, Library, LibraryId, Page};
use resilience::{BreakerRegistry, GuardedCaller};
use saga::{CatalogService, Dependency, OperationKey, SagaError};
use serde_json::json;

use crate::endpoint::{Endpoint, IDEMPOTENCY_HEADER, read_breaker, write_breaker};

/// [`CatalogService`] over the library service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpCatalogClient {
    endpoint: Endpoint,
    reads: GuardedCaller,
    writes: GuardedCaller,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client, registry: &BreakerRegistry) -> Self {
        let dependency = Dependency::Catalog;
        Self {
            endpoint: Endpoint::new(dependency, base_url, http),
            reads: registry.caller(&read_breaker(dependency)),
            writes: registry.caller(&write_breaker(dependency)),
        }
    }
}

#[async_trait]
impl CatalogService for HttpCatalogClient {
    #[tracing::instrument(skip(self))]
    async fn get_book(&self, book_id: BookId) -> Result<Book, SagaError> {
        let endpoint = &self.endpoint;
        endpoint
            .required(&self.reads, || {
                endpoint.fetch(
                    endpoint.get(&format!("/api/v1/books/{book_id}/")),
                    ("book", book_id.to_string()),
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_library(&self, library_id: LibraryId) -> Result<Library, SagaError> {
        let endpoint = &self.endpoint;
        endpoint
            .required(&self.reads, || {
                endpoint.fetch(
                    endpoint.get(&format!("/api/v1/libraries/{library_id}/")),
                    ("library", library_id.to_string()),
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_libraries(
        &self,
        city: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<Library>, SagaError> {
        let endpoint = &self.endpoint;
        let mut query = vec![("city", city.to_string())];
        if page > 0 {
            query.push(("page", page.to_string()));
        }
        if size > 0 {
            query.push(("size", size.to_string()));
        }
        endpoint
            .lenient(
                &self.reads,
                || {
                    endpoint.fetch(
                        endpoint.get("/api/v1/libraries").query(&query),
                        ("city", city.to_string()),
                    )
                },
                Page::default,
            )
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_library_books(
        &self,
        library_id: LibraryId,
        page: u32,
        size: u32,
        show_all: bool,
    ) -> Result<Page<Book>, SagaError> {
        let endpoint = &self.endpoint;
        let mut query = vec![("showAll", show_all.to_string())];
        if page > 0 {
            query.push(("page", page.to_string()));
        }
        if size > 0 {
            query.push(("size", size.to_string()));
        }
        endpoint
            .lenient(
                &self.reads,
                || {
                    endpoint.fetch(
                        endpoint
                            .get(&format!("/api/v1/libraries/{library_id}/books"))
                            .query(&query),
                        ("library", library_id.to_string()),
                    )
                },
                Page::default,
            )
            .await
    }

    #[tracing::instrument(skip(self), fields(key = %key))]
    async fn adjust_book_count(
        &self,
        library_id: LibraryId,
        book_id: BookId,
        delta: i32,
        key: &OperationKey,
    ) -> Result<(), SagaError> {
        let endpoint = &self.endpoint;
        endpoint
            .required(&self.writes, || {
                endpoint.execute(
                    endpoint
                        .put(&format!(
                            "/api/v1/library/{library_id}/books/{book_id}/count/{delta}/"
                        ))
                        .header(IDEMPOTENCY_HEADER, key.as_str()),
                    ("library book", format!("{library_id}/{book_id}")),
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn set_book_condition(
        &self,
        book_id: BookId,
        condition: BookCondition,
    ) -> Result<(), SagaError> {
        let endpoint = &self.endpoint;
        endpoint
            .required(&self.writes, || {
                endpoint.execute(
                    endpoint
                        .put(&format!("/api/v1/books/{book_id}/condition"))
                        .json(&json!({ "condition": condition })),
                    ("book", book_id.to_string()),
                )
            })
            .await
    }
}
