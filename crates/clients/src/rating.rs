//! Bonus (rating) service client.

use async_trait::async_trait;
use common::UserRating;
use resilience::{BreakerRegistry, GuardedCaller};
use saga::{Dependency, OperationKey, RatingService, SagaError};

use crate::endpoint::{Endpoint, IDEMPOTENCY_HEADER, USER_HEADER, read_breaker, write_breaker};

/// [`RatingService`] over the bonus service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRatingClient {
    endpoint: Endpoint,
    reads: GuardedCaller,
    writes: GuardedCaller,
}

impl HttpRatingClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client, registry: &BreakerRegistry) -> Self {
        let dependency = Dependency::Rating;
        Self {
            endpoint: Endpoint::new(dependency, base_url, http),
            reads: registry.caller(&read_breaker(dependency)),
            writes: registry.caller(&write_breaker(dependency)),
        }
    }
}

#[async_trait]
impl RatingService for HttpRatingClient {
    #[tracing::instrument(skip(self))]
    async fn get(&self, username: &str) -> Result<UserRating, SagaError> {
        let endpoint = &self.endpoint;
        endpoint
            .required(&self.reads, || {
                endpoint.fetch(
                    endpoint.get("/api/v1/rating").header(USER_HEADER, username),
                    ("rating", username.to_string()),
                )
            })
            .await
    }

    #[tracing::instrument(skip(self), fields(key = %key))]
    async fn apply_delta(
        &self,
        username: &str,
        delta: i32,
        key: &OperationKey,
    ) -> Result<(), SagaError> {
        let endpoint = &self.endpoint;
        endpoint
            .required(&self.writes, || {
                endpoint.execute(
                    endpoint
                        .put(&format!("/api/v1/rating/stars/{delta}/"))
                        .header(USER_HEADER, username)
                        .header(IDEMPOTENCY_HEADER, key.as_str()),
                    ("rating", username.to_string()),
                )
            })
            .await
    }
}
