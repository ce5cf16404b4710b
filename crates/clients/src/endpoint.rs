//! Shared request plumbing: status mapping, health probe and breaker guarding.

use std::future::Future;
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use resilience::{GuardError, GuardedCaller};
use saga::{Dependency, SagaError};
use serde::de::DeserializeOwned;

/// Header carrying the calling user.
pub const USER_HEADER: &str = "X-User-Name";

/// Header carrying the operation key of a mutation.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const HEALTH_PATH: &str = "/manage/health";

/// Result of one HTTP exchange as seen by the breaker.
///
/// The outer error means the service could not be reached and counts as a
/// breaker failure. The inner error means the service answered with
/// something unusable; the service is healthy, so the breaker is not tripped.
pub type Exchange<T> = Result<Result<T, SagaError>, SagaError>;

/// Builds the HTTP client shared by all downstream clients.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Base URL and transport of one downstream service.
#[derive(Debug, Clone)]
pub struct Endpoint {
    dependency: Dependency,
    base_url: String,
    http: reqwest::Client,
}

impl Endpoint {
    pub fn new(dependency: Dependency, base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            dependency,
            base_url,
            http,
        }
    }

    pub fn dependency(&self) -> Dependency {
        self.dependency
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path))
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.http.put(self.url(path))
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.http.delete(self.url(path))
    }

    /// Liveness probe used before every guarded call.
    pub async fn healthy(&self) -> bool {
        match self.get(HEALTH_PATH).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(dependency = self.dependency.as_str(), error = %e, "health probe failed");
                false
            }
        }
    }

    fn unavailable(&self) -> SagaError {
        SagaError::ServiceUnavailable(self.dependency)
    }

    /// Sends `request` and sorts the response into reachable/unreachable.
    ///
    /// `resource` names what a 404 refers to.
    pub async fn send(&self, request: RequestBuilder, resource: (&'static str, String)) -> Exchange<Response> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                tracing::warn!(dependency = self.dependency.as_str(), error = %e, "request failed");
                return Err(self.unavailable());
            }
            Err(e) => {
                return Ok(Err(SagaError::Downstream {
                    dependency: self.dependency,
                    status: 0,
                    message: e.to_string(),
                }));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(Ok(response));
        }
        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(self.unavailable());
        }
        if status == StatusCode::NOT_FOUND {
            let (what, id) = resource;
            return Ok(Err(SagaError::not_found(what, id)));
        }
        let message = response.text().await.unwrap_or_default();
        Ok(Err(SagaError::Downstream {
            dependency: self.dependency,
            status: status.as_u16(),
            message,
        }))
    }

    /// Sends `request` and decodes a JSON body.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        resource: (&'static str, String),
    ) -> Exchange<T> {
        match self.send(request, resource).await? {
            Ok(response) => Ok(self.decode(response).await),
            Err(e) => Ok(Err(e)),
        }
    }

    /// Sends `request`, ignoring the body of a successful response.
    pub async fn execute(&self, request: RequestBuilder, resource: (&'static str, String)) -> Exchange<()> {
        Ok(self.send(request, resource).await?.map(|_| ()))
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T, SagaError> {
        let body = response
            .bytes()
            .await
            .map_err(|e| self.malformed(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| self.malformed(e.to_string()))
    }

    fn malformed(&self, reason: String) -> SagaError {
        SagaError::MalformedResponse {
            dependency: self.dependency,
            reason,
        }
    }

    /// Runs `action` behind `caller`, failing when the breaker is open.
    pub async fn required<T, A, AF>(&self, caller: &GuardedCaller, action: A) -> Result<T, SagaError>
    where
        A: FnOnce() -> AF,
        AF: Future<Output = Exchange<T>>,
    {
        let outcome = caller
            .call(|| self.healthy(), action, || Err(self.unavailable()))
            .await;
        self.settle(outcome.into_required())
    }

    /// Runs `action` behind `caller`, returning `fallback()` when the breaker
    /// is open.
    pub async fn lenient<T, A, AF, F>(
        &self,
        caller: &GuardedCaller,
        action: A,
        fallback: F,
    ) -> Result<T, SagaError>
    where
        A: FnOnce() -> AF,
        AF: Future<Output = Exchange<T>>,
        F: FnOnce() -> T,
    {
        let outcome = caller
            .call(|| self.healthy(), action, || Ok(fallback()))
            .await;
        if outcome.is_degraded() {
            tracing::debug!(dependency = self.dependency.as_str(), "returning degraded result");
        }
        self.settle(outcome.into_result())
    }

    fn settle<T>(&self, result: Result<Result<T, SagaError>, GuardError<SagaError>>) -> Result<T, SagaError> {
        match result {
            Ok(answer) => answer,
            Err(GuardError::Unavailable | GuardError::Rejected) => Err(self.unavailable()),
            Err(GuardError::Call(e)) => Err(e),
        }
    }
}

/// Breaker name for reads of `dependency`.
pub fn read_breaker(dependency: Dependency) -> String {
    format!("{}.read", dependency.as_str())
}

/// Breaker name for writes to `dependency`.
pub fn write_breaker(dependency: Dependency) -> String {
    format!("{}.write", dependency.as_str())
}
