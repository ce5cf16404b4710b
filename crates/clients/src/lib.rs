//! HTTP clients for the catalog, reservation and rating services.
//!
//! Each client implements the matching `saga` service trait. Every call goes
//! through a [`resilience::GuardedCaller`] taken from the shared
//! [`resilience::BreakerRegistry`]: one breaker for reads and one for writes
//! per service, probed with `GET /manage/health`.
//!
//! Status mapping:
//! - 502, 503, 504, connect errors and timeouts: `ServiceUnavailable`, and a
//!   breaker failure
//! - 404: `NotFound`
//! - any other non-success status: `Downstream`
//! - an undecodable body: `MalformedResponse`

pub mod catalog;
pub mod endpoint;
pub mod rating;
pub mod reservation;

pub use catalog::HttpCatalogClient;
pub use endpoint::{Endpoint, IDEMPOTENCY_HEADER, USER_HEADER, http_client};
pub use rating::HttpRatingClient;
pub use reservation::HttpReservationClient;
