//! Downstream service interfaces and in-memory implementations for saga steps.
//!
//! The orchestrator only sees these traits. The gateway wires in the HTTP
//! clients; tests use the in-memory services, which can be told to behave as
//! if their backing service were down.

pub mod catalog;
pub mod rating;
pub mod reservation;

use common::ReservationId;
use serde::{Deserialize, Serialize};

pub use catalog::{CatalogService, InMemoryCatalogService};
pub use rating::{InMemoryRatingService, RatingService};
pub use reservation::{InMemoryReservationStore, NewReservation, ReservationStore};

/// A downstream service the gateway depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    Catalog,
    Reservation,
    Rating,
}

impl Dependency {
    pub const ALL: [Dependency; 3] = [
        Dependency::Reservation,
        Dependency::Catalog,
        Dependency::Rating,
    ];

    /// Short name used for breaker names and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::Catalog => "catalog",
            Dependency::Reservation => "reservation",
            Dependency::Rating => "rating",
        }
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Dependency::Catalog => "Library Service",
            Dependency::Reservation => "Reservation Service",
            Dependency::Rating => "Bonus Service",
        };
        f.write_str(name)
    }
}

/// Identifies one side effect of one saga so downstream services can apply it
/// at most once, however often it is replayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey(String);

impl OperationKey {
    pub fn new(reservation_id: ReservationId, step: &str) -> Self {
        Self(format!("{reservation_id}:{step}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
