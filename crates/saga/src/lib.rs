//! Reservation sagas and the durable retry dispatcher for the library gateway.
//!
//! Creating a reservation touches three services in order:
//! 1. Check the user's quota (reservation + rating services)
//! 2. Check availability (catalog)
//! 3. Create the reservation, then take the copy out of stock
//!
//! If the stock update fails the reservation is deleted again.
//!
//! Returning a book runs the [`ReturnStep`]s in order. A step whose service
//! is down is not an error: the remaining work becomes a [`RetryEvent`] on
//! that service's queue and is replayed by the [`retry`] workers.

pub mod error;
pub mod events;
pub mod orchestrator;
pub mod retry;
pub mod services;
pub mod shutdown;
pub mod step;

pub use error::{ErrorKind, SagaError};
pub use events::RetryEvent;
pub use orchestrator::{CreateReservation, ReservationOrchestrator, ReturnBook, ReturnOutcome};
pub use retry::{
    AmqpTransport, InMemoryTransport, RetryDispatcher, RetryQueue, RetrySupervisor,
    RetryTransport, StepReplayer,
};
pub use services::{
    CatalogService, Dependency, InMemoryCatalogService, InMemoryRatingService,
    InMemoryReservationStore, NewReservation, OperationKey, RatingService, ReservationStore,
};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use step::ReturnStep;
