//! Names of the durable retry queues.

use crate::services::Dependency;

/// One durable queue per downstream dependency. A deferred step waits on the
/// queue of the service it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RetryQueue {
    Reservation,
    Catalog,
    Rating,
}

impl RetryQueue {
    pub const ALL: [RetryQueue; 3] = [
        RetryQueue::Reservation,
        RetryQueue::Catalog,
        RetryQueue::Rating,
    ];

    pub fn for_dependency(dependency: Dependency) -> Self {
        match dependency {
            Dependency::Reservation => RetryQueue::Reservation,
            Dependency::Catalog => RetryQueue::Catalog,
            Dependency::Rating => RetryQueue::Rating,
        }
    }

    /// The dependency whose outages this queue absorbs.
    pub fn dependency(&self) -> Dependency {
        match self {
            RetryQueue::Reservation => Dependency::Reservation,
            RetryQueue::Catalog => Dependency::Catalog,
            RetryQueue::Rating => Dependency::Rating,
        }
    }

    /// Broker queue name.
    pub fn name(&self) -> &'static str {
        match self {
            RetryQueue::Reservation => "reservation-status-queue",
            RetryQueue::Catalog => "lib-status-queue",
            RetryQueue::Rating => "rate-status-queue",
        }
    }
}

impl std::fmt::Display for RetryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
