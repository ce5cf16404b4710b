//! Durable deferral and replay of partially failed return sagas.
//!
//! The orchestrator hands leftover work to the [`RetryDispatcher`], which
//! publishes it on the queue of the dependency that was down. A
//! [`RetrySupervisor`] keeps one [`RetryWorker`] per queue that replays the
//! messages one at a time, backing off while the dependency stays down.

pub mod amqp;
pub mod dispatcher;
pub mod memory;
pub mod queue;
pub mod supervisor;
pub mod transport;
pub mod worker;

pub use amqp::AmqpTransport;
pub use dispatcher::RetryDispatcher;
pub use memory::InMemoryTransport;
pub use queue::RetryQueue;
pub use supervisor::RetrySupervisor;
pub use transport::{Acknowledger, Delivery, DeliveryStream, RetryTransport, TransportError};
pub use worker::{RetryWorker, Settlement, StepReplayer, WorkerExit};
