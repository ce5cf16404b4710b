//! Queue transport abstraction used by the dispatcher and the workers.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use super::RetryQueue;

/// Errors raised by a [`RetryTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Ack error: {0}")]
    Ack(String),
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send {
    async fn ack(self: Box<Self>) -> Result<(), TransportError>;
}

/// A message received from a retry queue.
///
/// Dropping a delivery without acknowledging it leaves it with the broker,
/// which hands it out again.
pub struct Delivery {
    payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { payload, acker }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn ack(self) -> Result<(), TransportError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Deliveries of one queue, in order. The stream ends when the connection
/// behind it is lost.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, TransportError>>;

/// Durable, at-least-once message transport.
///
/// Implementations must tolerate concurrent publishes from request tasks
/// while workers consume.
#[async_trait]
pub trait RetryTransport: Send + Sync {
    /// Publishes `payload` durably to `queue`.
    async fn publish(&self, queue: RetryQueue, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Opens a consumer on `queue` that receives one unacknowledged delivery
    /// at a time.
    async fn subscribe(&self, queue: RetryQueue) -> Result<DeliveryStream, TransportError>;
}
