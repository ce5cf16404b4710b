//! Publishes deferred return work to the retry queues.

use std::sync::Arc;

use super::RetryQueue;
use super::transport::RetryTransport;
use crate::error::SagaError;
use crate::events::RetryEvent;

/// Serializes [`RetryEvent`]s and hands them to the transport.
#[derive(Clone)]
pub struct RetryDispatcher {
    transport: Arc<dyn RetryTransport>,
}

impl std::fmt::Debug for RetryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryDispatcher").finish_non_exhaustive()
    }
}

impl RetryDispatcher {
    pub fn new(transport: Arc<dyn RetryTransport>) -> Self {
        Self { transport }
    }

    /// Publishes `event` on `queue`, logging instead of failing.
    ///
    /// Returns whether the event was accepted by the transport. A lost event
    /// is recorded in `retry_publish_failures_total`.
    #[tracing::instrument(
        skip(self, event),
        fields(queue = %queue, reservation_id = %event.reservation_id, step = %event.resume_at)
    )]
    pub async fn enqueue(&self, event: &RetryEvent, queue: RetryQueue) -> bool {
        match self.try_enqueue(event, queue).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to publish retry event; event lost");
                false
            }
        }
    }

    /// Publishes `event` on `queue`, reporting failures to the caller.
    pub async fn try_enqueue(&self, event: &RetryEvent, queue: RetryQueue) -> Result<(), SagaError> {
        let payload = event.to_bytes()?;
        match self.transport.publish(queue, payload).await {
            Ok(()) => {
                metrics::counter!("retry_published_total", "queue" => queue.name()).increment(1);
                tracing::info!(queue = %queue, step = %event.resume_at, "Retry event queued");
                Ok(())
            }
            Err(e) => {
                metrics::counter!("retry_publish_failures_total", "queue" => queue.name())
                    .increment(1);
                Err(SagaError::Transport(e.to_string()))
            }
        }
    }
}
