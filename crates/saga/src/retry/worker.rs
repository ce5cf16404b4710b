//! Sequential consumer of one retry queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use super::RetryQueue;
use super::transport::{Delivery, DeliveryStream, TransportError};
use crate::error::SagaError;
use crate::events::RetryEvent;
use crate::shutdown::ShutdownSignal;

/// Re-runs the deferred part of a saga.
#[async_trait]
pub trait StepReplayer: Send + Sync {
    /// Replays `event`, consumed from `queue`.
    ///
    /// `Ok` means the work is finished or handed to another queue. A
    /// retryable error means the work should be tried again; `event` then
    /// holds only what is left, so steps that already succeeded are not
    /// repeated.
    async fn replay(&self, event: &mut RetryEvent, queue: RetryQueue) -> Result<(), SagaError>;
}

/// How one delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Replayed and acknowledged.
    Completed,
    /// Acknowledged without success: malformed or permanently failing.
    Dropped,
    /// Shutdown arrived while backing off; the message stays with the broker.
    Interrupted,
}

/// Why [`RetryWorker::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Shutdown,
    /// The delivery stream ended; the caller should resubscribe.
    StreamEnded,
}

/// Replays the messages of one queue, one at a time, retrying each until it
/// is settled.
#[derive(Clone)]
pub struct RetryWorker {
    queue: RetryQueue,
    replayer: Arc<dyn StepReplayer>,
    backoff: Duration,
}

impl std::fmt::Debug for RetryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryWorker")
            .field("queue", &self.queue)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Failures that are retried from the same message rather than dropped.
/// A failed hand-off to another queue counts: dropping the message would
/// lose the work.
fn retry_in_place(error: &SagaError) -> bool {
    error.is_retryable() || matches!(error, SagaError::Transport(_))
}

impl RetryWorker {
    pub fn new(queue: RetryQueue, replayer: Arc<dyn StepReplayer>, backoff: Duration) -> Self {
        Self {
            queue,
            replayer,
            backoff,
        }
    }

    pub fn queue(&self) -> RetryQueue {
        self.queue
    }

    /// Consumes `deliveries` until shutdown or until the stream ends.
    ///
    /// Transport errors are returned so the caller can reconnect.
    pub async fn run(
        &self,
        mut deliveries: DeliveryStream,
        shutdown: &mut ShutdownSignal,
    ) -> Result<WorkerExit, TransportError> {
        loop {
            if shutdown.is_triggered() {
                return Ok(WorkerExit::Shutdown);
            }
            let next = tokio::select! {
                next = deliveries.next() => next,
                _ = shutdown.recv() => return Ok(WorkerExit::Shutdown),
            };
            match next {
                Some(Ok(delivery)) => {
                    if self.handle(delivery, shutdown).await? == Settlement::Interrupted {
                        return Ok(WorkerExit::Shutdown);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(WorkerExit::StreamEnded),
            }
        }
    }

    /// Settles a single delivery.
    #[tracing::instrument(skip_all, fields(queue = %self.queue))]
    pub async fn handle(
        &self,
        delivery: Delivery,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Settlement, TransportError> {
        let queue = self.queue.name();
        let mut event = match RetryEvent::from_bytes(delivery.payload()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed retry payload");
                delivery.ack().await?;
                metrics::counter!("retry_dropped_total", "queue" => queue, "reason" => "malformed")
                    .increment(1);
                return Ok(Settlement::Dropped);
            }
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.replayer.replay(&mut event, self.queue).await {
                Ok(()) => {
                    delivery.ack().await?;
                    metrics::counter!("retry_acked_total", "queue" => queue).increment(1);
                    tracing::info!(
                        reservation_id = %event.reservation_id,
                        step = %event.resume_at,
                        attempt,
                        "Retry event settled"
                    );
                    return Ok(Settlement::Completed);
                }
                Err(e) if retry_in_place(&e) => {
                    metrics::counter!("retry_backoffs_total", "queue" => queue).increment(1);
                    tracing::warn!(
                        error = %e,
                        reservation_id = %event.reservation_id,
                        attempt,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "Replay failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.backoff) => {}
                        _ = shutdown.recv() => return Ok(Settlement::Interrupted),
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        reservation_id = %event.reservation_id,
                        username = %event.username,
                        step = %event.resume_at,
                        "Dropping retry event after permanent failure; manual follow-up required"
                    );
                    delivery.ack().await?;
                    metrics::counter!("retry_dropped_total", "queue" => queue, "reason" => "permanent")
                        .increment(1);
                    return Ok(Settlement::Dropped);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{InMemoryTransport, RetryTransport};
    use crate::services::Dependency;
    use crate::shutdown::Shutdown;
    use chrono::NaiveDate;
    use common::{BookCondition, ReservationId};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replayer that answers from a script, then succeeds.
    #[derive(Default)]
    struct ScriptedReplayer {
        script: Mutex<VecDeque<Result<(), SagaError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedReplayer {
        fn with(script: Vec<Result<(), SagaError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl StepReplayer for ScriptedReplayer {
        async fn replay(
            &self,
            _event: &mut RetryEvent,
            _queue: RetryQueue,
        ) -> Result<(), SagaError> {
            *self.calls.lock().unwrap() += 1;
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn payload() -> Vec<u8> {
        RetryEvent::new(
            "alice",
            ReservationId::new(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            BookCondition::Good,
        )
        .to_bytes()
        .unwrap()
    }

    async fn next_delivery(transport: &InMemoryTransport, payload: Vec<u8>) -> Delivery {
        transport
            .publish(RetryQueue::Catalog, payload)
            .await
            .unwrap();
        let mut stream = transport.subscribe(RetryQueue::Catalog).await.unwrap();
        stream.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_success_acks_once() {
        let transport = InMemoryTransport::new();
        let replayer = ScriptedReplayer::with(vec![]);
        let worker = RetryWorker::new(RetryQueue::Catalog, replayer.clone(), Duration::from_secs(10));
        let shutdown = Shutdown::new();

        let delivery = next_delivery(&transport, payload()).await;
        let settled = worker.handle(delivery, &mut shutdown.subscribe()).await.unwrap();

        assert_eq!(settled, Settlement::Completed);
        assert_eq!(transport.acked(RetryQueue::Catalog), 1);
        assert_eq!(replayer.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let transport = InMemoryTransport::new();
        let replayer = ScriptedReplayer::with(vec![]);
        let worker = RetryWorker::new(RetryQueue::Catalog, replayer.clone(), Duration::from_secs(10));
        let shutdown = Shutdown::new();

        let delivery = next_delivery(&transport, b"{\"username\":".to_vec()).await;
        let settled = worker.handle(delivery, &mut shutdown.subscribe()).await.unwrap();

        assert_eq!(settled, Settlement::Dropped);
        assert_eq!(transport.acked(RetryQueue::Catalog), 1);
        assert_eq!(replayer.calls(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dropped() {
        let transport = InMemoryTransport::new();
        let replayer = ScriptedReplayer::with(vec![Err(SagaError::Downstream {
            dependency: Dependency::Catalog,
            status: 400,
            message: "bad request".to_string(),
        })]);
        let worker = RetryWorker::new(RetryQueue::Catalog, replayer.clone(), Duration::from_secs(10));
        let shutdown = Shutdown::new();

        let delivery = next_delivery(&transport, payload()).await;
        let settled = worker.handle(delivery, &mut shutdown.subscribe()).await.unwrap();

        assert_eq!(settled, Settlement::Dropped);
        assert_eq!(transport.acked(RetryQueue::Catalog), 1);
        assert_eq!(replayer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_replay_backs_off_and_retries() {
        let transport = InMemoryTransport::new();
        let replayer = ScriptedReplayer::with(vec![
            Err(SagaError::ServiceUnavailable(Dependency::Catalog)),
            Err(SagaError::ServiceUnavailable(Dependency::Catalog)),
        ]);
        let worker = RetryWorker::new(RetryQueue::Catalog, replayer.clone(), Duration::from_secs(10));
        let shutdown = Shutdown::new();

        let delivery = next_delivery(&transport, payload()).await;
        let started = tokio::time::Instant::now();
        let settled = worker.handle(delivery, &mut shutdown.subscribe()).await.unwrap();

        assert_eq!(settled, Settlement::Completed);
        assert_eq!(replayer.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(transport.acked(RetryQueue::Catalog), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_leaves_message_queued() {
        let transport = InMemoryTransport::new();
        let replayer = ScriptedReplayer::with(vec![Err(SagaError::ServiceUnavailable(
            Dependency::Catalog,
        ))]);
        let worker = RetryWorker::new(RetryQueue::Catalog, replayer, Duration::from_secs(10));
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let delivery = next_delivery(&transport, payload()).await;
        let settled = worker.handle(delivery, &mut shutdown.subscribe()).await.unwrap();

        assert_eq!(settled, Settlement::Interrupted);
        assert_eq!(transport.acked(RetryQueue::Catalog), 0);
        assert_eq!(transport.ready(RetryQueue::Catalog), 1);
    }

    #[tokio::test]
    async fn test_run_processes_in_order_until_shutdown() {
        let transport = InMemoryTransport::new();
        let replayer = ScriptedReplayer::with(vec![]);
        let worker = RetryWorker::new(RetryQueue::Catalog, replayer.clone(), Duration::from_secs(10));
        for _ in 0..3 {
            transport
                .publish(RetryQueue::Catalog, payload())
                .await
                .unwrap();
        }

        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        let stream = transport.subscribe(RetryQueue::Catalog).await.unwrap();
        let handle = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(stream, &mut signal).await })
        };

        while transport.acked(RetryQueue::Catalog) < 3 {
            tokio::task::yield_now().await;
        }
        shutdown.trigger();

        let exit = handle.await.unwrap().unwrap();
        assert_eq!(exit, WorkerExit::Shutdown);
        assert_eq!(replayer.calls(), 3);
    }
}
