//! Keeps one worker alive per retry queue.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::task::JoinHandle;

use super::RetryQueue;
use super::transport::RetryTransport;
use super::worker::{RetryWorker, StepReplayer, WorkerExit};
use crate::shutdown::{Shutdown, ShutdownSignal};

const RECONNECT_MIN_DELAY: Duration = Duration::from_millis(100);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Owns the consumer task of every retry queue.
///
/// Each task subscribes, runs a [`RetryWorker`] over the deliveries and
/// resubscribes with exponential backoff whenever the subscription fails or
/// the stream ends. Tasks exit when shutdown is triggered.
pub struct RetrySupervisor {
    transport: Arc<dyn RetryTransport>,
    replayer: Arc<dyn StepReplayer>,
    backoff: Duration,
    reconnect: ExponentialBuilder,
}

impl RetrySupervisor {
    /// `backoff` is the fixed pause between replays of an unavailable step.
    pub fn new(
        transport: Arc<dyn RetryTransport>,
        replayer: Arc<dyn StepReplayer>,
        backoff: Duration,
    ) -> Self {
        Self {
            transport,
            replayer,
            backoff,
            reconnect: ExponentialBuilder::default()
                .with_min_delay(RECONNECT_MIN_DELAY)
                .with_max_delay(RECONNECT_MAX_DELAY)
                .with_jitter(),
        }
    }

    /// Spawns one consumer task per queue.
    pub fn spawn(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        RetryQueue::ALL
            .into_iter()
            .map(|queue| {
                let worker = RetryWorker::new(queue, Arc::clone(&self.replayer), self.backoff);
                let transport = Arc::clone(&self.transport);
                let reconnect = self.reconnect;
                let signal = shutdown.subscribe();
                tokio::spawn(supervise(worker, transport, reconnect, signal))
            })
            .collect()
    }
}

async fn supervise(
    worker: RetryWorker,
    transport: Arc<dyn RetryTransport>,
    reconnect: ExponentialBuilder,
    mut shutdown: ShutdownSignal,
) {
    let queue = worker.queue();
    let mut delays = reconnect.build();

    while !shutdown.is_triggered() {
        match transport.subscribe(queue).await {
            Ok(deliveries) => {
                delays = reconnect.build();
                tracing::info!(queue = %queue, "Retry worker started");
                match worker.run(deliveries, &mut shutdown).await {
                    Ok(WorkerExit::Shutdown) => break,
                    Ok(WorkerExit::StreamEnded) => {
                        tracing::warn!(queue = %queue, "Delivery stream ended, resubscribing");
                    }
                    Err(e) => {
                        tracing::error!(queue = %queue, error = %e, "Retry worker lost its transport");
                    }
                }
            }
            Err(e) => {
                tracing::error!(queue = %queue, error = %e, "Failed to subscribe to retry queue");
            }
        }

        let delay = delays.next().unwrap_or(RECONNECT_MAX_DELAY);
        tracing::debug!(queue = %queue, backoff_ms = delay.as_millis() as u64, "Reconnecting after backoff");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.recv() => break,
        }
    }

    tracing::info!(queue = %queue, "Retry worker stopped");
}
