//! In-memory retry transport for tests and broker-less runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::Notify;

use super::RetryQueue;
use super::transport::{Acknowledger, Delivery, DeliveryStream, RetryTransport, TransportError};

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Vec<u8>>,
    published: Vec<Vec<u8>>,
    publishes: usize,
    acked: usize,
    in_flight: usize,
}

#[derive(Debug, Default)]
struct TransportState {
    queues: HashMap<RetryQueue, QueueState>,
    fail_publishes: bool,
    failing_subscribes: usize,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<TransportState>,
    notifiers: HashMap<RetryQueue, Notify>,
    record: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, queue: RetryQueue) {
        if let Some(notify) = self.notifiers.get(&queue) {
            notify.notify_one();
        }
    }
}

/// Process-local queues with ack accounting.
///
/// Messages survive for the life of the process only. An unacknowledged
/// delivery that is dropped goes back to the front of its queue. Acked
/// payloads are released; only a [`recording`](Self::recording) transport
/// keeps a copy of everything published.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_history(false)
    }

    /// Transport that also keeps every published payload for
    /// [`published`](Self::published).
    pub fn recording() -> Self {
        Self::with_history(true)
    }

    fn with_history(record: bool) -> Self {
        let notifiers = RetryQueue::ALL
            .into_iter()
            .map(|queue| (queue, Notify::new()))
            .collect();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(TransportState::default()),
                notifiers,
                record,
            }),
        }
    }

    /// Makes publishes fail until reset.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.shared.lock().fail_publishes = fail;
    }

    /// Makes the next `times` subscribe attempts fail.
    pub fn fail_next_subscribes(&self, times: usize) {
        self.shared.lock().failing_subscribes = times;
    }

    /// Every payload published to `queue`, in order. Always empty unless the
    /// transport is recording.
    pub fn published(&self, queue: RetryQueue) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .queues
            .get(&queue)
            .map(|q| q.published.clone())
            .unwrap_or_default()
    }

    /// Total publishes across all queues.
    pub fn total_published(&self) -> usize {
        self.shared
            .lock()
            .queues
            .values()
            .map(|q| q.publishes)
            .sum()
    }

    /// Messages waiting for a consumer on `queue`.
    pub fn ready(&self, queue: RetryQueue) -> usize {
        self.shared
            .lock()
            .queues
            .get(&queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages handed to a consumer and not yet settled.
    pub fn in_flight(&self, queue: RetryQueue) -> usize {
        self.shared
            .lock()
            .queues
            .get(&queue)
            .map_or(0, |q| q.in_flight)
    }

    pub fn acked(&self, queue: RetryQueue) -> usize {
        self.shared
            .lock()
            .queues
            .get(&queue)
            .map_or(0, |q| q.acked)
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: RetryQueue,
    payload: Option<Vec<u8>>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        let mut this = self;
        this.payload = None;
        let mut state = this.shared.lock();
        let queue = state.queues.entry(this.queue).or_default();
        queue.acked += 1;
        queue.in_flight = queue.in_flight.saturating_sub(1);
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            {
                let mut state = self.shared.lock();
                let queue = state.queues.entry(self.queue).or_default();
                queue.in_flight = queue.in_flight.saturating_sub(1);
                queue.ready.push_front(payload);
            }
            self.shared.notify(self.queue);
        }
    }
}

#[async_trait]
impl RetryTransport for InMemoryTransport {
    async fn publish(&self, queue: RetryQueue, payload: Vec<u8>) -> Result<(), TransportError> {
        {
            let mut state = self.shared.lock();
            if state.fail_publishes {
                return Err(TransportError::Publish("publishing disabled".to_string()));
            }
            let q = state.queues.entry(queue).or_default();
            q.publishes += 1;
            if self.shared.record {
                q.published.push(payload.clone());
            }
            q.ready.push_back(payload);
        }
        self.shared.notify(queue);
        Ok(())
    }

    async fn subscribe(&self, queue: RetryQueue) -> Result<DeliveryStream, TransportError> {
        {
            let mut state = self.shared.lock();
            if state.failing_subscribes > 0 {
                state.failing_subscribes -= 1;
                return Err(TransportError::Subscribe(format!(
                    "cannot consume from {queue}"
                )));
            }
        }

        let shared = Arc::clone(&self.shared);
        let deliveries = stream::unfold(shared, move |shared| async move {
            loop {
                let next = {
                    let mut state = shared.lock();
                    let q = state.queues.entry(queue).or_default();
                    let payload = q.ready.pop_front();
                    if payload.is_some() {
                        q.in_flight += 1;
                    }
                    payload
                };
                if let Some(payload) = next {
                    let acker = MemoryAcker {
                        shared: Arc::clone(&shared),
                        queue,
                        payload: Some(payload.clone()),
                    };
                    let delivery = Delivery::new(payload, Box::new(acker));
                    return Some((Ok(delivery), shared));
                }
                match shared.notifiers.get(&queue) {
                    Some(notify) => notify.notified().await,
                    None => return None,
                }
            }
        });
        Ok(deliveries.boxed())
    }
}
