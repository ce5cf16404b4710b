//! Circuit breaker state machine.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// The state of a circuit breaker.
///
/// State transitions:
/// ```text
/// Closed ──(threshold failures in window)──► Open
///   ▲                                         │
///   │                                   (cool-down)
///   │                                         ▼
///   └──(N probe successes)── HalfOpen ──(probe failure)──► Open
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    #[default]
    Closed,

    /// Calls are rejected until the cool-down elapses.
    Open,

    /// One probe at a time is let through to test recovery.
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "Closed",
            BreakerState::Open => "Open",
            BreakerState::HalfOpen => "HalfOpen",
        }
    }

    /// Numeric encoding used for the `breaker_state` gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::Open => 1.0,
            BreakerState::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures within `failure_window` that open the breaker.
    pub failure_threshold: usize,
    /// Sliding window over which failures are counted.
    pub failure_window: Duration,
    /// Time the breaker stays open before admitting a probe.
    pub cool_down: Duration,
    /// Consecutive probe successes needed to close again.
    pub half_open_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            cool_down: Duration::from_secs(5),
            half_open_successes: 3,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    probe_started: Option<Instant>,
}

impl Inner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Circuit breaker guarding a single outbound operation class.
///
/// All state lives behind one mutex, so every transition is atomic with
/// respect to concurrent [`admit`](Self::admit), [`record_failure`](Self::record_failure)
/// and [`record_success`](Self::record_success) calls. The lock is never held
/// across an await point.
#[derive(Debug)]
pub struct Breaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl Breaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let breaker = Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::default()),
        };
        metrics::gauge!("breaker_state", "breaker" => breaker.name.clone())
            .set(BreakerState::Closed.as_gauge());
        breaker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the current state without advancing it.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Returns the number of failures inside the current window.
    pub fn failure_count(&self) -> usize {
        let mut inner = self.lock();
        inner.prune(Instant::now(), self.config.failure_window);
        inner.failures.len()
    }

    /// Decides whether a call may proceed.
    pub fn admit(&self) -> bool {
        self.admit_at(Instant::now())
    }

    /// Decides whether a call may proceed at `now`.
    ///
    /// An open breaker whose cool-down has elapsed moves to HalfOpen and admits
    /// exactly the calling probe. While a probe is outstanding every other call
    /// is rejected; a probe abandoned mid-flight frees the slot after one
    /// cool-down.
    pub fn admit_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        let admitted = match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.config.cool_down);
                if cooled {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    inner.half_open_successes = 0;
                    inner.probe_started = Some(now);
                }
                cooled
            }
            BreakerState::HalfOpen => {
                let slot_free = inner
                    .probe_started
                    .is_none_or(|at| now.saturating_duration_since(at) >= self.config.cool_down);
                if slot_free {
                    inner.probe_started = Some(now);
                }
                slot_free
            }
        };

        if !admitted {
            metrics::counter!("breaker_rejections_total", "breaker" => self.name.clone())
                .increment(1);
        }
        admitted
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Records a failed call at `now`.
    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        inner.failures.push_back(now);
        inner.prune(now, self.config.failure_window);

        if inner.state == BreakerState::HalfOpen {
            self.transition(&mut inner, BreakerState::Open);
            inner.opened_at = Some(now);
            inner.half_open_successes = 0;
            inner.probe_started = None;
        } else if inner.failures.len() >= self.config.failure_threshold {
            self.transition(&mut inner, BreakerState::Open);
            inner.opened_at = Some(now);
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        self.record_success_at(Instant::now());
    }

    /// Records a successful call at `now`.
    pub fn record_success_at(&self, now: Instant) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.probe_started = None;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_successes {
                    self.transition(&mut inner, BreakerState::Closed);
                    inner.half_open_successes = 0;
                    inner.failures.clear();
                    inner.opened_at = None;
                }
            }
            BreakerState::Closed => inner.prune(now, self.config.failure_window),
            // A call admitted before the breaker opened.
            BreakerState::Open => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        match to {
            BreakerState::Open => tracing::warn!(
                breaker = %self.name,
                %from,
                failures = inner.failures.len(),
                "circuit breaker opened"
            ),
            _ => tracing::info!(breaker = %self.name, %from, %to, "circuit breaker transition"),
        }
        metrics::gauge!("breaker_state", "breaker" => self.name.clone()).set(to.as_gauge());
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
