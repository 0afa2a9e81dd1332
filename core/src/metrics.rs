//! Health metrics for the circuit breaker
//!
//! This module provides two interchangeable engines:
//! - `RollingMetrics`: ten sub-windows spanning the sampling duration
//! - `SingleMetrics`: one counter pair re-armed every sampling duration
//!
//! Both are internally synchronized and read time only through the injected
//! [`TimeProvider`].

use crate::time::TimeProvider;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of sub-windows the rolling engine splits the sampling duration into
pub const NUMBER_OF_WINDOWS: u32 = 10;

/// Point-in-time health summary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthInfo {
    /// Successes plus failures in the current sampling period
    pub throughput: usize,
    /// `failure_count / throughput`, 0.0 when nothing was observed
    pub failure_rate: f64,
    pub failure_count: usize,
}

impl HealthInfo {
    pub fn new(successes: usize, failures: usize) -> Self {
        let total = successes + failures;
        let failure_rate = if total == 0 {
            0.0
        } else {
            failures as f64 / total as f64
        };

        Self {
            throughput: total,
            failure_rate,
            failure_count: failures,
        }
    }
}

/// Success/failure tracking over a sampling period
pub trait HealthMetrics: Send + Sync + std::fmt::Debug {
    fn record_success(&self);

    fn record_failure(&self);

    /// Discard everything and restart the period from now
    fn reset(&self);

    fn snapshot(&self) -> HealthInfo;
}

/// Pick the engine for a sampling duration
///
/// Durations too short to split into [`NUMBER_OF_WINDOWS`] windows fall back
/// to the single-counter engine.
pub fn create_health_metrics(
    sampling_duration: Duration,
    clock: Arc<dyn TimeProvider>,
) -> Arc<dyn HealthMetrics> {
    if sampling_duration / NUMBER_OF_WINDOWS == Duration::ZERO {
        Arc::new(SingleMetrics::new(sampling_duration, clock))
    } else {
        Arc::new(RollingMetrics::new(sampling_duration, clock))
    }
}

/// Single counter pair, reset once the sampling duration has elapsed
#[derive(Debug)]
pub struct SingleMetrics {
    sampling_duration: Duration,
    clock: Arc<dyn TimeProvider>,
    state: Mutex<SingleState>,
}

#[derive(Debug)]
struct SingleState {
    successes: usize,
    failures: usize,
    started_at: Instant,
}

impl SingleMetrics {
    pub fn new(sampling_duration: Duration, clock: Arc<dyn TimeProvider>) -> Self {
        let started_at = clock.now();
        Self {
            sampling_duration,
            clock,
            state: Mutex::new(SingleState {
                successes: 0,
                failures: 0,
                started_at,
            }),
        }
    }

    fn with_current<R>(&self, f: impl FnOnce(&mut SingleState) -> R) -> R {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if now.saturating_duration_since(state.started_at) >= self.sampling_duration {
            *state = SingleState {
                successes: 0,
                failures: 0,
                started_at: now,
            };
        }
        f(&mut state)
    }
}

impl HealthMetrics for SingleMetrics {
    fn record_success(&self) {
        self.with_current(|state| state.successes += 1);
    }

    fn record_failure(&self) {
        self.with_current(|state| state.failures += 1);
    }

    fn reset(&self) {
        let now = self.clock.now();
        *self.state.lock() = SingleState {
            successes: 0,
            failures: 0,
            started_at: now,
        };
    }

    fn snapshot(&self) -> HealthInfo {
        self.with_current(|state| HealthInfo::new(state.successes, state.failures))
    }
}

/// One fixed-duration bucket of the rolling engine
#[derive(Debug, Clone, Copy)]
struct HealthWindow {
    successes: usize,
    failures: usize,
    started_at: Instant,
}

impl HealthWindow {
    fn starting_at(started_at: Instant) -> Self {
        Self {
            successes: 0,
            failures: 0,
            started_at,
        }
    }
}

/// Sliding sequence of sub-windows covering the sampling duration
///
/// The newest window sits at the back of the queue and receives all new
/// events; the front is evicted once it is a full sampling duration old.
#[derive(Debug)]
pub struct RollingMetrics {
    sampling_duration: Duration,
    window_duration: Duration,
    clock: Arc<dyn TimeProvider>,
    windows: Mutex<VecDeque<HealthWindow>>,
}

impl RollingMetrics {
    pub fn new(sampling_duration: Duration, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            sampling_duration,
            window_duration: sampling_duration / NUMBER_OF_WINDOWS,
            clock,
            windows: Mutex::new(VecDeque::with_capacity(NUMBER_OF_WINDOWS as usize + 1)),
        }
    }

    pub fn window_duration(&self) -> Duration {
        self.window_duration
    }

    /// Number of live windows, refreshed against the current time
    pub fn window_count(&self) -> usize {
        self.with_current(|windows| windows.len())
    }

    // Rotate in a fresh window if due, evict stale ones, then hand out the queue.
    // The back of the queue is always the current window when `f` runs.
    fn with_current<R>(&self, f: impl FnOnce(&mut VecDeque<HealthWindow>) -> R) -> R {
        let now = self.clock.now();
        let mut windows = self.windows.lock();

        let needs_new = windows
            .back()
            .is_none_or(|current| now.saturating_duration_since(current.started_at) >= self.window_duration);
        if needs_new {
            windows.push_back(HealthWindow::starting_at(now));
        }

        while windows
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(oldest.started_at) >= self.sampling_duration)
        {
            windows.pop_front();
        }

        f(&mut windows)
    }
}

impl HealthMetrics for RollingMetrics {
    fn record_success(&self) {
        self.with_current(|windows| {
            if let Some(current) = windows.back_mut() {
                current.successes += 1;
            }
        });
    }

    fn record_failure(&self) {
        self.with_current(|windows| {
            if let Some(current) = windows.back_mut() {
                current.failures += 1;
            }
        });
    }

    fn reset(&self) {
        self.windows.lock().clear();
    }

    fn snapshot(&self) -> HealthInfo {
        self.with_current(|windows| {
            let (successes, failures) = windows
                .iter()
                .fold((0, 0), |(s, f), w| (s + w.successes, f + w.failures));
            HealthInfo::new(successes, failures)
        })
    }
}
