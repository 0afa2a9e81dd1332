//! Time source abstraction
//!
//! Everything in this crate reads "now" and waits on timers through
//! [`TimeProvider`], so tests can drive time by hand instead of sleeping.

use crossbeam_channel::{Receiver, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the current instant and of single-fire timers
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Channel that receives exactly one instant once `duration` has passed
    fn after(&self, duration: Duration) -> Receiver<Instant>;
}

/// Wall-clock backed provider used by default
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn after(&self, duration: Duration) -> Receiver<Instant> {
        crossbeam_channel::after(duration)
    }
}

/// Manually driven provider for deterministic tests
///
/// `now()` only moves when [`advance`](ManualTimeProvider::advance) is called.
/// Timers returned by `after()` fire immediately and move the clock forward by
/// the requested duration, so a retry loop never actually sleeps. Every
/// requested duration is recorded and can be inspected with
/// [`requested_delays`](ManualTimeProvider::requested_delays).
///
/// ```rust
/// use resilience_machines::{ManualTimeProvider, TimeProvider};
/// use std::time::Duration;
///
/// let clock = ManualTimeProvider::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now() - start, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ManualTimeProvider {
    start: Instant,
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    requested: Vec<Duration>,
}

impl ManualTimeProvider {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            state: Arc::new(Mutex::new(ManualState::default())),
        }
    }

    /// Move the clock forward without waiting
    pub fn advance(&self, duration: Duration) {
        self.state.lock().elapsed += duration;
    }

    /// Total simulated time since creation
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Durations passed to `after()`, oldest first
    pub fn requested_delays(&self) -> Vec<Duration> {
        self.state.lock().requested.clone()
    }
}

impl Default for ManualTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> Instant {
        self.start + self.state.lock().elapsed
    }

    fn after(&self, duration: Duration) -> Receiver<Instant> {
        let fired_at = {
            let mut state = self.state.lock();
            state.requested.push(duration);
            state.elapsed += duration;
            self.start + state.elapsed
        };

        let (tx, rx) = bounded(1);
        // Capacity 1 and a fresh channel: this send cannot block or fail.
        let _ = tx.send(fired_at);
        rx
    }
}
