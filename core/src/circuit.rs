//! Circuit breaker implementation using state machines
//!
//! The state machine (Closed, Open, HalfOpen, Isolated) and the health metrics
//! are guarded by a single mutex so every transition is decided against a
//! consistent snapshot. The lock is released while the wrapped action and the
//! lifecycle callbacks run.

use crate::{
    behavior::CircuitBehavior,
    callbacks::Callbacks,
    config::BreakerConfig,
    errors::{CircuitError, ConfigError},
    metrics::{HealthInfo, create_health_metrics},
    time::{SystemTimeProvider, TimeProvider},
};
use parking_lot::Mutex;
use state_machines::state_machine;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Circuit breaker context - shared data across all states
#[derive(Debug, Clone)]
pub struct CircuitContext {
    pub name: String,
    pub break_duration: Duration,
    pub behavior: CircuitBehavior,
    pub clock: Arc<dyn TimeProvider>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        let metrics = create_health_metrics(Duration::from_secs(30), clock.clone());
        Self {
            name: String::new(),
            break_duration: Duration::from_secs(5),
            behavior: CircuitBehavior::new(metrics, 0.1, 100),
            clock,
        }
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: Option<Instant>,
}

/// Progress of the single half-open trial call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrialStatus {
    #[default]
    Idle,
    InFlight,
    Succeeded,
    Failed,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub trial: TrialStatus,
}

// Define the circuit breaker state machine with dynamic mode
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,  // Enable dynamic mode for runtime state transitions

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
        Isolated,
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: Closed, to: Open }
        }
        attempt_reset {
            guards: [timeout_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [trial_succeeded],
            transition: { from: HalfOpen, to: Closed }
        }
        reopen {
            guards: [trial_failed],
            transition: { from: HalfOpen, to: Open }
        }
        isolate {
            transition: { from: [Closed, Open, HalfOpen], to: Isolated }
        }
    }
}

// Guards for dynamic mode - implemented on typestate machines
impl Circuit<Closed> {
    /// Throughput and failure rate both at or above their thresholds
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        ctx.behavior.is_unhealthy()
    }
}

impl Circuit<Open> {
    /// Check if the break duration has elapsed for Open -> HalfOpen
    fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
        self.state_data_open()
            .and_then(|data| data.opened_at)
            .is_none_or(|opened_at| {
                ctx.clock.now().saturating_duration_since(opened_at) >= ctx.break_duration
            })
    }
}

impl Circuit<HalfOpen> {
    fn trial_succeeded(&self, _ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .is_some_and(|data| data.trial == TrialStatus::Succeeded)
    }

    fn trial_failed(&self, _ctx: &CircuitContext) -> bool {
        self.state_data_half_open()
            .is_some_and(|data| data.trial == TrialStatus::Failed)
    }
}

fn state_of(machine: &DynamicCircuit) -> crate::CircuitState {
    match machine.current_state() {
        "Open" => crate::CircuitState::Open,
        "HalfOpen" => crate::CircuitState::HalfOpen,
        "Isolated" => crate::CircuitState::Isolated,
        _ => crate::CircuitState::Closed,
    }
}

struct Inner {
    machine: DynamicCircuit,
    // Bumped on every transition so late outcomes can tell their trial is stale
    generation: u64,
}

/// Admission granted to one call
struct Ticket {
    state: crate::CircuitState,
    generation: u64,
    half_opened: bool,
}

enum Transition {
    Opened,
    Closed,
}

/// Circuit breaker public API
///
/// Shareable across threads (`&self` everywhere); wrap it in an `Arc` to hand
/// it to several owners.
pub struct CircuitBreaker<T, E> {
    context: CircuitContext,
    callbacks: Callbacks<T, E>,
    inner: Mutex<Inner>,
}

impl<T, E> CircuitBreaker<T, E> {
    /// Create a circuit breaker from a full configuration (use builder() for a fluent API)
    pub fn new(name: impl Into<String>, config: BreakerConfig<T, E>) -> Result<Self, ConfigError> {
        let config = config.validated()?;

        let metrics = create_health_metrics(config.sampling_duration, config.time_provider.clone());
        let context = CircuitContext {
            name: name.into(),
            break_duration: config.break_duration,
            behavior: CircuitBehavior::new(metrics, config.failure_ratio, config.minimum_throughput),
            clock: config.time_provider,
        };

        let machine = DynamicCircuit::new(context.clone());

        Ok(Self {
            context,
            callbacks: config.callbacks,
            inner: Mutex::new(Inner {
                machine,
                generation: 0,
            }),
        })
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder<T, E> {
        crate::builder::CircuitBuilder::new(name)
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// The action is not invoked when the circuit is Open, Isolated, or
    /// HalfOpen with a trial already in flight.
    pub fn execute<F>(&self, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let ticket = self.admit()?;
        if ticket.half_opened {
            self.callbacks.trigger_half_open(&self.context.name);
        }

        let outcome = match catch_unwind(AssertUnwindSafe(action)) {
            Ok(outcome) => outcome,
            Err(panic) => {
                self.abandon(&ticket);
                resume_unwind(panic);
            }
        };

        match self.complete(&ticket, outcome.is_ok()) {
            Some(Transition::Opened) => {
                self.callbacks
                    .trigger_opened(&self.context.name, self.context.break_duration, &outcome);
            }
            Some(Transition::Closed) => {
                self.callbacks.trigger_closed(&self.context.name, Some(&outcome));
            }
            None => {}
        }

        outcome.map_err(CircuitError::Execution)
    }

    /// Force the circuit into Isolated; calls are rejected until `reset()`
    pub fn isolate(&self) {
        let mut inner = self.inner.lock();
        if state_of(&inner.machine) == crate::CircuitState::Isolated {
            return;
        }
        if inner.machine.handle(CircuitEvent::Isolate).is_ok() {
            inner.generation += 1;
            tracing::warn!(circuit = %self.context.name, "circuit isolated");
        }
    }

    /// Force the circuit to Closed and clear its health metrics
    pub fn reset(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            let previous = state_of(&inner.machine);
            // Recreate machine in Closed state
            inner.machine = DynamicCircuit::new(self.context.clone());
            inner.generation += 1;
            self.context.behavior.on_circuit_closed();
            previous
        };

        if previous != crate::CircuitState::Closed {
            tracing::debug!(circuit = %self.context.name, from = previous.as_str(), "circuit reset");
            self.callbacks.trigger_closed(&self.context.name, None);
        }
    }

    /// Circuit name, as passed to the callbacks
    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// How long the circuit stays Open before a trial call
    pub fn break_duration(&self) -> Duration {
        self.context.break_duration
    }

    /// Current state; an elapsed break is only acted on by the next call
    pub fn state(&self) -> crate::CircuitState {
        state_of(&self.inner.lock().machine)
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.inner.lock().machine.current_state()
    }

    /// Check if circuit is open
    pub fn is_open(&self) -> bool {
        self.state() == crate::CircuitState::Open
    }

    /// Check if circuit is closed
    pub fn is_closed(&self) -> bool {
        self.state() == crate::CircuitState::Closed
    }

    /// Check if a trial call is pending or in flight
    pub fn is_half_open(&self) -> bool {
        self.state() == crate::CircuitState::HalfOpen
    }

    /// Check if circuit was isolated by hand
    pub fn is_isolated(&self) -> bool {
        self.state() == crate::CircuitState::Isolated
    }

    /// Health snapshot of the current sampling period
    pub fn health(&self) -> HealthInfo {
        let _inner = self.inner.lock();
        self.context.behavior.health()
    }

    fn admit(&self) -> Result<Ticket, CircuitError<E>> {
        let mut inner = self.inner.lock();

        // Check for timeout-based Open -> HalfOpen transition
        let mut half_opened = false;
        if state_of(&inner.machine) == crate::CircuitState::Open
            && inner.machine.handle(CircuitEvent::AttemptReset).is_ok()
        {
            inner.generation += 1;
            half_opened = true;
            tracing::debug!(circuit = %self.context.name, "circuit half-open, admitting trial call");
        }

        let state = state_of(&inner.machine);
        match state {
            crate::CircuitState::Closed => Ok(Ticket {
                state,
                generation: inner.generation,
                half_opened,
            }),
            crate::CircuitState::Open => Err(CircuitError::Open {
                circuit: self.context.name.clone(),
                retry_after: self.retry_after(&inner.machine),
            }),
            crate::CircuitState::Isolated => Err(CircuitError::Isolated {
                circuit: self.context.name.clone(),
            }),
            crate::CircuitState::HalfOpen => {
                let generation = inner.generation;
                match inner.machine.half_open_data_mut() {
                    Some(data) if data.trial == TrialStatus::Idle => {
                        data.trial = TrialStatus::InFlight;
                        Ok(Ticket {
                            state,
                            generation,
                            half_opened,
                        })
                    }
                    _ => Err(CircuitError::HalfOpenLimitReached {
                        circuit: self.context.name.clone(),
                    }),
                }
            }
        }
    }

    fn complete(&self, ticket: &Ticket, succeeded: bool) -> Option<Transition> {
        let mut inner = self.inner.lock();
        let state = state_of(&inner.machine);
        let behavior = &self.context.behavior;

        let is_trial = ticket.state == crate::CircuitState::HalfOpen
            && ticket.generation == inner.generation
            && state == crate::CircuitState::HalfOpen;

        if is_trial {
            if let Some(data) = inner.machine.half_open_data_mut() {
                data.trial = if succeeded {
                    TrialStatus::Succeeded
                } else {
                    TrialStatus::Failed
                };
            }

            if succeeded {
                behavior.on_action_success(state);
                if inner.machine.handle(CircuitEvent::Close).is_ok() {
                    behavior.on_circuit_closed();
                    inner.generation += 1;
                    tracing::debug!(circuit = %self.context.name, "trial succeeded, circuit closed");
                    return Some(Transition::Closed);
                }
            } else {
                behavior.on_action_failure(state);
                if inner.machine.handle(CircuitEvent::Reopen).is_ok() {
                    self.mark_open(&mut inner);
                    return Some(Transition::Opened);
                }
            }
            return None;
        }

        if succeeded {
            behavior.on_action_success(state);
            None
        } else if behavior.on_action_failure(state) && inner.machine.handle(CircuitEvent::Trip).is_ok() {
            self.mark_open(&mut inner);
            Some(Transition::Opened)
        } else {
            None
        }
    }

    // A panicking trial frees the slot without counting as an outcome.
    fn abandon(&self, ticket: &Ticket) {
        let mut inner = self.inner.lock();
        if ticket.state != crate::CircuitState::HalfOpen || ticket.generation != inner.generation {
            return;
        }
        if let Some(data) = inner.machine.half_open_data_mut() {
            data.trial = TrialStatus::Idle;
        }
    }

    /// Apply Open-state bookkeeping (timestamp + generation)
    fn mark_open(&self, inner: &mut Inner) {
        if let Some(data) = inner.machine.open_data_mut() {
            data.opened_at = Some(self.context.clock.now());
        }
        inner.generation += 1;

        let health = self.context.behavior.health();
        tracing::warn!(
            circuit = %self.context.name,
            throughput = health.throughput,
            failure_rate = health.failure_rate,
            break_ms = self.context.break_duration.as_millis() as u64,
            "circuit opened"
        );
    }

    fn retry_after(&self, machine: &DynamicCircuit) -> Duration {
        machine
            .open_data()
            .and_then(|data| data.opened_at)
            .map(|opened_at| {
                let elapsed = self.context.clock.now().saturating_duration_since(opened_at);
                self.context.break_duration.saturating_sub(elapsed)
            })
            .unwrap_or_default()
    }
}

impl<T, E> std::fmt::Debug for CircuitBreaker<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state_name())
            .field("break_duration", &self.context.break_duration)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CircuitState;
    use crate::time::ManualTimeProvider;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestBreaker = CircuitBreaker<u32, &'static str>;

    fn breaker(clock: &ManualTimeProvider) -> TestBreaker {
        CircuitBreaker::builder("test")
            .failure_ratio(0.5)
            .minimum_throughput(2)
            .sampling_duration(Duration::from_secs(10))
            .break_duration(Duration::from_secs(1))
            .time_provider(Arc::new(clock.clone()))
            .build()
            .expect("valid config")
    }

    fn trip(circuit: &TestBreaker) {
        let _ = circuit.execute(|| Err("error 1"));
        let _ = circuit.execute(|| Err("error 2"));
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_breaker_creation() {
        let circuit = breaker(&ManualTimeProvider::new());

        assert!(circuit.is_closed());
        assert!(!circuit.is_open());
        assert_eq!(circuit.state_name(), "Closed");
        assert_eq!(circuit.name(), "test");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = CircuitBreaker::<(), ()>::new(
            "bad",
            BreakerConfig {
                minimum_throughput: 1,
                ..Default::default()
            },
        );

        let err = result.expect_err("throughput 1 is invalid");
        assert_eq!(err.violations.len(), 1);
    }

    #[test]
    fn test_stays_closed_below_minimum_throughput() {
        let circuit = breaker(&ManualTimeProvider::new());

        let result = circuit.execute(|| Err("error"));

        assert!(matches!(result, Err(CircuitError::Execution("error"))));
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_stays_closed_below_failure_ratio() {
        let circuit = breaker(&ManualTimeProvider::new());

        for _ in 0..3 {
            let _ = circuit.execute(|| Ok(1));
        }
        let _ = circuit.execute(|| Err("error"));

        assert!(circuit.is_closed());
        assert_eq!(circuit.health().throughput, 4);
    }

    #[test]
    fn test_circuit_opens_once_and_rejects_without_invoking() {
        let clock = ManualTimeProvider::new();
        let opened = Arc::new(AtomicUsize::new(0));
        let opened_clone = opened.clone();
        let circuit: TestBreaker = CircuitBreaker::builder("test")
            .failure_ratio(0.5)
            .minimum_throughput(2)
            .break_duration(Duration::from_secs(1))
            .time_provider(Arc::new(clock.clone()))
            .on_opened(move |name, duration, outcome| {
                assert_eq!(name, "test");
                assert_eq!(duration, Duration::from_secs(1));
                assert_eq!(outcome, &Err("error 2"));
                opened_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        trip(&circuit);
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        let invoked = AtomicUsize::new(0);
        clock.advance(Duration::from_millis(400));
        let result = circuit.execute(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });

        match result {
            Err(CircuitError::Open { circuit, retry_after }) => {
                assert_eq!(circuit, "test");
                assert_eq!(retry_after, Duration::from_millis(600));
            }
            other => panic!("expected Open rejection, got {:?}", other),
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        // Rejections do not touch metrics
        assert_eq!(circuit.health().throughput, 2);
    }

    #[test]
    fn test_concurrent_failures_trip_exactly_once() {
        let opened = Arc::new(AtomicUsize::new(0));
        let o = opened.clone();
        let circuit: TestBreaker = CircuitBreaker::builder("test")
            .failure_ratio(0.5)
            .minimum_throughput(2)
            .time_provider(Arc::new(ManualTimeProvider::new()))
            .on_opened(move |_, _, _| {
                o.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let circuit = &circuit;
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(move || {
                    for _ in 0..20 {
                        let _ = circuit.execute(|| Err("error"));
                    }
                });
            }
        });

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert!(circuit.is_open());
    }

    #[test]
    fn test_half_open_trial_success_closes_and_resets_metrics() {
        let clock = ManualTimeProvider::new();
        let half_opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let (h, c) = (half_opened.clone(), closed.clone());
        let circuit: TestBreaker = CircuitBreaker::builder("test")
            .failure_ratio(0.5)
            .minimum_throughput(2)
            .break_duration(Duration::from_secs(1))
            .time_provider(Arc::new(clock.clone()))
            .on_half_open(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            })
            .on_closed(move |_, outcome| {
                assert_eq!(outcome, Some(&Ok(7)));
                c.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        trip(&circuit);
        clock.advance(Duration::from_secs(1));

        let invoked = AtomicUsize::new(0);
        let result = circuit.execute(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        });

        assert_eq!(result.unwrap(), 7);
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(half_opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(circuit.is_closed());
        assert_eq!(circuit.health().throughput, 0);
    }

    #[test]
    fn test_half_open_trial_failure_reopens_and_restarts_timer() {
        let clock = ManualTimeProvider::new();
        let opened = Arc::new(AtomicUsize::new(0));
        let o = opened.clone();
        let circuit: TestBreaker = CircuitBreaker::builder("test")
            .failure_ratio(0.5)
            .minimum_throughput(2)
            .break_duration(Duration::from_secs(1))
            .time_provider(Arc::new(clock.clone()))
            .on_opened(move |_, _, _| {
                o.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        trip(&circuit);
        clock.advance(Duration::from_secs(2));

        let result = circuit.execute(|| Err("still down"));
        assert!(matches!(result, Err(CircuitError::Execution("still down"))));
        assert!(circuit.is_open());
        assert_eq!(opened.load(Ordering::SeqCst), 2);

        // Break restarts from the trial failure, not the original trip
        clock.advance(Duration::from_millis(999));
        assert!(matches!(circuit.execute(|| Ok(1)), Err(CircuitError::Open { .. })));

        clock.advance(Duration::from_millis(1));
        assert_eq!(circuit.execute(|| Ok(1)).unwrap(), 1);
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_isolate_blocks_until_reset() {
        let clock = ManualTimeProvider::new();
        let closed_with_none = Arc::new(AtomicUsize::new(0));
        let c = closed_with_none.clone();
        let circuit: TestBreaker = CircuitBreaker::builder("test")
            .failure_ratio(0.5)
            .minimum_throughput(2)
            .time_provider(Arc::new(clock.clone()))
            .on_closed(move |_, outcome| {
                if outcome.is_none() {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();

        circuit.isolate();
        assert!(circuit.is_isolated());

        let invoked = AtomicUsize::new(0);
        for _ in 0..3 {
            clock.advance(Duration::from_secs(60));
            let result = circuit.execute(|| {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            });
            assert!(matches!(result, Err(CircuitError::Isolated { .. })));
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        circuit.reset();
        assert!(circuit.is_closed());
        assert_eq!(closed_with_none.load(Ordering::SeqCst), 1);
        assert_eq!(circuit.execute(|| Ok(5)).unwrap(), 5);
    }

    #[test]
    fn test_isolate_from_open_and_half_open() {
        let clock = ManualTimeProvider::new();
        let circuit = breaker(&clock);

        trip(&circuit);
        circuit.isolate();
        assert!(circuit.is_isolated());

        circuit.reset();
        trip(&circuit);
        clock.advance(Duration::from_secs(1));

        let inside = circuit.execute(|| {
            // Isolation mid-trial wins over the trial outcome
            circuit.isolate();
            Ok(1)
        });
        assert_eq!(inside.unwrap(), 1);
        assert!(circuit.is_isolated());
    }

    #[test]
    fn test_isolation_records_in_flight_failures() {
        let circuit = breaker(&ManualTimeProvider::new());

        let result = circuit.execute(|| {
            circuit.isolate();
            Err("late failure")
        });

        assert!(result.is_err());
        assert!(circuit.is_isolated());
        assert_eq!(circuit.health().failure_count, 1);
    }

    #[test]
    fn test_in_flight_failure_after_trip_does_not_reopen() {
        let opened = Arc::new(AtomicUsize::new(0));
        let o = opened.clone();
        let circuit: TestBreaker = CircuitBreaker::builder("test")
            .failure_ratio(0.5)
            .minimum_throughput(2)
            .time_provider(Arc::new(ManualTimeProvider::new()))
            .on_opened(move |_, _, _| {
                o.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let result = circuit.execute(|| {
            // Breaker trips while this call is still running
            trip(&circuit);
            Err("slow failure")
        });

        assert!(result.is_err());
        assert!(circuit.is_open());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(circuit.health().failure_count, 3);
    }

    #[test]
    fn test_only_one_concurrent_trial() {
        let clock = ManualTimeProvider::new();
        let circuit = breaker(&clock);
        trip(&circuit);
        clock.advance(Duration::from_secs(1));

        let invoked = AtomicUsize::new(0);
        let (started_tx, started_rx) = bounded::<()>(0);
        let (release_tx, release_rx) = bounded::<()>(0);

        let circuit = &circuit;
        let invoked = &invoked;

        std::thread::scope(|s| {
            let trial = s.spawn(move || {
                circuit.execute(|| {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(1)
                })
            });

            started_rx.recv().unwrap();
            assert!(circuit.is_half_open());

            let rejected: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(move || {
                        circuit.execute(|| {
                            invoked.fetch_add(1, Ordering::SeqCst);
                            Ok(2)
                        })
                    })
                })
                .collect();
            for handle in rejected {
                let result = handle.join().unwrap();
                assert!(matches!(result, Err(CircuitError::HalfOpenLimitReached { .. })));
            }

            release_tx.send(()).unwrap();
            assert_eq!(trial.join().unwrap().unwrap(), 1);
        });

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_panicking_trial_frees_the_slot() {
        let clock = ManualTimeProvider::new();
        let circuit = breaker(&clock);
        trip(&circuit);
        clock.advance(Duration::from_secs(1));

        let panicked = catch_unwind(AssertUnwindSafe(|| {
            let _ = circuit.execute(|| -> Result<u32, &'static str> { panic!("trial bug") });
        }));
        assert!(panicked.is_err());
        assert!(circuit.is_half_open());

        assert_eq!(circuit.execute(|| Ok(3)).unwrap(), 3);
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_panicking_callback_does_not_break_circuit() {
        let circuit: TestBreaker = CircuitBreaker::builder("test")
            .failure_ratio(0.5)
            .minimum_throughput(2)
            .time_provider(Arc::new(ManualTimeProvider::new()))
            .on_opened(|_, _, _| panic!("callback bug"))
            .build()
            .unwrap();

        let _ = circuit.execute(|| Err("error 1"));
        let result = circuit.execute(|| Err("error 2"));

        assert!(matches!(result, Err(CircuitError::Execution("error 2"))));
        assert!(circuit.is_open());
    }

    #[test]
    fn test_reset_clears_state() {
        let circuit = breaker(&ManualTimeProvider::new());

        trip(&circuit);
        circuit.reset();

        assert!(circuit.is_closed());
        assert_eq!(circuit.health().throughput, 0);
    }

    #[test]
    fn test_reset_while_closed_skips_callback() {
        let closed = Arc::new(AtomicUsize::new(0));
        let c = closed.clone();
        let circuit: TestBreaker = CircuitBreaker::builder("test")
            .time_provider(Arc::new(ManualTimeProvider::new()))
            .on_closed(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let _ = circuit.execute(|| Err("error"));
        circuit.reset();

        assert_eq!(closed.load(Ordering::SeqCst), 0);
        assert_eq!(circuit.health().throughput, 0);
    }

    #[test]
    fn test_state_machine_closed_to_open_guard() {
        let clock: Arc<dyn TimeProvider> = Arc::new(ManualTimeProvider::new());
        let metrics = create_health_metrics(Duration::from_secs(10), clock.clone());
        let ctx = CircuitContext {
            name: "test_circuit".to_string(),
            break_duration: Duration::from_secs(1),
            behavior: CircuitBehavior::new(metrics.clone(), 0.5, 3),
            clock,
        };

        let mut circuit = DynamicCircuit::new(ctx);

        // Initially closed - trip should fail guard
        assert!(circuit.handle(CircuitEvent::Trip).is_err());

        metrics.record_failure();
        metrics.record_failure();
        metrics.record_failure();

        circuit
            .handle(CircuitEvent::Trip)
            .expect("Should open after reaching threshold");
        assert_eq!(circuit.current_state(), "Open");
    }

    #[test]
    fn test_state_machine_half_open_requires_trial_outcome() {
        let manual = ManualTimeProvider::new();
        let clock: Arc<dyn TimeProvider> = Arc::new(manual.clone());
        let metrics = create_health_metrics(Duration::from_secs(10), clock.clone());
        metrics.record_failure();
        metrics.record_failure();

        let ctx = CircuitContext {
            name: "test_circuit".to_string(),
            break_duration: Duration::from_secs(1),
            behavior: CircuitBehavior::new(metrics, 0.5, 2),
            clock: clock.clone(),
        };
        let mut circuit = DynamicCircuit::new(ctx);
        circuit.handle(CircuitEvent::Trip).expect("Should open");
        if let Some(data) = circuit.open_data_mut() {
            data.opened_at = Some(clock.now());
        }

        assert!(circuit.handle(CircuitEvent::AttemptReset).is_err());
        manual.advance(Duration::from_secs(1));
        circuit
            .handle(CircuitEvent::AttemptReset)
            .expect("Should half-open after break");
        assert_eq!(
            circuit.half_open_data().expect("HalfOpen data").trial,
            TrialStatus::Idle
        );

        assert!(circuit.handle(CircuitEvent::Close).is_err());
        assert!(circuit.handle(CircuitEvent::Reopen).is_err());

        if let Some(data) = circuit.half_open_data_mut() {
            data.trial = TrialStatus::Succeeded;
        }
        circuit.handle(CircuitEvent::Close).expect("Should close");
        assert_eq!(circuit.current_state(), "Closed");
    }
}
