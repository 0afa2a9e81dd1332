//! ResilienceMachines - circuit breaker and retry executor
//!
//! This crate provides two fault-tolerance primitives that compose freely:
//! - A circuit breaker driven by a state machine (Closed → Open → HalfOpen,
//!   plus a manual Isolated state) that trips on failure *ratio* measured over
//!   a rolling sampling period
//! - A retry executor with constant, linear or exponential backoff, optional
//!   jitter, and cooperative cancellation of the waits between attempts
//! - A pluggable clock so both can be driven deterministically in tests
//!
//! # Example
//!
//! ```rust
//! use resilience_machines::{CircuitBreaker, RetryExecutor};
//! use std::time::Duration;
//!
//! let circuit: CircuitBreaker<&str, String> = CircuitBreaker::builder("my_service")
//!     .failure_ratio(0.5)
//!     .minimum_throughput(10)
//!     .sampling_duration(Duration::from_secs(60))
//!     .break_duration(Duration::from_secs(30))
//!     .on_opened(|name, wait, _| println!("Circuit {name} opened for {wait:?}"))
//!     .build()
//!     .expect("valid configuration");
//!
//! let retry = RetryExecutor::builder()
//!     .attempts(2)
//!     .delay(Duration::from_millis(10))
//!     .build();
//!
//! // Retry around the breaker: rejections count as failed attempts
//! let result = retry.retry_result(|| {
//!     circuit.execute(|| {
//!         // Your service call here
//!         Ok::<_, String>("success")
//!     })
//! });
//!
//! assert_eq!(result.unwrap(), "success");
//! assert!(circuit.is_closed());
//! ```

use std::fmt;

pub mod backoff;
pub mod behavior;
pub mod builder;
pub mod callbacks;
pub mod cancel;
pub mod circuit;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod retry;
pub mod time;

pub use backoff::{BackoffStrategy, Randomizer, ThreadRandomizer};
pub use builder::CircuitBuilder;
pub use cancel::{CancelCause, CancellationToken};
pub use circuit::CircuitBreaker;
pub use config::BreakerConfig;
pub use errors::{CircuitError, ConfigError, ConfigViolation, RetryError};
pub use metrics::{HealthInfo, HealthMetrics};
pub use retry::{AttemptLimit, DelayGenerator, RetryBuilder, RetryConfig, RetryExecutor};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};

/// Lifecycle state of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls flow and outcomes are sampled
    Closed,
    /// Calls are rejected until the break duration elapses
    Open,
    /// One trial call decides between Closed and Open
    HalfOpen,
    /// Forced open by hand until reset
    Isolated,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
            CircuitState::Isolated => "Isolated",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
