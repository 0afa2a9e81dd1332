//! Error types for circuit breaker and retry operations

use crate::cancel::CancelCause;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Errors that can occur during circuit breaker operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E = Box<dyn Error + Send + Sync>> {
    /// Circuit is open, calls are being rejected until the break elapses
    #[error("Circuit '{circuit}' is open (retry after {retry_after:?})")]
    Open { circuit: String, retry_after: Duration },
    /// Circuit was isolated by hand and stays open until reset
    #[error("Circuit '{circuit}' is isolated")]
    Isolated { circuit: String },
    /// A half-open trial call is already in flight
    #[error("Circuit '{circuit}' half-open trial already in progress")]
    HalfOpenLimitReached { circuit: String },
    /// The wrapped operation failed
    #[error("Circuit execution failed: {0}")]
    Execution(#[source] E),
}

impl<E> CircuitError<E> {
    /// `true` when the call was refused without running the operation
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CircuitError::Execution(_))
    }

    /// The operation's own error, if it ran and failed
    pub fn into_execution(self) -> Option<E> {
        match self {
            CircuitError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// A single out-of-range configuration value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigViolation {
    #[error("failure ratio {0} out of range, must be between 0 and 1.0")]
    FailureRatio(f64),
    #[error("minimum throughput {0} is too low, must be at least 2")]
    MinimumThroughput(usize),
    #[error("sampling duration {0:?} is out of range, must be between 500 milliseconds and an hour")]
    SamplingDuration(Duration),
    #[error("break duration {0:?} is out of range, must be between 500 milliseconds and an hour")]
    BreakDuration(Duration),
}

/// Configuration rejected at construction time
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid circuit breaker configuration: {}", join_violations(.violations))]
pub struct ConfigError {
    pub violations: Vec<ConfigViolation>,
}

fn join_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of a retried operation, carrying every attempt's error in order
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt failed
    Exhausted { errors: Vec<E> },
    /// The cancellation token finished before the operation succeeded
    Cancelled { cause: CancelCause, errors: Vec<E> },
}

impl<E> RetryError<E> {
    /// Errors from every failed attempt, oldest first
    pub fn errors(&self) -> &[E] {
        match self {
            RetryError::Exhausted { errors } | RetryError::Cancelled { errors, .. } => errors,
        }
    }

    pub fn into_errors(self) -> Vec<E> {
        match self {
            RetryError::Exhausted { errors } | RetryError::Cancelled { errors, .. } => errors,
        }
    }

    pub fn last(&self) -> Option<&E> {
        self.errors().last()
    }

    pub fn cancel_cause(&self) -> Option<CancelCause> {
        match self {
            RetryError::Cancelled { cause, .. } => Some(*cause),
            RetryError::Exhausted { .. } => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_cause().is_some()
    }
}

// One line per attempt, then the cancellation cause if any.
impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = self.errors().iter().map(ToString::to_string).collect::<Vec<_>>();
        if let Some(cause) = self.cancel_cause() {
            lines.push(cause.to_string());
        }
        write!(f, "{}", lines.join("\n"))
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.last().map(|e| e as &(dyn Error + 'static))
    }
}
