//! Circuit breaker configuration and validation

use crate::callbacks::Callbacks;
use crate::errors::{ConfigError, ConfigViolation};
use crate::time::{SystemTimeProvider, TimeProvider};
use std::sync::Arc;
use std::time::Duration;

pub const MIN_MINIMUM_THROUGHPUT: usize = 2;
pub const MIN_DURATION: Duration = Duration::from_millis(500);
pub const MAX_DURATION: Duration = Duration::from_secs(60 * 60);

/// Circuit breaker configuration
pub struct BreakerConfig<T, E> {
    /// Failure rate (0.0-1.0) at or above which a Closed circuit opens
    pub failure_ratio: f64,

    /// Calls that must be observed in the sampling period before the rate counts
    pub minimum_throughput: usize,

    /// Span over which health is measured
    pub sampling_duration: Duration,

    /// Cooldown spent in Open before a trial call is allowed
    pub break_duration: Duration,

    pub callbacks: Callbacks<T, E>,

    pub time_provider: Arc<dyn TimeProvider>,
}

impl<T, E> Default for BreakerConfig<T, E> {
    fn default() -> Self {
        Self {
            failure_ratio: 0.1,
            minimum_throughput: 100,
            sampling_duration: Duration::from_secs(30),
            break_duration: Duration::from_secs(5),
            callbacks: Callbacks::new(),
            time_provider: Arc::new(SystemTimeProvider),
        }
    }
}

impl<T, E> BreakerConfig<T, E> {
    /// Every out-of-range value, in field order. Empty means valid.
    pub fn validate(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();

        if !(0.0..=1.0).contains(&self.failure_ratio) {
            violations.push(ConfigViolation::FailureRatio(self.failure_ratio));
        }

        if self.minimum_throughput < MIN_MINIMUM_THROUGHPUT {
            violations.push(ConfigViolation::MinimumThroughput(self.minimum_throughput));
        }

        if !(MIN_DURATION..=MAX_DURATION).contains(&self.sampling_duration) {
            violations.push(ConfigViolation::SamplingDuration(self.sampling_duration));
        }

        if !(MIN_DURATION..=MAX_DURATION).contains(&self.break_duration) {
            violations.push(ConfigViolation::BreakDuration(self.break_duration));
        }

        violations
    }

    pub(crate) fn validated(self) -> Result<Self, ConfigError> {
        let violations = self.validate();
        if violations.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError { violations })
        }
    }
}

impl<T, E> Clone for BreakerConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            failure_ratio: self.failure_ratio,
            minimum_throughput: self.minimum_throughput,
            sampling_duration: self.sampling_duration,
            break_duration: self.break_duration,
            callbacks: self.callbacks.clone(),
            time_provider: self.time_provider.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for BreakerConfig<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("failure_ratio", &self.failure_ratio)
            .field("minimum_throughput", &self.minimum_throughput)
            .field("sampling_duration", &self.sampling_duration)
            .field("break_duration", &self.break_duration)
            .field("callbacks", &self.callbacks)
            .field("time_provider", &self.time_provider)
            .finish()
    }
}
