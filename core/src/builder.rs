//! Builder API for ergonomic circuit breaker configuration

use crate::{
    circuit::CircuitBreaker,
    config::BreakerConfig,
    errors::ConfigError,
    time::TimeProvider,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder<T, E> {
    name: String,
    config: BreakerConfig<T, E>,
}

impl<T, E> CircuitBuilder<T, E> {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig::default(),
        }
    }

    /// Set the failure rate threshold (0.0-1.0)
    /// Circuit opens when (failures / throughput) >= this value
    pub fn failure_ratio(mut self, ratio: f64) -> Self {
        self.config.failure_ratio = ratio;
        self
    }

    /// Set minimum number of calls in the sampling period before the ratio is evaluated
    pub fn minimum_throughput(mut self, calls: usize) -> Self {
        self.config.minimum_throughput = calls;
        self
    }

    pub fn sampling_duration(mut self, duration: Duration) -> Self {
        self.config.sampling_duration = duration;
        self
    }

    /// Set how long the circuit stays Open before a trial call
    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.config.break_duration = duration;
        self
    }

    /// Swap the clock, e.g. for a `ManualTimeProvider` in tests
    pub fn time_provider(mut self, provider: Arc<dyn TimeProvider>) -> Self {
        self.config.time_provider = provider;
        self
    }

    /// Set callback for when circuit opens
    pub fn on_opened<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Duration, &Result<T, E>) + Send + Sync + 'static,
    {
        self.config.callbacks.on_opened = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_closed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Option<&Result<T, E>>) + Send + Sync + 'static,
    {
        self.config.callbacks.on_closed = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.config.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// The configuration collected so far
    pub fn config(&self) -> &BreakerConfig<T, E> {
        &self.config
    }

    /// Build the circuit breaker, rejecting out-of-range settings
    pub fn build(self) -> Result<CircuitBreaker<T, E>, ConfigError> {
        CircuitBreaker::new(self.name, self.config)
    }
}
