//! Decision logic between action outcomes and circuit health
//!
//! [`CircuitBehavior`] records outcomes into the health metrics and decides
//! whether a failure should open the circuit. It never changes state itself.

use crate::CircuitState;
use crate::metrics::{HealthInfo, HealthMetrics};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CircuitBehavior {
    metrics: Arc<dyn HealthMetrics>,
    failure_ratio: f64,
    minimum_throughput: usize,
}

impl CircuitBehavior {
    pub fn new(metrics: Arc<dyn HealthMetrics>, failure_ratio: f64, minimum_throughput: usize) -> Self {
        Self {
            metrics,
            failure_ratio,
            minimum_throughput,
        }
    }

    pub fn on_action_success(&self, _state: CircuitState) {
        self.metrics.record_success();
    }

    /// Record a failure; returns `true` when the circuit should open
    pub fn on_action_failure(&self, state: CircuitState) -> bool {
        match state {
            CircuitState::Closed => {
                self.metrics.record_failure();
                self.is_unhealthy()
            }
            // In-flight calls can finish after the circuit opened or was isolated
            CircuitState::Open | CircuitState::Isolated => {
                self.metrics.record_failure();
                false
            }
            // The trial outcome decides; metrics are reset on close anyway
            CircuitState::HalfOpen => false,
        }
    }

    pub fn on_circuit_closed(&self) {
        self.metrics.reset();
    }

    /// Current snapshot against the configured thresholds
    pub fn is_unhealthy(&self) -> bool {
        let info = self.metrics.snapshot();
        info.throughput >= self.minimum_throughput && info.failure_rate >= self.failure_ratio
    }

    pub fn health(&self) -> HealthInfo {
        self.metrics.snapshot()
    }
}
