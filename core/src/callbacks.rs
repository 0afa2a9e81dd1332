//! Callback system for circuit breaker state transitions

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

/// Fired on Closed -> Open and HalfOpen -> Open with the call that tripped it
pub type OnOpenedFn<T, E> = Arc<dyn Fn(&str, Duration, &Result<T, E>) + Send + Sync>;
/// Fired on HalfOpen -> Closed (with the trial outcome) and on manual reset (`None`)
pub type OnClosedFn<T, E> = Arc<dyn Fn(&str, Option<&Result<T, E>>) + Send + Sync>;
/// Fired on Open -> HalfOpen
pub type OnHalfOpenFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks for circuit breaker events
pub struct Callbacks<T, E> {
    pub on_opened: Option<OnOpenedFn<T, E>>,
    pub on_closed: Option<OnClosedFn<T, E>>,
    pub on_half_open: Option<OnHalfOpenFn>,
}

impl<T, E> Callbacks<T, E> {
    pub fn new() -> Self {
        Self {
            on_opened: None,
            on_closed: None,
            on_half_open: None,
        }
    }

    pub fn trigger_opened(&self, circuit: &str, break_duration: Duration, outcome: &Result<T, E>) {
        if let Some(ref callback) = self.on_opened {
            guarded(circuit, "on_opened", || callback(circuit, break_duration, outcome));
        }
    }

    pub fn trigger_closed(&self, circuit: &str, outcome: Option<&Result<T, E>>) {
        if let Some(ref callback) = self.on_closed {
            guarded(circuit, "on_closed", || callback(circuit, outcome));
        }
    }

    pub fn trigger_half_open(&self, circuit: &str) {
        if let Some(ref callback) = self.on_half_open {
            guarded(circuit, "on_half_open", || callback(circuit));
        }
    }
}

// A panicking callback is the caller's bug; the breaker keeps going.
fn guarded(circuit: &str, name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(circuit, callback = name, "circuit breaker callback panicked");
    }
}

impl<T, E> Clone for Callbacks<T, E> {
    fn clone(&self) -> Self {
        Self {
            on_opened: self.on_opened.clone(),
            on_closed: self.on_closed.clone(),
            on_half_open: self.on_half_open.clone(),
        }
    }
}

impl<T, E> Default for Callbacks<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> std::fmt::Debug for Callbacks<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_opened", &self.on_opened.is_some())
            .field("on_closed", &self.on_closed.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
