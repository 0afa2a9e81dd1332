//! Delay strategies between retry attempts
//!
//! A strategy turns the zero-based attempt index and the base delay into the
//! wait before the next attempt. Jitter and the max-delay clamp are applied
//! afterwards by the retry executor.

use std::time::Duration;

/// Spread applied by [`apply_jitter`]: the delay lands in `[0.75, 1.25]` of itself
pub const JITTER_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay before every retry
    #[default]
    Constant,
    /// `base * (attempt + 1)`, in whole milliseconds
    Linear,
    /// `base * 2^attempt`
    Exponential,
}

impl BackoffStrategy {
    pub fn delay(&self, attempt: u32, base: Duration) -> Duration {
        match self {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => {
                let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(u64::from(attempt) + 1))
            }
            BackoffStrategy::Exponential => exponential(attempt, base),
        }
    }
}

fn exponential(attempt: u32, base: Duration) -> Duration {
    // chrono-machines counts attempts from 1
    let step = u8::try_from(attempt.saturating_add(1)).unwrap_or(u8::MAX);
    let policy = chrono_machines::Policy {
        max_attempts: step,
        base_delay_ms: u64::try_from(base.as_millis()).unwrap_or(u64::MAX),
        multiplier: 2.0,
        // Clamping happens after jitter
        max_delay_ms: u64::MAX,
    };
    // Reuse the thread rng; plain calculate_delay seeds a fresh StdRng every call
    Duration::from_millis(policy.calculate_delay_with_rng(step, 0.0, &mut rand::rng()))
}

/// Source of uniform values in `[0, 1)` for jitter
pub trait Randomizer: Send + Sync {
    fn next_f64(&self) -> f64;
}

impl<F> Randomizer for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn next_f64(&self) -> f64 {
        self()
    }
}

/// Thread-local generator from `rand`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandomizer;

impl Randomizer for ThreadRandomizer {
    fn next_f64(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Spread `delay` uniformly over `[delay * 0.75, delay * 1.25]`
pub fn apply_jitter(delay: Duration, randomizer: &dyn Randomizer) -> Duration {
    let ms = delay.as_millis() as f64;
    let r = randomizer.next_f64().clamp(0.0, 1.0);

    let offset = ms * JITTER_FACTOR / 2.0;
    let random = ms * JITTER_FACTOR * r - offset;
    let jittered_ms = (ms + random).max(0.0);

    Duration::try_from_secs_f64(jittered_ms / 1000.0).unwrap_or(Duration::MAX)
}
