//! Retry executor with backoff, jitter and cancellation
//!
//! Runs an operation until it succeeds, the attempt limit is reached, or the
//! cancellation token finishes. Waits between attempts go through the
//! configured [`TimeProvider`] and are raced against the token, so a
//! cancellation ends a long backoff immediately. An operation that is already
//! running is never interrupted.

use crate::{
    backoff::{BackoffStrategy, Randomizer, ThreadRandomizer, apply_jitter},
    cancel::CancellationToken,
    errors::RetryError,
    time::{SystemTimeProvider, TimeProvider},
};
use std::sync::Arc;
use std::time::Duration;

/// Called after every failed attempt with the zero-based attempt index and its error
pub type OnRetryFn<E> = Arc<dyn Fn(u32, &E) + Send + Sync>;

/// How many retries follow the first attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptLimit {
    /// `n` retries, so at most `n + 1` invocations
    Limited(u32),
    /// Retry until success or cancellation
    Unlimited,
}

impl AttemptLimit {
    fn is_last(&self, attempt: u32) -> bool {
        match self {
            AttemptLimit::Limited(n) => attempt >= *n,
            AttemptLimit::Unlimited => false,
        }
    }
}

impl Default for AttemptLimit {
    fn default() -> Self {
        AttemptLimit::Limited(3)
    }
}

/// Per-attempt delay override. `None` keeps the strategy's delay.
pub trait DelayGenerator: Send + Sync {
    fn delay(&self, attempt: u32, token: &CancellationToken) -> Option<Duration>;
}

impl<F> DelayGenerator for F
where
    F: Fn(u32, &CancellationToken) -> Option<Duration> + Send + Sync,
{
    fn delay(&self, attempt: u32, token: &CancellationToken) -> Option<Duration> {
        self(attempt, token)
    }
}

/// Retry configuration
pub struct RetryConfig<E> {
    pub attempts: AttemptLimit,
    pub backoff: BackoffStrategy,
    /// Base delay fed to the backoff strategy
    pub delay: Duration,
    /// Upper bound applied after jitter
    pub max_delay: Duration,
    pub jitter: bool,
    pub randomizer: Arc<dyn Randomizer>,
    pub delay_generator: Option<Arc<dyn DelayGenerator>>,
    pub token: CancellationToken,
    pub on_retry: Option<OnRetryFn<E>>,
    pub time_provider: Arc<dyn TimeProvider>,
}

impl<E> Default for RetryConfig<E> {
    fn default() -> Self {
        Self {
            attempts: AttemptLimit::default(),
            backoff: BackoffStrategy::Constant,
            delay: Duration::ZERO,
            max_delay: Duration::from_secs(5),
            jitter: false,
            randomizer: Arc::new(ThreadRandomizer),
            delay_generator: None,
            token: CancellationToken::background(),
            on_retry: None,
            time_provider: Arc::new(SystemTimeProvider),
        }
    }
}

impl<E> Clone for RetryConfig<E> {
    fn clone(&self) -> Self {
        Self {
            attempts: self.attempts,
            backoff: self.backoff,
            delay: self.delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
            randomizer: self.randomizer.clone(),
            delay_generator: self.delay_generator.clone(),
            token: self.token.clone(),
            on_retry: self.on_retry.clone(),
            time_provider: self.time_provider.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .field("delay", &self.delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("delay_generator", &self.delay_generator.is_some())
            .field("token", &self.token)
            .field("on_retry", &self.on_retry.is_some())
            .field("time_provider", &self.time_provider)
            .finish()
    }
}

/// Runs operations under a [`RetryConfig`]
///
/// Holds no per-call state; one executor can serve many threads.
pub struct RetryExecutor<E> {
    config: RetryConfig<E>,
}

impl<E> RetryExecutor<E> {
    pub fn new(config: RetryConfig<E>) -> Self {
        Self { config }
    }

    pub fn builder() -> RetryBuilder<E> {
        RetryBuilder::new()
    }

    pub fn config(&self) -> &RetryConfig<E> {
        &self.config
    }

    /// Retry an operation that produces no value
    pub fn retry<F>(&self, operation: F) -> Result<(), RetryError<E>>
    where
        F: FnMut() -> Result<(), E>,
    {
        self.retry_result(operation)
    }

    /// Retry an operation until it returns `Ok`
    ///
    /// Errors from every failed attempt are kept, oldest first. A token that
    /// is already done means the operation is never invoked.
    pub fn retry_result<T, F>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
    {
        let config = &self.config;
        let mut errors = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            if let Some(cause) = config.token.cause() {
                tracing::warn!(attempt, %cause, "retry cancelled");
                return Err(RetryError::Cancelled { cause, errors });
            }

            let err = match operation() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if let Some(on_retry) = &config.on_retry {
                on_retry(attempt, &err);
            }
            errors.push(err);

            if config.attempts.is_last(attempt) {
                tracing::warn!(attempts = errors.len(), "retries exhausted");
                return Err(RetryError::Exhausted { errors });
            }

            let delay = self.next_delay(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "attempt failed, retrying");

            if !delay.is_zero()
                && let Err(cause) = config.token.race(&config.time_provider.after(delay))
            {
                tracing::warn!(attempt, %cause, "retry cancelled during backoff");
                return Err(RetryError::Cancelled { cause, errors });
            }

            attempt = attempt.saturating_add(1);
        }
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let config = &self.config;

        if let Some(generator) = &config.delay_generator
            && let Some(delay) = generator.delay(attempt, &config.token)
        {
            return delay;
        }

        let mut delay = config.backoff.delay(attempt, config.delay);
        if config.jitter {
            delay = apply_jitter(delay, config.randomizer.as_ref());
        }
        delay.min(config.max_delay)
    }
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self::new(self.config.clone())
    }
}

impl<E> Default for RetryExecutor<E> {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl<E> std::fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor").field("config", &self.config).finish()
    }
}

/// Builder for creating retry executors with fluent API
pub struct RetryBuilder<E> {
    config: RetryConfig<E>,
}

impl<E> RetryBuilder<E> {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    /// Number of retries after the first attempt
    pub fn attempts(mut self, retries: u32) -> Self {
        self.config.attempts = AttemptLimit::Limited(retries);
        self
    }

    pub fn unlimited_attempts(mut self) -> Self {
        self.config.attempts = AttemptLimit::Unlimited;
        self
    }

    pub fn backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.config.backoff = strategy;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.config.max_delay = max_delay;
        self
    }

    /// Spread each delay over +/- 25%
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter = enabled;
        self
    }

    pub fn randomizer(mut self, randomizer: impl Randomizer + 'static) -> Self {
        self.config.randomizer = Arc::new(randomizer);
        self
    }

    pub fn delay_generator(mut self, generator: impl DelayGenerator + 'static) -> Self {
        self.config.delay_generator = Some(Arc::new(generator));
        self
    }

    pub fn token(mut self, token: CancellationToken) -> Self {
        self.config.token = token;
        self
    }

    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, &E) + Send + Sync + 'static,
    {
        self.config.on_retry = Some(Arc::new(f));
        self
    }

    pub fn time_provider(mut self, provider: Arc<dyn TimeProvider>) -> Self {
        self.config.time_provider = provider;
        self
    }

    pub fn build(self) -> RetryExecutor<E> {
        RetryExecutor::new(self.config)
    }
}

impl<E> Default for RetryBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for RetryBuilder<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryBuilder").field("config", &self.config).finish()
    }
}
