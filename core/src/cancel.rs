//! Cooperative cancellation for the retry executor
//!
//! A [`CancellationToken`] is checked before every attempt and raced against
//! every backoff wait. Cancelling never interrupts an operation that is
//! already running.

use crossbeam_channel::{Receiver, Sender, bounded, never, select};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a token is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// `cancel()` was called
    Cancelled,
    /// The token's deadline passed
    DeadlineExceeded,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Cancelled => write!(f, "operation cancelled"),
            CancelCause::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Cloneable cancellation handle; clones observe the same cancellation
///
/// ```rust
/// use resilience_machines::{CancelCause, CancellationToken};
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert_eq!(token.cause(), Some(CancelCause::Cancelled));
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Option<Arc<TokenInner>>,
}

struct TokenInner {
    cause: Mutex<Option<CancelCause>>,
    // Dropping the sender disconnects `done`, which wakes every waiter.
    trigger: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Token that can never be cancelled
    pub fn background() -> Self {
        Self { inner: None }
    }

    /// Token cancelled only by an explicit `cancel()`
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Token that is done once `timeout` has passed, or earlier on `cancel()`
    pub fn with_timeout(timeout: Duration) -> Self {
        // An unrepresentable deadline is no deadline
        Self::build(Instant::now().checked_add(timeout))
    }

    /// Token that is done at `deadline`, or earlier on `cancel()`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    fn build(deadline: Option<Instant>) -> Self {
        let (trigger, done) = bounded(0);
        Self {
            inner: Some(Arc::new(TokenInner {
                cause: Mutex::new(None),
                trigger: Mutex::new(Some(trigger)),
                done,
                deadline,
            })),
        }
    }

    /// Cancel the token. Later calls keep the first cause.
    pub fn cancel(&self) {
        if let Some(inner) = &self.inner {
            inner.finish(CancelCause::Cancelled);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Cause of cancellation, `None` while the token is live
    pub fn cause(&self) -> Option<CancelCause> {
        let inner = self.inner.as_ref()?;
        if let Some(cause) = *inner.cause.lock() {
            return Some(cause);
        }
        match inner.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                inner.finish(CancelCause::DeadlineExceeded);
                *inner.cause.lock()
            }
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.as_ref().and_then(|inner| inner.deadline)
    }

    /// Block until `timer` fires or the token is done
    ///
    /// Returns `Err(cause)` when cancellation wins the race.
    pub fn race(&self, timer: &Receiver<Instant>) -> Result<(), CancelCause> {
        let Some(inner) = &self.inner else {
            let _ = timer.recv();
            return Ok(());
        };

        let deadline = match inner.deadline {
            Some(at) => crossbeam_channel::at(at),
            None => never(),
        };

        select! {
            recv(timer) -> _ => {}
            recv(inner.done) -> _ => {}
            recv(deadline) -> _ => {}
        }

        // A ready timer and a cancellation can land together; cancellation wins.
        match self.cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }
}

impl TokenInner {
    fn finish(&self, cause: CancelCause) {
        let mut current = self.cause.lock();
        if current.is_none() {
            *current = Some(cause);
            self.trigger.lock().take();
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancellable", &self.inner.is_some())
            .field("cause", &self.cause())
            .field("deadline", &self.deadline())
            .finish()
    }
}
