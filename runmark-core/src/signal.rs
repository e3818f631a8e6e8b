//! Stop Signals
//!
//! `StopSignal` is the per-run broadcast the orchestrator uses to wake every
//! monitor and writer out of its interval wait. `CancelToken` is the
//! caller-facing handle that aborts a run from another thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Lifecycle state carried by a `StopSignal`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    /// Target still running
    Armed,
    /// Target process terminated and was reaped
    TargetExited,
    /// Run aborted (cancel or timeout)
    Cancelled,
}

/// Condvar-backed broadcast shared by one run's concurrent units.
///
/// Transitions only move forward: `Armed -> TargetExited -> Cancelled` or
/// `Armed -> Cancelled`.
#[derive(Debug, Clone)]
pub struct StopSignal {
    inner: Arc<(Mutex<SignalState>, Condvar)>,
}

impl StopSignal {
    /// Create an armed signal
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(SignalState::Armed), Condvar::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance(&self, next: SignalState) {
        let mut state = self.lock();
        let rank = |s: SignalState| match s {
            SignalState::Armed => 0,
            SignalState::TargetExited => 1,
            SignalState::Cancelled => 2,
        };
        if rank(next) > rank(*state) {
            *state = next;
            self.inner.1.notify_all();
        }
    }

    /// Mark the target as exited and wake all waiters
    pub fn notify_target_exited(&self) {
        self.advance(SignalState::TargetExited);
    }

    /// Abort the run and wake all waiters
    pub fn cancel(&self) {
        self.advance(SignalState::Cancelled);
    }

    /// Current state
    pub fn state(&self) -> SignalState {
        *self.lock()
    }

    /// Whether the run was aborted
    pub fn is_cancelled(&self) -> bool {
        self.state() == SignalState::Cancelled
    }

    /// Sleep until `deadline` unless the state leaves `Armed` first.
    /// Returns the state observed on wake.
    pub fn wait_until(&self, deadline: Instant) -> SignalState {
        let mut state = self.lock();
        while *state == SignalState::Armed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            state = match self.inner.1.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *state
    }

    /// Sleep for `timeout` unless the state leaves `Armed` first
    pub fn wait_timeout(&self, timeout: Duration) -> SignalState {
        self.wait_until(Instant::now() + timeout)
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-held handle that aborts a run in progress.
///
/// Cloning shares the flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an untriggered token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
