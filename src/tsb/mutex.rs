//! A mutex wrapper that logs slow lock acquisitions, so production logs
//! surface lock contention before it becomes a playback stall.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub struct TracedMutex<T> {
    name: &'static str,
    warn_after: Duration,
    inner: Mutex<T>,
}

impl<T> TracedMutex<T> {
    pub fn new(name: &'static str, warn_after_ms: u64, value: T) -> Self {
        Self {
            name,
            warn_after: Duration::from_millis(warn_after_ms),
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock, logging a warning if it took longer than the
    /// configured threshold. Poisoning is treated the way the rest of this
    /// crate treats it: propagate the inner value, since a poisoned TSB
    /// mutex means a prior panic already corrupted shared state and callers
    /// cannot meaningfully recover.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let start = Instant::now();
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let waited = start.elapsed();
        if waited >= self.warn_after {
            tracing::warn!(
                mutex = self.name,
                waited_ms = waited.as_millis() as u64,
                "slow lock acquisition"
            );
        }
        guard
    }
}
