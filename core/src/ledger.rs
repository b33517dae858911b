//! Error accounting for a circuit breaker
//!
//! The ledger holds the running error count and the threshold at which the
//! circuit opens. Both are atomics so that closed-state bookkeeping never takes
//! the state lock, and a CAS loop keeps the count from dropping below zero.

use std::sync::atomic::{AtomicU64, Ordering};

/// Threshold used when none (or a non-positive one) is configured
pub const DEFAULT_OPEN_THRESHOLD: u64 = 50;

/// Shared error counter and open threshold
#[derive(Debug)]
pub struct ErrorLedger {
    errors: AtomicU64,
    threshold: AtomicU64,
}

impl ErrorLedger {
    /// Create an empty ledger with the given threshold
    ///
    /// Non-positive thresholds fall back to [`DEFAULT_OPEN_THRESHOLD`].
    pub fn new(threshold: i64) -> Self {
        Self {
            errors: AtomicU64::new(0),
            threshold: AtomicU64::new(normalize_threshold(threshold)),
        }
    }

    /// Current error count
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }

    /// Current open threshold
    pub fn threshold(&self) -> u64 {
        self.threshold.load(Ordering::Acquire)
    }

    /// Replace the threshold; non-positive values reset it to the default
    pub fn set_threshold(&self, threshold: i64) {
        self.threshold
            .store(normalize_threshold(threshold), Ordering::Release);
    }

    /// True once the error count has reached the threshold
    pub fn threshold_reached(&self) -> bool {
        self.errors() >= self.threshold()
    }

    /// Count one more error, returning the new total
    pub fn record_error(&self) -> u64 {
        self.errors
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1)
    }

    /// Heal one error, never going below zero, returning the new total
    pub fn heal(&self) -> u64 {
        let mut current = self.errors.load(Ordering::Acquire);

        loop {
            if current == 0 {
                return 0;
            }

            match self.errors.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current - 1,
                Err(actual) => current = actual,
            }
        }
    }

    /// Forget all recorded errors
    pub fn clear(&self) {
        self.errors.store(0, Ordering::Release);
    }
}

impl Default for ErrorLedger {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN_THRESHOLD as i64)
    }
}

/// Map a user-supplied threshold onto a valid one
pub fn normalize_threshold(threshold: i64) -> u64 {
    if threshold <= 0 {
        DEFAULT_OPEN_THRESHOLD
    } else {
        threshold as u64
    }
}
