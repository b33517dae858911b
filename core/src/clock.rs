//! Time sources for cooldown tracking
//!
//! This module provides two clocks:
//! - `SystemClock`: monotonic time anchored at construction (immune to NTP skew)
//! - `ManualClock`: externally driven time for deterministic tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic time, in seconds, for a circuit breaker
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Seconds elapsed since the clock's own anchor point
    fn monotonic_time(&self) -> f64;
}

/// Monotonic clock backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start_time: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to
///
/// Time is kept in whole microseconds so repeated reads are exact.
///
/// # Example
///
/// ```rust
/// use fallback_breaker::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_secs(31));
/// assert_eq!(clock.monotonic_time(), 31.0);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Create a clock sitting at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(duration_to_micros(by), Ordering::AcqRel);
    }

    /// Jump to an absolute offset from time zero
    pub fn set(&self, at: Duration) {
        self.micros.store(duration_to_micros(at), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn monotonic_time(&self) -> f64 {
        self.micros.load(Ordering::Acquire) as f64 / 1_000_000.0
    }
}

fn duration_to_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
