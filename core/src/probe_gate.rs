//! Admission gate for recovery probes
//!
//! By default every caller that arrives after the cooldown deadline probes the
//! protected operation. Installing a gate caps how many probes may be in flight
//! at once; callers turned away by the gate receive the fallback instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counting gate limiting concurrent probes
#[derive(Debug)]
pub struct ProbeGate {
    /// Maximum number of probes in flight
    limit: usize,
    /// Probes currently in flight
    in_flight: AtomicUsize,
}

impl ProbeGate {
    /// Create a gate admitting at most `limit` concurrent probes
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "Probe limit must be greater than 0");
        Self {
            limit,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Try to admit a probe without blocking
    ///
    /// Returns `None` when `limit` probes are already running.
    pub fn try_admit(self: &Arc<Self>) -> Option<ProbePermit> {
        let mut current = self.in_flight.load(Ordering::Acquire);

        loop {
            if current >= self.limit {
                return None;
            }

            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(ProbePermit {
                        gate: Arc::clone(self),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Probes currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Maximum concurrent probes
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::Release);
    }
}

/// Admission to run one probe; released on drop, including on panic
#[derive(Debug)]
pub struct ProbePermit {
    gate: Arc<ProbeGate>,
}

impl Drop for ProbePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
