//! Callback system for circuit breaker state transitions

use std::sync::Arc;

type TransitionFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks fired on circuit breaker transitions
///
/// Each receives the circuit name. They run after the state lock is released,
/// so a callback may query the breaker it was registered on.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<TransitionFn>,
    pub on_probe: Option<TransitionFn>,
    pub on_close: Option<TransitionFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger_open(&self, circuit: &str) {
        if let Some(ref callback) = self.on_open {
            callback(circuit);
        }
    }

    pub fn trigger_probe(&self, circuit: &str) {
        if let Some(ref callback) = self.on_probe {
            callback(circuit);
        }
    }

    pub fn trigger_close(&self, circuit: &str) {
        if let Some(ref callback) = self.on_close {
            callback(circuit);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_probe", &self.on_probe.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}
