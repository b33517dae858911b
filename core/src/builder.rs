//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::Callbacks,
    circuit::{CircuitBreaker, Config},
    classifier::FailureClassifier,
    clock::{Clock, SystemClock},
};
use std::sync::Arc;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            clock: None,
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Start from an existing configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the error count at which the circuit opens
    /// Values <= 0 fall back to the default of 50
    pub fn open_threshold(mut self, threshold: i64) -> Self {
        self.config.open_threshold = threshold;
        self
    }

    /// Set the cooldown in seconds before an open circuit may be probed
    pub fn cooldown_secs(mut self, seconds: u64) -> Self {
        self.config.cooldown_secs = seconds;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: cooldown * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Limit how many probes may run at once after the cooldown
    ///
    /// Without this, every caller arriving after the deadline probes the
    /// protected operation. With a limit, callers beyond it get the fallback
    /// and leave the counters untouched. A limit of 0 is ignored.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fallback_breaker::CircuitBreaker;
    ///
    /// let circuit = CircuitBreaker::builder("search")
    ///     .max_concurrent_probes(1) // classic single half-open trial
    ///     .build();
    /// assert!(circuit.is_closed());
    /// ```
    pub fn max_concurrent_probes(mut self, limit: usize) -> Self {
        self.config.max_concurrent_probes = Some(limit);
        self
    }

    /// Use a custom time source (a `ManualClock` in tests)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier to filter which errors count against the circuit
    ///
    /// Ignored errors still produce the fallback value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fallback_breaker::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Failed probes always count
    ///         ctx.probing || ctx.error.downcast_ref::<&str>() != Some(&"not found")
    ///     })))
    ///     .build();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when a call starts probing an open circuit
    pub fn on_probe<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_probe = Some(Arc::new(f));
        self
    }

    /// Set callback for when a probe closes the circuit
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));

        CircuitBreaker::assemble(
            self.name,
            self.config,
            clock,
            self.failure_classifier,
            self.callbacks,
        )
    }
}

impl std::fmt::Debug for CircuitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("failure_classifier", &self.failure_classifier)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}
