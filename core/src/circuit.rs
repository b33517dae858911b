//! Circuit breaker implementation using state machines
//!
//! The open/closed lifecycle lives in a `state-machines` dynamic machine guarded
//! by a single mutex, so opening, closing and moving the probe deadline are each
//! one critical section. The error count sits in a shared atomic ledger that
//! closed-state calls update without taking the lock.

use crate::{
    callbacks::Callbacks,
    classifier::{FailureClassifier, FailureContext},
    clock::{Clock, SystemClock},
    errors::CircuitError,
    executor::{self, TransitionHook},
    ledger::{DEFAULT_OPEN_THRESHOLD, ErrorLedger},
    probe_gate::{ProbeGate, ProbePermit},
    task::{Response, Task},
};
use parking_lot::Mutex;
use state_machines::state_machine;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cooldown used when none is configured
pub const DEFAULT_COOLDOWN_SECS: u64 = 5;

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Error count at which the circuit opens
    /// Values <= 0 are replaced by the default of 50
    pub open_threshold: i64,

    /// Seconds to wait after opening before a call may probe
    pub cooldown_secs: u64,

    /// Jitter factor for the cooldown (0.0 = exact cooldown, 1.0 = full jitter)
    /// Uses chrono-machines formula: cooldown * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,

    /// Cap on probes in flight once the cooldown has elapsed
    /// None (or 0) lets every caller probe
    pub max_concurrent_probes: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            open_threshold: DEFAULT_OPEN_THRESHOLD as i64,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            jitter_factor: 0.0,
            max_concurrent_probes: None,
        }
    }
}

/// Circuit breaker context - shared data across all states
#[derive(Debug, Clone, Default)]
pub struct CircuitContext {
    pub name: String,
    pub ledger: Arc<ErrorLedger>,
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    /// Earliest monotonic time at which a call may probe
    pub next_probe_at: f64,
}

state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
    ],
    events {
        trip {
            guards: [threshold_reached],
            transition: { from: Closed, to: Open }
        }
        close {
            transition: { from: Open, to: Closed }
        }
    }
}

impl Circuit<Closed> {
    /// Check if the error count has reached the open threshold
    fn threshold_reached(&self, ctx: &CircuitContext) -> bool {
        ctx.ledger.threshold_reached()
    }
}

/// What a single call is allowed to do
enum Dispatch {
    /// Skip the task and hand back its fallback
    ShortCircuit,
    /// Closed circuit, run normally
    Normal,
    /// Cooldown elapsed, run as a recovery probe
    Probe(Option<ProbePermit>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookMode {
    Normal,
    Probe,
}

/// Transition hook bound to one breaker and one dispatch mode
struct BoundHook<'a> {
    breaker: &'a CircuitBreaker,
    mode: HookMode,
}

impl TransitionHook for BoundHook<'_> {
    fn on_success(&self) {
        match self.mode {
            HookMode::Normal => {
                let errors = self.breaker.context.ledger.heal();
                tracing::debug!(circuit = %self.breaker.context.name, errors, "call succeeded");
            }
            HookMode::Probe => self.breaker.close_after_probe(),
        }
    }

    fn on_error(&self, error: &dyn Any) {
        let probing = self.mode == HookMode::Probe;
        if !self.breaker.counts_as_failure(error, probing) {
            tracing::debug!(circuit = %self.breaker.context.name, "error ignored by classifier");
            return;
        }

        match self.mode {
            HookMode::Normal => {
                let errors = self.breaker.context.ledger.record_error();
                tracing::debug!(circuit = %self.breaker.context.name, errors, "call failed");
            }
            HookMode::Probe => self.breaker.reopen_after_probe(),
        }
    }
}

/// Circuit breaker public API
///
/// All methods take `&self`; share one breaker between threads with `Arc`.
pub struct CircuitBreaker {
    machine: Mutex<DynamicCircuit>,
    context: CircuitContext,
    clock: Arc<dyn Clock>,
    cooldown_secs: AtomicU64,
    jitter_factor: f64,
    probe_gate: Option<Arc<ProbeGate>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBreaker {
    /// Create a new circuit breaker on the system clock (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        Self::assemble(
            name.into(),
            config,
            Arc::new(SystemClock::new()),
            None,
            Callbacks::new(),
        )
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    pub(crate) fn assemble(
        name: String,
        config: Config,
        clock: Arc<dyn Clock>,
        failure_classifier: Option<Arc<dyn FailureClassifier>>,
        callbacks: Callbacks,
    ) -> Self {
        let context = CircuitContext {
            name,
            ledger: Arc::new(ErrorLedger::new(config.open_threshold)),
        };
        let machine = DynamicCircuit::new(context.clone());

        Self {
            machine: Mutex::new(machine),
            context,
            clock,
            cooldown_secs: AtomicU64::new(config.cooldown_secs),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
            probe_gate: config
                .max_concurrent_probes
                .filter(|limit| *limit > 0)
                .map(|limit| Arc::new(ProbeGate::new(limit))),
            failure_classifier,
            callbacks,
        }
    }

    /// Execute a task with circuit breaker protection
    ///
    /// Returns the task's value, or its fallback when the circuit is open or
    /// `run` failed. Only a failing fallback produces an error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use fallback_breaker::{CircuitBreaker, FnTask};
    ///
    /// let circuit = CircuitBreaker::builder("quotes").open_threshold(3).build();
    ///
    /// let price = circuit.execute(FnTask::new(
    ///     || Err::<u32, _>("upstream timeout"),
    ///     || Ok(0),
    /// ));
    /// assert_eq!(price.unwrap(), 0);
    /// assert_eq!(circuit.error_count(), 1);
    /// ```
    pub fn execute<K: Task>(&self, task: K) -> Result<K::Output, CircuitError<K::Error>> {
        self.call(task).map(Response::into_value)
    }

    /// Like [`execute`](Self::execute), but rejects a missing task
    ///
    /// `None` fails with [`CircuitError::InvalidArgument`] before any state changes.
    pub fn try_execute<K: Task>(
        &self,
        task: Option<K>,
    ) -> Result<K::Output, CircuitError<K::Error>> {
        match task {
            Some(task) => self.execute(task),
            None => Err(CircuitError::InvalidArgument {
                circuit: self.context.name.clone(),
            }),
        }
    }

    /// Execute a task and return the tagged [`Response`]
    pub fn call<K: Task>(&self, mut task: K) -> Result<Response<K::Output>, CircuitError<K::Error>> {
        tracing::trace!(
            circuit = %self.context.name,
            task = std::any::type_name::<K>(),
            "executing task"
        );

        let result = match self.dispatch() {
            Dispatch::ShortCircuit => {
                tracing::trace!(circuit = %self.context.name, "circuit open, returning fallback");
                executor::direct_fallback(&mut task)
            }
            Dispatch::Normal => executor::run_with_hook(
                &mut task,
                &BoundHook {
                    breaker: self,
                    mode: HookMode::Normal,
                },
            ),
            Dispatch::Probe(_permit) => executor::run_with_hook(
                &mut task,
                &BoundHook {
                    breaker: self,
                    mode: HookMode::Probe,
                },
            ),
        };

        result.map_err(|source| {
            tracing::warn!(circuit = %self.context.name, "fallback failed");
            CircuitError::Fallback {
                circuit: self.context.name.clone(),
                source,
            }
        })
    }

    /// Open if the threshold is reached, then decide how this call proceeds
    fn dispatch(&self) -> Dispatch {
        let mut opened = false;

        let dispatch = {
            let mut machine = self.machine.lock();
            let now = self.clock.monotonic_time();

            if machine.current_state() == "Closed" && machine.handle(CircuitEvent::Trip).is_ok() {
                let next_probe_at = now + self.cooldown_window();
                if let Some(data) = machine.open_data_mut() {
                    data.next_probe_at = next_probe_at;
                }
                opened = true;
                tracing::info!(
                    circuit = %self.context.name,
                    errors = self.context.ledger.errors(),
                    opened_at = now,
                    next_probe_at,
                    "circuit opened"
                );
            }

            match machine.open_data() {
                Some(data) if now < data.next_probe_at => Dispatch::ShortCircuit,
                Some(_) => match &self.probe_gate {
                    None => Dispatch::Probe(None),
                    Some(gate) => match gate.try_admit() {
                        Some(permit) => Dispatch::Probe(Some(permit)),
                        None => Dispatch::ShortCircuit,
                    },
                },
                None => Dispatch::Normal,
            }
        };

        if opened {
            self.callbacks.trigger_open(&self.context.name);
        }
        if let Dispatch::Probe(_) = dispatch {
            tracing::info!(circuit = %self.context.name, "cooldown elapsed, probing");
            self.callbacks.trigger_probe(&self.context.name);
        }

        dispatch
    }

    /// Cooldown length for the next open period, jittered if configured
    fn cooldown_window(&self) -> f64 {
        let cooldown_secs = self.cooldown_secs.load(Ordering::Acquire);

        if self.jitter_factor > 0.0 {
            let cooldown_ms = cooldown_secs.saturating_mul(1000);
            let policy = chrono_machines::Policy {
                max_attempts: 1,
                base_delay_ms: cooldown_ms,
                multiplier: 1.0,
                max_delay_ms: cooldown_ms,
            };
            let delay_ms = policy.calculate_delay(1, self.jitter_factor);
            (delay_ms as f64) / 1000.0
        } else {
            cooldown_secs as f64
        }
    }

    fn counts_as_failure(&self, error: &dyn Any, probing: bool) -> bool {
        match &self.failure_classifier {
            Some(classifier) => classifier.should_trip(&FailureContext {
                circuit_name: &self.context.name,
                error,
                probing,
            }),
            None => true,
        }
    }

    /// A probe succeeded: close the circuit and heal one error
    fn close_after_probe(&self) {
        let (closed, errors) = {
            let mut machine = self.machine.lock();
            let closed =
                machine.current_state() == "Open" && machine.handle(CircuitEvent::Close).is_ok();
            (closed, self.context.ledger.heal())
        };

        if closed {
            tracing::info!(circuit = %self.context.name, errors, "probe succeeded, circuit closed");
            self.callbacks.trigger_close(&self.context.name);
        } else {
            tracing::debug!(circuit = %self.context.name, errors, "probe succeeded, circuit already closed");
        }
    }

    /// A probe failed: count it and restart the cooldown
    fn reopen_after_probe(&self) {
        let mut machine = self.machine.lock();
        let now = self.clock.monotonic_time();
        let errors = self.context.ledger.record_error();

        match machine.open_data_mut() {
            Some(data) => {
                data.next_probe_at = now + self.cooldown_window();
                tracing::info!(
                    circuit = %self.context.name,
                    errors,
                    next_probe_at = data.next_probe_at,
                    "probe failed, circuit stays open"
                );
            }
            None => {
                tracing::debug!(circuit = %self.context.name, errors, "probe failed after circuit closed");
            }
        }
    }

    /// Current error count
    pub fn error_count(&self) -> u64 {
        self.context.ledger.errors()
    }

    /// Check if circuit is open
    pub fn is_open(&self) -> bool {
        self.machine.lock().current_state() == "Open"
    }

    /// Check if circuit is closed
    pub fn is_closed(&self) -> bool {
        self.machine.lock().current_state() == "Closed"
    }

    /// Get current state name
    pub fn state_name(&self) -> &'static str {
        self.machine.lock().current_state()
    }

    /// Earliest time a probe may run, while open
    pub fn next_probe_at(&self) -> Option<f64> {
        self.machine.lock().open_data().map(|d| d.next_probe_at)
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn open_threshold(&self) -> u64 {
        self.context.ledger.threshold()
    }

    /// Change the open threshold; values <= 0 restore the default of 50
    pub fn set_open_threshold(&self, threshold: i64) {
        self.context.ledger.set_threshold(threshold);
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs.load(Ordering::Acquire)
    }

    /// Change the cooldown; takes effect on the next open or failed probe
    pub fn set_cooldown_secs(&self, seconds: u64) {
        self.cooldown_secs.store(seconds, Ordering::Release);
    }

    /// Clear the error count and return to Closed
    pub fn reset(&self) {
        let mut machine = self.machine.lock();
        self.context.ledger.clear();
        *machine = DynamicCircuit::new(self.context.clone());
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state_name())
            .field("errors", &self.error_count())
            .field("open_threshold", &self.open_threshold())
            .field("cooldown_secs", &self.cooldown_secs())
            .field("clock", &self.clock)
            .field("probe_gate", &self.probe_gate)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use crate::task::{FnTask, Outcome};
    use std::cell::RefCell;
    use std::sync::OnceLock;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Task that counts `run` invocations and fails on demand
    struct ScriptedTask {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ScriptedTask {
        fn failing() -> Self {
            Self {
                runs: Arc::new(AtomicUsize::new(0)),
                fail: true,
            }
        }

        fn succeeding() -> Self {
            Self {
                runs: Arc::new(AtomicUsize::new(0)),
                fail: false,
            }
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    impl Task for ScriptedTask {
        type Output = &'static str;
        type Error = &'static str;

        fn run(&mut self) -> Result<&'static str, &'static str> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail { Err("test failure") } else { Ok("success") }
        }

        fn fallback(&mut self) -> Result<&'static str, &'static str> {
            Ok("fallback")
        }
    }

    fn manual_breaker(threshold: i64, cooldown_secs: u64) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let circuit = CircuitBreaker::builder("test")
            .open_threshold(threshold)
            .cooldown_secs(cooldown_secs)
            .clock(clock.clone())
            .build();
        (circuit, clock)
    }

    fn open_with_failures(circuit: &CircuitBreaker, count: usize) {
        let mut task = ScriptedTask::failing();
        for _ in 0..count {
            circuit.execute(&mut task).unwrap();
        }
    }

    #[test]
    fn test_circuit_breaker_creation() {
        let circuit = CircuitBreaker::new("test", Config::default());

        assert!(circuit.is_closed());
        assert!(!circuit.is_open());
        assert_eq!(circuit.error_count(), 0);
        assert_eq!(circuit.open_threshold(), 50);
        assert_eq!(circuit.cooldown_secs(), 5);
        assert_eq!(circuit.next_probe_at(), None);
    }

    #[test]
    fn test_success_leaves_zero_errors() {
        let (circuit, _clock) = manual_breaker(10, 30);
        let mut task = ScriptedTask::succeeding();

        assert_eq!(circuit.execute(&mut task).unwrap(), "success");
        assert_eq!(circuit.error_count(), 0);
    }

    #[test]
    fn test_fallback_on_error() {
        let (circuit, _clock) = manual_breaker(10, 30);
        let mut task = ScriptedTask::failing();

        let response = circuit.call(&mut task).unwrap();

        assert_eq!(response.outcome(), Outcome::Fallback);
        assert_eq!(response.into_value(), "fallback");
        assert_eq!(circuit.error_count(), 1);
    }

    #[test]
    fn test_open_after_ten_errors() {
        let (circuit, _clock) = manual_breaker(10, 30);
        let mut task = ScriptedTask::failing();

        for _ in 0..10 {
            assert_eq!(circuit.execute(&mut task).unwrap(), "fallback");
        }
        assert!(circuit.is_closed(), "opening is evaluated on the next call");

        assert_eq!(circuit.execute(&mut task).unwrap(), "fallback");

        assert!(circuit.is_open());
        assert_eq!(task.runs(), 10);
        assert_eq!(circuit.error_count(), 10);
    }

    #[test]
    fn test_closed_after_cooldown() {
        let (circuit, clock) = manual_breaker(10, 30);
        open_with_failures(&circuit, 11);
        assert!(circuit.is_open());

        clock.advance(Duration::from_secs(31));
        let mut task = ScriptedTask::succeeding();

        for _ in 0..4 {
            assert_eq!(circuit.execute(&mut task).unwrap(), "success");
        }
        assert!(circuit.is_closed());
        assert_eq!(task.runs(), 4);
        assert_eq!(circuit.error_count(), 6);
    }

    #[test]
    fn test_open_circuit_short_circuits_without_bookkeeping() {
        let (circuit, clock) = manual_breaker(3, 30);
        open_with_failures(&circuit, 4);
        let deadline = circuit.next_probe_at();
        assert_eq!(deadline, Some(30.0));

        clock.advance(Duration::from_secs(29));
        let mut task = ScriptedTask::succeeding();
        for _ in 0..25 {
            let response = circuit.call(&mut task).unwrap();
            assert_eq!(response.outcome(), Outcome::Fallback);
        }

        assert_eq!(task.runs(), 0);
        assert_eq!(circuit.error_count(), 3);
        assert_eq!(circuit.next_probe_at(), deadline);
        assert!(circuit.is_open());
    }

    #[test]
    fn test_failed_probe_restarts_cooldown() {
        let (circuit, clock) = manual_breaker(3, 30);
        open_with_failures(&circuit, 4);

        clock.advance(Duration::from_secs(31));
        let mut failing = ScriptedTask::failing();
        assert_eq!(circuit.execute(&mut failing).unwrap(), "fallback");

        assert_eq!(failing.runs(), 1);
        assert!(circuit.is_open());
        assert_eq!(circuit.error_count(), 4);
        assert_eq!(circuit.next_probe_at(), Some(61.0));

        clock.advance(Duration::from_secs(10));
        let mut succeeding = ScriptedTask::succeeding();
        assert_eq!(circuit.execute(&mut succeeding).unwrap(), "fallback");
        assert_eq!(succeeding.runs(), 0);

        clock.advance(Duration::from_secs(20));
        assert_eq!(circuit.execute(&mut succeeding).unwrap(), "success");
        assert_eq!(succeeding.runs(), 1);
        assert!(circuit.is_closed());
        assert_eq!(circuit.error_count(), 3);
    }

    #[test]
    fn test_recovery_leaves_errors_just_below_threshold() {
        let (circuit, clock) = manual_breaker(5, 10);
        open_with_failures(&circuit, 6);

        clock.advance(Duration::from_secs(10));
        circuit.execute(ScriptedTask::succeeding()).unwrap();
        assert!(circuit.is_closed());
        assert_eq!(circuit.error_count(), 4);

        // One more failure is enough to reopen on the following call
        circuit.execute(ScriptedTask::failing()).unwrap();
        let mut task = ScriptedTask::succeeding();
        assert_eq!(circuit.execute(&mut task).unwrap(), "fallback");
        assert!(circuit.is_open());
        assert_eq!(task.runs(), 0);
    }

    #[test]
    fn test_error_count_saturates_at_zero() {
        let (circuit, _clock) = manual_breaker(100, 30);
        let script = [
            (false, 0),
            (true, 1),
            (false, 0),
            (false, 0),
            (true, 1),
            (true, 2),
            (true, 3),
            (false, 2),
            (false, 1),
            (false, 0),
            (false, 0),
        ];

        for (fail, expected) in script {
            let task = if fail {
                ScriptedTask::failing()
            } else {
                ScriptedTask::succeeding()
            };
            circuit.execute(task).unwrap();
            assert_eq!(circuit.error_count(), expected);
        }
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_non_positive_threshold_resets_to_default() {
        let (circuit, _clock) = manual_breaker(10, 30);
        assert_eq!(circuit.open_threshold(), 10);

        circuit.set_open_threshold(0);
        assert_eq!(circuit.open_threshold(), 50);

        circuit.set_open_threshold(7);
        circuit.set_open_threshold(-4);
        assert_eq!(circuit.open_threshold(), 50);

        let circuit = CircuitBreaker::builder("test").open_threshold(-1).build();
        assert_eq!(circuit.open_threshold(), 50);
    }

    #[test]
    fn test_cooldown_change_applies_on_next_open() {
        let (circuit, clock) = manual_breaker(2, 30);
        open_with_failures(&circuit, 3);
        assert_eq!(circuit.next_probe_at(), Some(30.0));

        circuit.set_cooldown_secs(5);
        assert_eq!(circuit.next_probe_at(), Some(30.0));

        clock.advance(Duration::from_secs(30));
        circuit.execute(ScriptedTask::failing()).unwrap();
        assert_eq!(circuit.next_probe_at(), Some(35.0));
    }

    #[test]
    fn test_zero_cooldown_probes_on_opening_call() {
        let (circuit, _clock) = manual_breaker(1, 0);
        circuit.execute(ScriptedTask::failing()).unwrap();

        let mut task = ScriptedTask::succeeding();
        assert_eq!(circuit.execute(&mut task).unwrap(), "success");
        assert_eq!(task.runs(), 1);
        assert!(circuit.is_closed());
        assert_eq!(circuit.error_count(), 0);
    }

    #[test]
    fn test_fallback_error_propagation() {
        let (circuit, _clock) = manual_breaker(10, 30);

        let result = circuit.execute(FnTask::new(
            || Err::<String, _>("primary down"),
            || Err("fallback down"),
        ));

        match result {
            Err(CircuitError::Fallback { circuit: name, source }) => {
                assert_eq!(name, "test");
                assert_eq!(source, "fallback down");
            }
            other => panic!("Expected CircuitError::Fallback, got: {:?}", other),
        }
        assert_eq!(circuit.error_count(), 1, "error is counted before fallback runs");
    }

    #[test]
    fn test_fallback_error_when_open() {
        let (circuit, _clock) = manual_breaker(1, 30);
        open_with_failures(&circuit, 2);
        assert!(circuit.is_open());

        let result = circuit.execute(FnTask::new(
            || Ok::<String, _>("should not execute".to_string()),
            || Err("fallback down"),
        ));

        assert!(matches!(result, Err(CircuitError::Fallback { .. })));
        assert_eq!(circuit.error_count(), 1);
    }

    #[test]
    fn test_missing_task_is_invalid_argument() {
        let (circuit, _clock) = manual_breaker(10, 30);

        let result = circuit.try_execute(None::<ScriptedTask>);

        assert!(matches!(
            result,
            Err(CircuitError::InvalidArgument { circuit: ref name }) if name == "test"
        ));
        assert_eq!(circuit.error_count(), 0);
        assert!(circuit.is_closed());

        let value = circuit.try_execute(Some(ScriptedTask::succeeding()));
        assert_eq!(value.unwrap(), "success");
    }

    #[test]
    fn test_transition_callbacks() {
        let opened = Arc::new(AtomicUsize::new(0));
        let probed = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::new());

        let (o, p, c) = (opened.clone(), probed.clone(), closed.clone());
        let circuit = CircuitBreaker::builder("payments")
            .open_threshold(2)
            .cooldown_secs(10)
            .clock(clock.clone())
            .on_open(move |name| {
                assert_eq!(name, "payments");
                o.fetch_add(1, Ordering::SeqCst);
            })
            .on_probe(move |_| {
                p.fetch_add(1, Ordering::SeqCst);
            })
            .on_close(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        open_with_failures(&circuit, 3);
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(10));
        circuit.execute(ScriptedTask::failing()).unwrap();
        clock.advance(Duration::from_secs(10));
        circuit.execute(ScriptedTask::succeeding()).unwrap();

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(probed.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_query_breaker() {
        let seen_open = Arc::new(AtomicUsize::new(0));
        let slot: Arc<OnceLock<Arc<CircuitBreaker>>> = Arc::new(OnceLock::new());

        let (seen, lookup) = (seen_open.clone(), slot.clone());
        let circuit = Arc::new(
            CircuitBreaker::builder("test")
                .open_threshold(1)
                .on_open(move |_| {
                    if lookup.get().is_some_and(|c| c.is_open()) {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .build(),
        );
        slot.set(circuit.clone()).unwrap();

        open_with_failures(&circuit, 2);
        assert_eq!(seen_open.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_probes_unbounded_by_default() {
        let (circuit, clock) = manual_breaker(1, 10);
        open_with_failures(&circuit, 2);
        clock.advance(Duration::from_secs(10));

        let inner = RefCell::new(None);
        circuit
            .execute(FnTask::new(
                || {
                    let value = circuit
                        .execute(FnTask::new(|| Ok::<_, &str>("inner"), || Ok("inner fallback")))
                        .unwrap();
                    *inner.borrow_mut() = Some(value);
                    Ok::<_, &str>("outer")
                },
                || Ok("outer fallback"),
            ))
            .unwrap();

        assert_eq!(*inner.borrow(), Some("inner"));
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_probe_gate_admits_single_probe() {
        let clock = Arc::new(ManualClock::new());
        let circuit = CircuitBreaker::builder("test")
            .open_threshold(1)
            .cooldown_secs(10)
            .max_concurrent_probes(1)
            .clock(clock.clone())
            .build();
        open_with_failures(&circuit, 2);
        clock.advance(Duration::from_secs(10));

        let inner = RefCell::new(None);
        let outer = circuit
            .execute(FnTask::new(
                || {
                    let value = circuit
                        .execute(FnTask::new(|| Ok::<_, &str>("inner"), || Ok("inner fallback")))
                        .unwrap();
                    *inner.borrow_mut() = Some(value);
                    Ok::<_, &str>("outer")
                },
                || Ok("outer fallback"),
            ))
            .unwrap();

        assert_eq!(outer, "outer");
        assert_eq!(*inner.borrow(), Some("inner fallback"));
        assert!(circuit.is_closed());
        assert_eq!(circuit.error_count(), 0);
    }

    #[test]
    fn test_failure_classifier_filters_errors() {
        use crate::classifier::PredicateClassifier;

        let classifier = Arc::new(PredicateClassifier::new(|ctx| {
            ctx.error
                .downcast_ref::<&str>()
                .map(|e| e.contains("server"))
                .unwrap_or(true)
        }));

        let circuit = CircuitBreaker::builder("test")
            .open_threshold(2)
            .failure_classifier(classifier)
            .build();

        for _ in 0..5 {
            let value = circuit
                .execute(FnTask::new(|| Err::<&str, _>("client_error"), || Ok("fallback")))
                .unwrap();
            assert_eq!(value, "fallback");
        }
        assert_eq!(circuit.error_count(), 0);

        for _ in 0..3 {
            circuit
                .execute(FnTask::new(|| Err::<&str, _>("server_error"), || Ok("fallback")))
                .unwrap();
        }
        assert!(circuit.is_open());
    }

    #[test]
    fn test_reset_clears_state() {
        let (circuit, _clock) = manual_breaker(2, 30);
        open_with_failures(&circuit, 3);
        assert!(circuit.is_open());

        circuit.reset();

        assert!(circuit.is_closed());
        assert_eq!(circuit.error_count(), 0);
        assert_eq!(circuit.execute(ScriptedTask::succeeding()).unwrap(), "success");
    }

    #[test]
    fn test_state_machine_trip_guard() {
        let ctx = CircuitContext {
            name: "test_circuit".to_string(),
            ledger: Arc::new(ErrorLedger::new(3)),
        };
        let mut circuit = DynamicCircuit::new(ctx.clone());

        let result = circuit.handle(CircuitEvent::Trip);
        assert!(result.is_err(), "Should fail guard when below threshold");

        for _ in 0..3 {
            ctx.ledger.record_error();
        }

        circuit
            .handle(CircuitEvent::Trip)
            .expect("Should open after reaching threshold");
        assert_eq!(circuit.current_state(), "Open");

        circuit
            .handle(CircuitEvent::Close)
            .expect("Should close from Open");
        assert_eq!(circuit.current_state(), "Closed");
    }

    #[test]
    fn test_jitter_shortens_cooldown_within_bounds() {
        for _ in 0..20 {
            let clock = Arc::new(ManualClock::new());
            let circuit = CircuitBreaker::builder("jitter")
                .open_threshold(1)
                .cooldown_secs(10)
                .jitter_factor(0.5)
                .clock(clock.clone())
                .build();
            open_with_failures(&circuit, 2);

            let deadline = circuit.next_probe_at().expect("circuit is open");
            assert!(
                (4.99..=10.01).contains(&deadline),
                "jittered deadline {} outside [5, 10]",
                deadline
            );
        }
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let circuit = Arc::new(
            CircuitBreaker::builder("stress")
                .open_threshold(1_000_000)
                .build(),
        );

        std::thread::scope(|s| {
            for _ in 0..8 {
                let circuit = Arc::clone(&circuit);
                s.spawn(move || {
                    for _ in 0..500 {
                        circuit.execute(ScriptedTask::failing()).unwrap();
                    }
                });
            }
        });

        assert_eq!(circuit.error_count(), 4_000);
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_under_pressure() {
        let circuit = Arc::new(
            CircuitBreaker::builder("pressure")
                .open_threshold(20)
                .cooldown_secs(0)
                .build(),
        );
        let failures = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for worker in 0..16_usize {
                let circuit = Arc::clone(&circuit);
                let failures = Arc::clone(&failures);
                s.spawn(move || {
                    for i in 0..250_usize {
                        let fail = (worker + i) % 5 < 2;
                        let mut task = ScriptedTask {
                            runs: Arc::new(AtomicUsize::new(0)),
                            fail,
                        };
                        let value = circuit.execute(&mut task).unwrap();
                        if task.runs() == 1 && fail {
                            failures.fetch_add(1, Ordering::SeqCst);
                        }
                        assert!(value == "success" || value == "fallback");
                    }
                });
            }
        });

        assert!(circuit.error_count() <= failures.load(Ordering::SeqCst) as u64);
    }
}
