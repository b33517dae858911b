//! fallback-breaker - circuit breaker with fallback substitution
//!
//! This crate wraps an unreliable operation so that callers always get a value:
//! - Failed calls are answered by the task's fallback and counted as errors
//! - Successful calls heal the error count one step at a time
//! - Once errors reach the threshold the circuit opens and skips the operation
//! - After a cooldown, calls probe the operation; a success closes the circuit
//!
//! # Example
//!
//! ```rust
//! use fallback_breaker::{CircuitBreaker, FnTask};
//!
//! let circuit = CircuitBreaker::builder("exchange_rates")
//!     .open_threshold(5)
//!     .cooldown_secs(30)
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build();
//!
//! let rate = circuit
//!     .execute(FnTask::new(
//!         || Err::<f64, _>("connection refused"),
//!         || Ok(1.0),
//!     ))
//!     .expect("fallback cannot fail here");
//!
//! assert_eq!(rate, 1.0);
//! assert_eq!(circuit.error_count(), 1);
//! assert!(!circuit.is_open());
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod errors;
pub mod executor;
pub mod ledger;
pub mod probe_gate;
pub mod task;

pub use builder::CircuitBuilder;
pub use circuit::{CircuitBreaker, Config, DEFAULT_COOLDOWN_SECS};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::CircuitError;
pub use executor::TransitionHook;
pub use ledger::{DEFAULT_OPEN_THRESHOLD, ErrorLedger};
pub use probe_gate::{ProbeGate, ProbePermit};
pub use task::{FnTask, Outcome, Response, Task};
