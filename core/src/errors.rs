//! Error types for circuit breaker operations
//!
//! Failures of the protected operation itself never show up here: they are
//! absorbed by substituting the task's fallback. Only problems the breaker
//! cannot recover from locally are surfaced to the caller.

use thiserror::Error;

/// Errors returned from [`CircuitBreaker::execute`](crate::CircuitBreaker::execute)
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// No task was supplied to the call
    #[error("Circuit '{circuit}' was called without a task")]
    InvalidArgument { circuit: String },
    /// The fallback path failed while producing a substitute result
    #[error("Circuit '{circuit}' fallback failed: {source}")]
    Fallback { circuit: String, source: E },
}

impl<E> CircuitError<E> {
    /// Name of the circuit that produced the error
    pub fn circuit(&self) -> &str {
        match self {
            CircuitError::InvalidArgument { circuit } | CircuitError::Fallback { circuit, .. } => {
                circuit
            }
        }
    }

    /// Consume the error and return the fallback failure, if that is what it was
    pub fn into_fallback_error(self) -> Option<E> {
        match self {
            CircuitError::Fallback { source, .. } => Some(source),
            CircuitError::InvalidArgument { .. } => None,
        }
    }
}
