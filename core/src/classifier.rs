//! Failure classification
//!
//! A classifier decides whether a failed `run` counts against the circuit.
//! Every failure still yields the fallback value; an ignored failure simply
//! leaves the error count and the probe deadline alone.

use std::any::Any;

/// What a classifier gets to look at
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The task's error (downcast to inspect it)
    pub error: &'a dyn Any,
    /// Whether the failure happened during a recovery probe
    pub probing: bool,
}

/// Decides whether an error should count as a breaker failure
///
/// # Examples
///
/// ```rust
/// use fallback_breaker::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct IgnoreNotFound;
///
/// impl FailureClassifier for IgnoreNotFound {
///     fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
///         ctx.error.downcast_ref::<&str>() != Some(&"not found")
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// `true` to count the error, `false` to ignore it
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Counts every error
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Classifier built from a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}
