//! Tasks protected by a circuit breaker and the responses they produce

/// A unit of work guarded by a circuit breaker
///
/// `run` is the primary operation. `fallback` produces a substitute value when
/// `run` fails or the circuit is open; if it fails too, that error reaches the
/// caller.
pub trait Task {
    type Output;
    type Error: 'static;

    fn run(&mut self) -> Result<Self::Output, Self::Error>;

    fn fallback(&mut self) -> Result<Self::Output, Self::Error>;
}

impl<K: Task + ?Sized> Task for &mut K {
    type Output = K::Output;
    type Error = K::Error;

    fn run(&mut self) -> Result<Self::Output, Self::Error> {
        (**self).run()
    }

    fn fallback(&mut self) -> Result<Self::Output, Self::Error> {
        (**self).fallback()
    }
}

/// Task assembled from a pair of closures
///
/// # Example
///
/// ```rust
/// use fallback_breaker::{FnTask, Task};
///
/// let mut task = FnTask::new(
///     || Err::<&str, _>("timeout"),
///     || Ok("cached"),
/// );
/// assert_eq!(task.fallback(), Ok("cached"));
/// ```
pub struct FnTask<R, F> {
    run: R,
    fallback: F,
}

impl<R, F, T, E> FnTask<R, F>
where
    R: FnMut() -> Result<T, E>,
    F: FnMut() -> Result<T, E>,
{
    pub fn new(run: R, fallback: F) -> Self {
        Self { run, fallback }
    }
}

impl<R, F, T, E> Task for FnTask<R, F>
where
    R: FnMut() -> Result<T, E>,
    F: FnMut() -> Result<T, E>,
    E: 'static,
{
    type Output = T;
    type Error = E;

    fn run(&mut self) -> Result<T, E> {
        (self.run)()
    }

    fn fallback(&mut self) -> Result<T, E> {
        (self.fallback)()
    }
}

impl<R, F> std::fmt::Debug for FnTask<R, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask")
            .field("run", &"<closure>")
            .field("fallback", &"<closure>")
            .finish()
    }
}

/// How a response value was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `run` completed normally
    Success,
    /// The value came from `fallback`
    Fallback,
}

/// Result of one protected call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<T> {
    value: T,
    outcome: Outcome,
}

impl<T> Response<T> {
    pub fn success(value: T) -> Self {
        Self {
            value,
            outcome: Outcome::Success,
        }
    }

    pub fn fallback(value: T) -> Self {
        Self {
            value,
            outcome: Outcome::Fallback,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
