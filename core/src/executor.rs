//! Execution wrapper
//!
//! Runs a task exactly once, turns a failed run into a fallback-backed
//! [`Response`], and tells the supplied hook which way it went. The wrapper
//! knows nothing about breaker internals; all bookkeeping happens in the hook.

use crate::task::{Response, Task};
use std::any::Any;

/// Outcome notifications for one execution
///
/// Exactly one of the two methods fires per call to [`run_with_hook`].
pub trait TransitionHook {
    fn on_success(&self);

    fn on_error(&self, error: &dyn Any);
}

/// Run `task` and report the outcome to `hook`
///
/// On failure the hook is notified before the fallback runs. An error from the
/// fallback itself is returned unchanged for the caller to wrap.
pub fn run_with_hook<K, H>(task: &mut K, hook: &H) -> Result<Response<K::Output>, K::Error>
where
    K: Task + ?Sized,
    H: TransitionHook + ?Sized,
{
    match task.run() {
        Ok(value) => {
            hook.on_success();
            Ok(Response::success(value))
        }
        Err(error) => {
            hook.on_error(&error);
            task.fallback().map(Response::fallback)
        }
    }
}

/// Produce the fallback without running the task or notifying anyone
pub fn direct_fallback<K>(task: &mut K) -> Result<Response<K::Output>, K::Error>
where
    K: Task + ?Sized,
{
    task.fallback().map(Response::fallback)
}
