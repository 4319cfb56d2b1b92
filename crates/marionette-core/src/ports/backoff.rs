//! Backoff port - delay between retry attempts.

use std::time::Duration;

/// Strategy computing the delay before the next retry of a failed task.
///
/// A policy is owned by a single task handler and mutated once per failed
/// attempt, so implementations may keep their own attempt history.
pub trait Backoff: Send {
    /// Delay to wait before the next attempt.
    fn next_backoff(&mut self) -> Duration;

    /// Forget the attempt history.
    fn reset(&mut self);
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn next_backoff(&mut self) -> Duration {
        (**self).next_backoff()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
