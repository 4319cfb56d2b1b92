//! Accumulated failure record of a task.

use std::fmt;
use std::time::{Duration, Instant};

/// Keeps track of every failed attempt of a task and reports the failure context.
///
/// - `err`: optional root cause supplied by the caller (see
///   [`TaskOptions::error`](crate::task::TaskOptions::error)), reported when all
///   retries are exhausted.
/// - `task_errs`: the error returned by each failed attempt, in order.
#[derive(Debug, Default)]
pub struct TaskError {
    err: Option<anyhow::Error>,
    attempts: u32,
    task_errs: Vec<anyhow::Error>,
    duration: Duration,
}

impl TaskError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record with a user specified root cause.
    pub fn wrap(err: impl Into<anyhow::Error>) -> Self {
        Self {
            err: Some(err.into()),
            ..Self::default()
        }
    }

    /// Record whose root cause is a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::wrap(anyhow::Error::msg(message))
    }

    /// Add the error of a failed attempt and count the attempt.
    pub fn append(&mut self, err: anyhow::Error) {
        self.attempts += 1;
        self.task_errs.push(err);
    }

    /// Set the processing duration to the time elapsed since `started`.
    pub fn since(&mut self, started: Instant) {
        self.duration = started.elapsed();
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.task_errs
    }

    pub fn last_error(&self) -> Option<&anyhow::Error> {
        self.task_errs.last()
    }

    /// The user specified root cause, if any.
    pub fn root_cause(&self) -> Option<&anyhow::Error> {
        self.err.as_ref()
    }

    /// Checks the root cause chain first, then each attempt error's chain.
    pub fn is<E>(&self) -> bool
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.find::<E>().is_some()
    }

    /// First error of type `E` found in the root cause or in any attempt error.
    pub fn find<E>(&self) -> Option<&E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.err
            .iter()
            .chain(self.task_errs.iter())
            .find_map(|err| err.chain().find_map(|cause| cause.downcast_ref::<E>()))
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.err {
            Some(err) => write!(f, "after {} attempts: {}", self.attempts, err),
            None => write!(f, "task failed after {} attempts", self.attempts),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.err
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}
