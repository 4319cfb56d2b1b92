//! TaskHandler - retry wrapper around a task.
//!
//! # Flow of one attempt
//! 1. derive the attempt context from the base context (with the timeout, if any)
//! 2. run the task
//! 3. success: log and drop the handler
//! 4. failure: record the error; while retries remain, hand the handler back to
//!    the scheduler with the next backoff delay, otherwise log the exhausted
//!    failure
//!
//! Retrying by rescheduling instead of looping keeps a worker free while the
//! handler waits out its backoff.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::{Task, TaskOptions};
use crate::domain::{Context, TaskError, TaskId};
use crate::impls::ExponentialBackoff;
use crate::ports::Backoff;
use crate::scheduler::WeakScheduler;

pub struct TaskHandler {
    id: TaskId,
    scheduler: WeakScheduler<TaskHandler>,
    task: Arc<dyn Task>,
    ctx: Context,
    attempts: u32,
    retries: u32,
    backoff: Option<Box<dyn Backoff>>,
    timeout: Option<Duration>,
    err: TaskError,
    queued_at: Instant,
}

impl TaskHandler {
    pub(crate) fn new(
        id: TaskId,
        scheduler: WeakScheduler<TaskHandler>,
        task: Arc<dyn Task>,
        opts: TaskOptions,
    ) -> Self {
        let TaskOptions {
            retries,
            backoff,
            context,
            timeout,
            error,
        } = opts;

        let backoff = match backoff {
            None if retries > 0 => Some(Box::new(ExponentialBackoff::default()) as Box<dyn Backoff>),
            backoff => backoff,
        };

        Self {
            id,
            scheduler,
            task,
            ctx: context.unwrap_or_default(),
            attempts: 0,
            retries,
            backoff,
            timeout,
            err: error.unwrap_or_default(),
            queued_at: Instant::now(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Name of the wrapped task.
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn error(&self) -> &TaskError {
        &self.err
    }

    /// Execute one attempt of the wrapped task.
    ///
    /// Never returns the task's error: failures are retried through the
    /// scheduler or, once retries are exhausted, logged.
    pub async fn exec(mut self) {
        // a zero timeout means no timeout
        let ctx = match self.timeout {
            Some(timeout) if !timeout.is_zero() => self.ctx.with_timeout(timeout),
            _ => self.ctx.with_cancel().0,
        };
        let attempt = ctx.token().clone();

        let result = self.task.run(ctx).await;

        // Only this attempt's context; the base context is left alone.
        attempt.cancel();

        match result {
            Ok(()) => {
                debug!(
                    task_id = %self.id,
                    task = self.name(),
                    duration = ?self.queued_at.elapsed(),
                    attempts = self.attempts + 1,
                    "success executing task"
                );
            }
            Err(err) => self.fail(err).await,
        }
    }

    async fn fail(mut self, err: anyhow::Error) {
        let message = err.to_string();

        self.attempts += 1;
        self.err.append(err);
        self.err.since(self.queued_at);

        if self.attempts > self.retries {
            error!(
                task_id = %self.id,
                task = self.name(),
                attempts = self.attempts,
                duration = ?self.err.duration(),
                error = %self.err,
                last_error = %message,
                "exhausted all retries for task"
            );
            return;
        }

        let delay = self
            .backoff
            .as_mut()
            .map(|backoff| backoff.next_backoff())
            .unwrap_or_default();
        let id = self.id;

        debug!(
            task_id = %id,
            task = self.name(),
            attempts = self.attempts,
            retries = self.retries,
            delay = ?delay,
            error = %message,
            "retrying the task"
        );

        let Some(scheduler) = self.scheduler.upgrade() else {
            warn!(task_id = %id, "scheduler is gone, dropping the retry");
            return;
        };

        if let Err(err) = scheduler.delay(delay, self).await {
            error!(task_id = %id, error = %err, "could not schedule the retry");
        }
    }
}

impl fmt::Debug for TaskHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandler")
            .field("id", &self.id)
            .field("task", &self.name())
            .field("attempts", &self.attempts)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for TaskHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
