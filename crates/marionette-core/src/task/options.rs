//! Per-submission task settings.

use std::fmt;
use std::time::Duration;

use crate::domain::{Context, TaskError};
use crate::ports::Backoff;

/// Configures how a task is executed beyond its input context: retries, backoff
/// between failed attempts, the base context and a per-attempt timeout.
///
/// ```ignore
/// let opts = TaskOptions::new()
///     .retries(3)
///     .backoff(ConstantBackoff::new(Duration::from_secs(1)))
///     .timeout(Duration::from_secs(30));
/// ```
#[derive(Default)]
pub struct TaskOptions {
    pub(crate) retries: u32,
    pub(crate) backoff: Option<Box<dyn Backoff>>,
    pub(crate) context: Option<Context>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) error: Option<TaskError>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times to retry a failed task (default 0).
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Strategy used between retries (default exponential backoff when retries > 0).
    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Some(Box::new(backoff));
        self
    }

    /// Parent context of every attempt.
    ///
    /// NOTE: prefer [`TaskOptions::timeout`] over a context with a deadline, the
    /// deadline would apply across all retries and may expire before they run.
    pub fn context(mut self, ctx: Context) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Deadline applied to each attempt separately. A zero timeout means none.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Error reported, together with every attempt error, once all retries fail.
    pub fn error(mut self, err: impl Into<anyhow::Error>) -> Self {
        self.error = Some(TaskError::wrap(err));
        self
    }

    /// Like [`TaskOptions::error`] with a plain message.
    pub fn error_msg<M>(mut self, message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error = Some(TaskError::msg(message));
        self
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("retries", &self.retries)
            .field("backoff", &self.backoff.is_some())
            .field("context", &self.context)
            .field("timeout", &self.timeout)
            .field("error", &self.error)
            .finish()
    }
}
