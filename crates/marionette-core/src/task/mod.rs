//! Task API.
//!
//! - **Task**: the unit of work, async and cancellable through a [`Context`]
//! - **TaskFn**: closure backed task
//! - **TaskOptions**: retry, backoff, context and timeout settings for one submission
//! - **TaskHandler**: a task wrapped with identity and retry state
//! - **Submission**: what the task manager accepts, either a raw task or an
//!   already wrapped handler

pub mod handler;
pub mod options;
pub mod task_fn;

pub use self::handler::TaskHandler;
pub use self::options::TaskOptions;
pub use self::task_fn::TaskFn;

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Context;

pub const DEFAULT_TASK_NAME: &str = "async task";

/// Asynchronous unit of work.
///
/// A task is stateless from the manager's point of view: any state it needs is
/// owned by the implementer. Implementations should check `ctx` and return
/// promptly once it is done.
///
/// # Example
/// ```ignore
/// struct Cleanup;
///
/// #[async_trait]
/// impl Task for Cleanup {
///     async fn run(&self, ctx: Context) -> anyhow::Result<()> {
///         if let Some(err) = ctx.err() {
///             return Err(err.into());
///         }
///         // do work...
///         Ok(())
///     }
///
///     fn name(&self) -> &str {
///         "cleanup"
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    async fn run(&self, ctx: Context) -> anyhow::Result<()>;

    /// Human readable name used in logs.
    fn name(&self) -> &str {
        DEFAULT_TASK_NAME
    }
}

#[async_trait]
impl<T: Task + ?Sized> Task for Arc<T> {
    async fn run(&self, ctx: Context) -> anyhow::Result<()> {
        (**self).run(ctx).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Input of the admission API.
///
/// A raw task gets wrapped into a fresh [`TaskHandler`]; a handler passes through
/// untouched, so a handler is never wrapped twice.
pub enum Submission {
    Task(Arc<dyn Task>),
    Handler(TaskHandler),
}

impl<T: Task> From<T> for Submission {
    fn from(task: T) -> Self {
        Submission::Task(Arc::new(task))
    }
}

impl From<TaskHandler> for Submission {
    fn from(handler: TaskHandler) -> Self {
        Submission::Handler(handler)
    }
}
