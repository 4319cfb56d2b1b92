//! marionette-core
//!
//! In-process asynchronous task manager: a bounded queue feeding a fixed pool
//! of workers, plus a time-ordered scheduler for delayed tasks and retries.
//!
//! # Modules
//! - **app**: [`TaskManager`] and the worker pool
//! - **scheduler**: min-heap of futures and the loop releasing them when due
//! - **task**: the [`Task`] trait, closures as tasks, per-submission options
//! - **domain**: task IDs, execution [`Context`], accumulated [`TaskError`]
//! - **ports**: backoff, ID generation and clock interfaces
//! - **impls**: zero, constant and exponential backoff
//! - **config** / **error**: manager configuration and its errors
//!
//! ```ignore
//! let tm = TaskManager::new(Config::default())?;
//! tm.start().await;
//!
//! tm.queue_with(
//!     TaskFn::named("send welcome email", |ctx: Context| async move { send(ctx).await }),
//!     TaskOptions::new().retries(3).timeout(Duration::from_secs(10)),
//! )
//! .await?;
//!
//! tm.stop().await;
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod scheduler;
pub mod task;

pub use self::app::TaskManager;
pub use self::config::Config;
pub use self::domain::{Context, ContextError, TaskError, TaskId};
pub use self::error::{ConfigError, MarionetteError};
pub use self::impls::{ConstantBackoff, ExponentialBackoff, ZeroBackoff};
pub use self::ports::{Backoff, IdGenerator};
pub use self::scheduler::Scheduler;
pub use self::task::{Submission, Task, TaskFn, TaskHandler, TaskOptions};
