//! Closure backed task.

use std::borrow::Cow;
use std::future::Future;

use async_trait::async_trait;

use super::{DEFAULT_TASK_NAME, Task};
use crate::domain::Context;

/// Wraps `F: Fn(Context) -> Fut`; every attempt calls `F` again for a fresh future.
///
/// Shared state between attempts has to be captured explicitly (e.g. an `Arc`).
#[derive(Debug)]
pub struct TaskFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> TaskFn<F> {
    pub fn new(f: F) -> Self {
        Self::named(DEFAULT_TASK_NAME, f)
    }

    pub fn named(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: Context) -> anyhow::Result<()> {
        (self.f)(ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
