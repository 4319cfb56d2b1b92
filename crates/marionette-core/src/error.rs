use thiserror::Error;

/// Errors returned synchronously to callers of the task manager and scheduler.
///
/// Execution failures are never reported here: they are accumulated in a
/// [`TaskError`](crate::domain::TaskError) and surfaced through the logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarionetteError {
    #[error("the task manager is not running")]
    Stopped,

    #[error("cannot schedule a task with a zero valued timestamp")]
    Unschedulable,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Invalid [`Config`](crate::config::Config) values, detected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: at least one worker must be specified")]
    NoWorkers,

    #[error("invalid configuration: no service name specified")]
    NoServiceName,
}
