//! Task manager configuration.
//!
//! Different processes can size their asynchronous processing resources
//! differently depending on their compute constraints. `Config` derives
//! `Deserialize` with per-field defaults so it can be embedded in a host
//! service's own configuration file.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_SIZE: usize = 64;
pub const DEFAULT_SERVICE_NAME: &str = "marionette";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Number of workers processing tasks concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of tasks buffered before `queue` applies back-pressure.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Describes the task manager in the logs.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

impl Config {
    pub fn new(workers: usize, queue_size: usize, service_name: impl Into<String>) -> Self {
        Self {
            workers,
            queue_size,
            service_name: service_name.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        if self.service_name.is_empty() {
            return Err(ConfigError::NoServiceName);
        }

        Ok(())
    }

    /// True when every field holds its zero value, i.e. the config was never filled in.
    pub fn is_zero(&self) -> bool {
        self.workers == 0 && self.queue_size == 0 && self.service_name.is_empty()
    }

    /// Replace an all-zero config with the defaults; any other config is returned as-is.
    pub fn or_defaults(self) -> Self {
        if self.is_zero() { Self::default() } else { self }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}
