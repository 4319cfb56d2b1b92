//! Backoff strategies for retrying failed tasks.
//!
//! - [`ZeroBackoff`]: retry immediately
//! - [`ConstantBackoff`]: fixed delay between attempts
//! - [`ExponentialBackoff`]: growing, randomized delay (the default when a task
//!   has retries but no explicit strategy)

use std::time::Duration;

use rand::Rng;

use crate::ports::Backoff;

#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroBackoff;

impl Backoff for ZeroBackoff {
    fn next_backoff(&mut self) -> Duration {
        Duration::ZERO
    }

    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff {
    interval: Duration,
}

impl ConstantBackoff {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Backoff for ConstantBackoff {
    fn next_backoff(&mut self) -> Duration {
        self.interval
    }

    fn reset(&mut self) {}
}

/// Exponential backoff with randomization.
///
/// Each call returns `current` randomized into
/// `[current * (1 - randomization_factor), current * (1 + randomization_factor)]`,
/// then grows `current` by `multiplier`, capped at `max_interval`.
///
/// With the defaults (500ms, x1.5, factor 0.5) the un-randomized sequence is
/// 500ms, 750ms, 1.125s, 1.6875s, ... up to 60s.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_interval: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_MULTIPLIER: f64 = 1.5;
    pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;
    pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

    pub fn new(
        initial_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
        max_interval: Duration,
    ) -> Self {
        Self {
            initial_interval,
            multiplier,
            randomization_factor: randomization_factor.clamp(0.0, 1.0),
            max_interval,
            current: initial_interval,
        }
    }

    /// Interval the next call will randomize around.
    pub fn current_interval(&self) -> Duration {
        self.current
    }

    fn randomize(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 || interval.is_zero() {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = self.randomization_factor * secs;
        let randomized = rand::thread_rng().gen_range((secs - delta)..=(secs + delta));
        Duration::from_secs_f64(randomized.max(0.0))
    }

    fn grow(&mut self) {
        let next = self.current.as_secs_f64() * self.multiplier;
        let max = self.max_interval.as_secs_f64();

        self.current = if !next.is_finite() || next >= max {
            self.max_interval
        } else {
            Duration::from_secs_f64(next.max(0.0))
        };
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_INITIAL_INTERVAL,
            Self::DEFAULT_MULTIPLIER,
            Self::DEFAULT_RANDOMIZATION_FACTOR,
            Self::DEFAULT_MAX_INTERVAL,
        )
    }
}

impl Backoff for ExponentialBackoff {
    fn next_backoff(&mut self) -> Duration {
        let delay = self.randomize(self.current);
        self.grow();
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial_interval;
    }
}
