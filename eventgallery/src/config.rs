//! Configuration for the post-processing dispatcher and the command executor.
//!
//! Numeric settings are `nutype` newtypes validated at construction, so a
//! `DispatcherConfig` that exists is always usable. The config derives serde
//! traits and can be loaded from any serde format; missing fields take their
//! defaults.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of dispatcher workers pulling from the trigger subscription.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 256),
    default = 1,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct WorkerCount(usize);

/// How many fetch-apply-save cycles the dispatcher attempts before giving up
/// on a gallery that keeps changing underneath it.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10),
    default = 5,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct MaxSaveAttempts(u32);

/// Capacity of the dispatcher's result and error channels.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 65_536),
    default = 16,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct QueueCapacity(usize);

/// Settings of a dispatcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of parallel workers.
    pub workers: WorkerCount,
    /// Drop results instead of publishing them. Errors are still published.
    pub discard_results: bool,
    /// Bound on the auto-save retry loop.
    pub max_save_attempts: MaxSaveAttempts,
    /// Capacity of the output channels.
    pub queue_capacity: QueueCapacity,
}

impl DispatcherConfig {
    /// Sets the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: WorkerCount) -> Self {
        self.workers = workers;
        self
    }

    /// Drops results instead of publishing them.
    #[must_use]
    pub const fn discarding_results(mut self) -> Self {
        self.discard_results = true;
        self
    }

    /// Sets the auto-save attempt bound.
    #[must_use]
    pub const fn with_max_save_attempts(mut self, attempts: MaxSaveAttempts) -> Self {
        self.max_save_attempts = attempts;
        self
    }
}

/// Retry behaviour of the [`CommandExecutor`](crate::command::CommandExecutor).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based): exponential backoff
    /// with ±25% jitter, capped at `max_delay`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base_delay_ms = self.base_delay.as_millis() as f64;
        let max_delay_ms = self.max_delay.as_millis() as f64;

        let delay =
            (base_delay_ms * self.backoff_multiplier.powi(attempt as i32)).min(max_delay_ms);
        let jitter = delay * 0.25 * (rand::rng().random::<f64>() - 0.5) * 2.0;

        Duration::from_millis((delay + jitter).clamp(0.0, max_delay_ms) as u64)
    }
}
