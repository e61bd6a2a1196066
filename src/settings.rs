//! Engine-level settings
//!
//! These tune the task manager and its collaborators, not the matching
//! itself; matching behaviour lives in [`ReconciliationConfig`](crate::reconciliation::ReconciliationConfig).

use std::env;
use std::time::Duration;

/// Bounded exponential backoff for calls to external collaborators
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Give up once this much time has passed since the first attempt
    pub max_elapsed: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Settings of a [`TaskManager`](crate::reconciliation::TaskManager)
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Number of tasks run concurrently
    pub worker_count: usize,
    /// Tasks that may wait for a worker before `start` rejects new ones
    pub queue_capacity: usize,
    /// Timeout of a single embedding call
    pub embedding_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            embedding_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineSettings {
    /// Load settings from `RECON_*` environment variables, falling back to
    /// the defaults for anything unset or unparsable
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_count: env_parse("RECON_WORKER_COUNT")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker_count),
            queue_capacity: env_parse("RECON_QUEUE_CAPACITY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.queue_capacity),
            embedding_timeout: env_parse("RECON_EMBEDDING_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.embedding_timeout),
            retry: RetryPolicy {
                max_attempts: env_parse("RECON_RETRY_MAX_ATTEMPTS")
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.retry.max_attempts),
                initial_backoff: env_parse("RECON_RETRY_INITIAL_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.initial_backoff),
                max_elapsed: env_parse("RECON_RETRY_MAX_ELAPSED_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.max_elapsed),
                ..defaults.retry
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_reads_overrides_and_ignores_garbage() {
        env::set_var("RECON_WORKER_COUNT", "7");
        env::set_var("RECON_QUEUE_CAPACITY", "not-a-number");
        env::set_var("RECON_EMBEDDING_TIMEOUT_MS", "250");
        env::set_var("RECON_RETRY_MAX_ATTEMPTS", "0");

        let settings = EngineSettings::from_env();
        assert_eq!(settings.worker_count, 7);
        assert_eq!(settings.queue_capacity, EngineSettings::default().queue_capacity);
        assert_eq!(settings.embedding_timeout, Duration::from_millis(250));
        assert_eq!(settings.retry.max_attempts, RetryPolicy::default().max_attempts);

        env::remove_var("RECON_WORKER_COUNT");
        env::remove_var("RECON_QUEUE_CAPACITY");
        env::remove_var("RECON_EMBEDDING_TIMEOUT_MS");
        env::remove_var("RECON_RETRY_MAX_ATTEMPTS");
    }
}
