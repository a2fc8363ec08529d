// Retries transient upstream failures with capped exponential backoff.

use std::{future::Future, time::Duration};

use serde::Deserialize;

use crate::error::ApiError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Fraction of the delay randomized to spread retries. 0 disables jitter.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

/// Delay before retry number `retry_attempt` (starting at 1):
/// `min(initial * multiplier^attempt, max)`, then jittered if configured.
pub fn calculate_backoff(retry_attempt: u32, config: &RetryConfig) -> Duration {
    let base_backoff_ms = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powf(retry_attempt as f64))
    .min(config.max_backoff_ms as f64);

    if config.jitter_factor <= 0.0 {
        return Duration::from_millis(base_backoff_ms as u64);
    }

    let jitter = rand::random::<f64>() * config.jitter_factor * base_backoff_ms;
    let backoff_ms = base_backoff_ms * (1.0 - config.jitter_factor / 2.0) + jitter;

    Duration::from_millis(backoff_ms as u64)
}

/// Calls `f` up to `max_retries + 1` times. Non-retryable errors are returned
/// on first occurrence; once attempts run out the last error is returned as is.
pub async fn retry_with_backoff<F, Fut, T>(mut f: F, config: &RetryConfig) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let backoff = calculate_backoff(attempt, config);
                tracing::debug!(
                    attempt,
                    max_retries = config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retrying upstream call"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
