// Fixed-window rate limiting per logical scope.
//
// A window opens on the first call for a key and resets entirely once it has passed.
// Two adjacent windows can together admit up to 2x max_requests around the boundary.

use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitConfig {
    /// Stricter scope shared by every call to the tours API.
    pub fn tours_api() -> Self {
        Self {
            max_requests: 30,
            window_ms: 60_000,
        }
    }

    pub fn general() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::tours_api()
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    count: u32,
    window_reset_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    records: DashMap<String, RateLimitRecord>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admits the call if the current window for `key` still has room.
    /// A denied call does not consume from the window.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = Instant::now();
        let window = Duration::from_millis(self.config.window_ms);

        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert(RateLimitRecord {
                count: 0,
                window_reset_at: now + window,
            });

        if now > record.window_reset_at {
            *record = RateLimitRecord {
                count: 0,
                window_reset_at: now + window,
            };
        }

        if record.count < self.config.max_requests {
            record.count += 1;
            true
        } else {
            tracing::debug!(
                key,
                limit = self.config.max_requests,
                window_ms = self.config.window_ms,
                "rate limit window exhausted"
            );
            false
        }
    }

    /// Time until the window for `key` resets. Zero for unknown keys.
    pub fn remaining_time(&self, key: &str) -> Duration {
        let now = Instant::now();
        self.records
            .get(key)
            .map(|record| record.window_reset_at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    pub fn reset(&self, key: &str) {
        self.records.remove(key);
    }
}
