use std::env;

use serde::Deserialize;

use crate::{
    cache::CacheConfig, circuit_breaker::CircuitBreakerConfig, error::ClientError,
    monitor::MonitorConfig, rate_limiter::RateLimitConfig, retry::RetryConfig,
};

pub const BASE_URL_VAR: &str = "TOURS_API_BASE_URL";
pub const TOKEN_VAR: &str = "TOURS_API_TOKEN";
pub const TIMEOUT_VAR: &str = "TOURS_API_TIMEOUT_MS";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_token: String,
    /// Bound on each individual HTTP attempt, not on the whole retry sequence.
    pub timeout_ms: u64,
    /// Name of the guarded upstream, used by the circuit breaker.
    pub service_name: String,
    pub rate_limit_scope: String,
    pub options_ttl_seconds: u64,
    pub price_ttl_seconds: u64,
    pub retry_config: RetryConfig,
    pub circuit_breaker_config: CircuitBreakerConfig,
    pub rate_limit_config: RateLimitConfig,
    pub cache_config: CacheConfig,
    pub monitor_config: MonitorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: String::new(),
            timeout_ms: 10_000,
            service_name: "tours-api".to_string(),
            rate_limit_scope: "tours-api".to_string(),
            options_ttl_seconds: 300,
            price_ttl_seconds: 120,
            retry_config: RetryConfig::default(),
            circuit_breaker_config: CircuitBreakerConfig::default(),
            rate_limit_config: RateLimitConfig::tours_api(),
            cache_config: CacheConfig::default(),
            monitor_config: MonitorConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Reads base URL, token and optional per-attempt timeout from the process
    /// environment; everything else keeps its default.
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = env::var(BASE_URL_VAR)
            .map_err(|_| ClientError::ConfigError(format!("{BASE_URL_VAR} is not set")))?;
        let api_token = env::var(TOKEN_VAR)
            .map_err(|_| ClientError::ConfigError(format!("{TOKEN_VAR} is not set")))?;

        let mut config = Self {
            base_url,
            api_token,
            ..Self::default()
        };

        if let Ok(raw) = env::var(TIMEOUT_VAR) {
            config.timeout_ms = raw.trim().parse().map_err(|_| {
                ClientError::ConfigError(format!("{TIMEOUT_VAR} must be milliseconds, got {raw:?}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::ConfigError("base_url is empty".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ClientError::ConfigError(format!(
                "base_url must be an http(s) URL, got {}",
                self.base_url
            )));
        }
        if normalize_bearer_token(&self.api_token).is_empty() {
            return Err(ClientError::ConfigError("api_token is empty".to_string()));
        }
        if self.rate_limit_config.max_requests == 0 {
            return Err(ClientError::ConfigError(
                "rate limit must admit at least one request".to_string(),
            ));
        }
        if self.circuit_breaker_config.failure_threshold == 0 {
            return Err(ClientError::ConfigError(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Strips surrounding quotes and an existing `Bearer` prefix so the token can be
/// re-attached uniformly.
pub fn normalize_bearer_token(raw: &str) -> String {
    let unquote = |s: &str| -> String {
        s.trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_string()
    };

    let token = unquote(raw);
    let stripped = match (token.get(..6), token.get(6..)) {
        (Some(prefix), Some(rest))
            if prefix.eq_ignore_ascii_case("bearer")
                && rest.chars().next().map_or(true, char::is_whitespace) =>
        {
            rest
        }
        _ => token.as_str(),
    };
    unquote(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bearer_token() {
        assert_eq!(normalize_bearer_token("abc123"), "abc123");
        assert_eq!(normalize_bearer_token("Bearer abc123"), "abc123");
        assert_eq!(normalize_bearer_token("bearer abc123"), "abc123");
        assert_eq!(normalize_bearer_token("\"Bearer abc123\""), "abc123");
        assert_eq!(normalize_bearer_token("Bearer \"abc123\""), "abc123");
        assert_eq!(normalize_bearer_token("  'abc123'  "), "abc123");
        assert_eq!(normalize_bearer_token("\"\""), "");
    }

    #[test]
    fn test_validate() {
        let mut config = ClientConfig {
            base_url: "https://api.example.com/v1".to_string(),
            api_token: "Bearer token".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_ok());

        config.base_url = "api.example.com".to_string();
        assert!(matches!(config.validate(), Err(ClientError::ConfigError(_))));

        config.base_url = "https://api.example.com".to_string();
        config.api_token = "\"Bearer \"".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: ClientConfig = serde_json::from_str(
            r#"{
                "base_url": "https://api.example.com",
                "api_token": "t",
                "price_ttl_seconds": 180,
                "retry_config": { "max_retries": 1 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.price_ttl_seconds, 180);
        assert_eq!(config.options_ttl_seconds, 300);
        assert_eq!(config.retry_config.max_retries, 1);
        assert_eq!(config.retry_config.backoff_multiplier, 2.0);
        assert_eq!(config.rate_limit_config.max_requests, 30);
    }
}
