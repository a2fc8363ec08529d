// Resilience layer for calls to the tours inventory and pricing API

pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod key;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod rate_limiter;
pub mod retry;

// Re-export key types for convenience
pub use cache::{CacheConfig, CacheStats, TtlCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::{ResilienceLayer, ToursApi, ToursApiClient};
pub use config::ClientConfig;
pub use dedup::RequestDeduplicator;
pub use error::{ApiError, ClientError, ErrorKind};
pub use key::RequestKey;
pub use models::{
    AvailableDate, DynamicPriceRequest, LabelQuantity, PriceQuote, ProductDetail, ProductOption,
    Timeslot,
};
pub use monitor::{Alert, AlertSink, CallMonitor, EndpointMetrics, HealthStatus, MonitorConfig};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::{retry_with_backoff, RetryConfig};
