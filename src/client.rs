// Tours API client: every call goes through cache, deduplication, rate limiting,
// circuit breaking and retries, and is recorded by the call monitor.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{header::ACCEPT, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{task::JoinHandle, time::Instant};

use crate::{
    cache::TtlCache,
    circuit_breaker::CircuitBreaker,
    config::{normalize_bearer_token, ClientConfig},
    dedup::RequestDeduplicator,
    error::{ApiError, ClientError},
    key::RequestKey,
    models::{AvailableDate, DynamicPriceRequest, PriceQuote, ProductDetail, ProductOption},
    monitor::{AlertSink, CallMonitor, HealthStatus},
    rate_limiter::RateLimiter,
    retry::retry_with_backoff,
};

/// Operations the rest of the application uses to reach the tours API.
#[async_trait]
pub trait ToursApi: Send + Sync + 'static {
    async fn product_detail(&self, product_id: &str) -> Result<ProductDetail, ApiError>;

    async fn available_dates(
        &self,
        product_id: &str,
        start_date: NaiveDate,
    ) -> Result<Vec<AvailableDate>, ApiError>;

    async fn options_by_date(
        &self,
        product_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ProductOption>, ApiError>;

    async fn options_by_period(&self, product_id: &str) -> Result<Vec<ProductOption>, ApiError>;

    async fn price_by_date(
        &self,
        product_id: &str,
        option_code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PriceQuote, ApiError>;

    async fn price_by_period(
        &self,
        product_id: &str,
        option_code: &str,
    ) -> Result<PriceQuote, ApiError>;

    async fn dynamic_price(
        &self,
        product_id: &str,
        option_id: &str,
        request: &DynamicPriceRequest,
    ) -> Result<PriceQuote, ApiError>;
}

/// The long-lived components shared by every call site. Built once by the
/// host at startup and handed to the client.
#[derive(Clone)]
pub struct ResilienceLayer {
    pub cache: Arc<TtlCache<Value>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub deduplicator: Arc<RequestDeduplicator<Value>>,
    pub monitor: Arc<CallMonitor>,
}

impl ResilienceLayer {
    pub fn new(config: &ClientConfig) -> Self {
        Self::build(config, CallMonitor::new(config.monitor_config.clone()))
    }

    pub fn with_alert_sink(config: &ClientConfig, sink: Arc<dyn AlertSink>) -> Self {
        Self::build(
            config,
            CallMonitor::with_sink(config.monitor_config.clone(), sink),
        )
    }

    fn build(config: &ClientConfig, monitor: CallMonitor) -> Self {
        Self {
            cache: Arc::new(TtlCache::new(config.cache_config.clone())),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_config.clone())),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                config.service_name.clone(),
                config.circuit_breaker_config.clone(),
            )),
            deduplicator: Arc::new(RequestDeduplicator::new()),
            monitor: Arc::new(monitor),
        }
    }
}

/// An outbound call, owned so it can move into the deduplicated execution.
struct UpstreamRequest {
    method: Method,
    path: String,
    query: Vec<(&'static str, String)>,
    body: Option<Value>,
    check: fn(&Value) -> Result<(), ApiError>,
}

impl UpstreamRequest {
    fn get<T: DeserializeOwned>(path: String) -> Self {
        Self {
            method: Method::GET,
            path,
            query: Vec::new(),
            body: None,
            check: check_shape::<T>,
        }
    }

    fn post<T: DeserializeOwned>(path: String, body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get::<T>(path)
        }
    }

    fn query(mut self, name: &'static str, value: impl ToString) -> Self {
        self.query.push((name, value.to_string()));
        self
    }
}

// Rejects bodies that parse as JSON but not as the endpoint's type, so they
// count as failures before anything is cached. The checked `Value` is what the
// cache and the deduplicator share across endpoints; callers decode it again
// into their own type in `fetch`.
fn check_shape<T: DeserializeOwned>(value: &Value) -> Result<(), ApiError> {
    T::deserialize(value).map(|_| ()).map_err(ApiError::from)
}

struct ClientInner {
    config: ClientConfig,
    http: reqwest::Client,
    token: String,
    layer: ResilienceLayer,
    sweeper: Option<JoinHandle<()>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[derive(Clone)]
pub struct ToursApiClient {
    inner: Arc<ClientInner>,
}

impl ToursApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let layer = ResilienceLayer::new(&config);
        Self::with_layer(config, layer)
    }

    /// Builds the client around an existing layer. When called inside a tokio
    /// runtime, the cache sweep is started and stopped with the client.
    pub fn with_layer(config: ClientConfig, layer: ResilienceLayer) -> Result<Self, ClientError> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| ClientError::InitError(err.to_string()))?;

        let sweeper = tokio::runtime::Handle::try_current()
            .ok()
            .map(|_| layer.cache.spawn_cleanup());

        Ok(Self {
            inner: Arc::new(ClientInner {
                token: normalize_bearer_token(&config.api_token),
                config,
                http,
                layer,
                sweeper,
            }),
        })
    }

    pub fn layer(&self) -> &ResilienceLayer {
        &self.inner.layer
    }

    pub fn health(&self, endpoint: &str) -> HealthStatus {
        self.inner.layer.monitor.health_status(endpoint)
    }

    fn options_ttl(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.inner.config.options_ttl_seconds))
    }

    fn price_ttl(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.inner.config.price_ttl_seconds))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        key: RequestKey,
        request: UpstreamRequest,
        cache_ttl: Option<Duration>,
    ) -> Result<T, ApiError> {
        let value = self.execute(key, request, cache_ttl).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn execute(
        &self,
        key: RequestKey,
        request: UpstreamRequest,
        cache_ttl: Option<Duration>,
    ) -> Result<Value, ApiError> {
        let cache_key = key.to_key_string();
        let endpoint = key.endpoint();

        if cache_ttl.is_some() {
            if let Some(hit) = self.inner.layer.cache.get(&cache_key) {
                tracing::debug!(endpoint, "cache hit");
                return Ok(hit);
            }
        }

        let inner = Arc::clone(&self.inner);
        let key_for_cache = cache_key.clone();
        self.inner
            .layer
            .deduplicator
            .deduplicate(&cache_key, move || async move {
                inner.run(endpoint, request, key_for_cache, cache_ttl).await
            })
            .await
    }
}

impl ClientInner {
    async fn run(
        &self,
        endpoint: &'static str,
        request: UpstreamRequest,
        cache_key: String,
        cache_ttl: Option<Duration>,
    ) -> Result<Value, ApiError> {
        let layer = &self.layer;
        let scope = &self.config.rate_limit_scope;

        if !layer.rate_limiter.is_allowed(scope) {
            let err = ApiError::RateLimitExceeded {
                scope: scope.clone(),
                retry_after_ms: layer.rate_limiter.remaining_time(scope).as_millis() as u64,
            };
            layer
                .monitor
                .record_request(endpoint, false, Duration::ZERO, Some(&err));
            return Err(err);
        }

        let request = &request;
        let retry_config = &self.config.retry_config;
        let started = Instant::now();
        let result = layer
            .circuit_breaker
            .execute(move || {
                retry_with_backoff(
                    move || async move {
                        let value = self.send(request).await?;
                        (request.check)(&value)?;
                        Ok(value)
                    },
                    retry_config,
                )
            })
            .await;
        let elapsed = started.elapsed();

        match &result {
            Ok(value) => {
                layer.monitor.record_request(endpoint, true, elapsed, None);
                if let Some(ttl) = cache_ttl {
                    layer.cache.set(&cache_key, value.clone(), Some(ttl));
                }
            }
            Err(err) => {
                tracing::debug!(endpoint, error = %err, "upstream call failed");
                layer
                    .monitor
                    .record_request(endpoint, false, elapsed, Some(err));
            }
        }
        result
    }

    async fn send(&self, request: &UpstreamRequest) -> Result<Value, ApiError> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            request.path
        );

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| self.transport_error(err))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::ApiResponseError {
                status_code: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| self.transport_error(err))
    }

    fn transport_error(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout(self.config.timeout_ms)
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl ToursApi for ToursApiClient {
    async fn product_detail(&self, product_id: &str) -> Result<ProductDetail, ApiError> {
        let key = RequestKey::ProductDetail {
            product_id: product_id.to_string(),
        };
        let request = UpstreamRequest::get::<ProductDetail>(format!("/product/{product_id}"));
        self.fetch(key, request, None).await
    }

    async fn available_dates(
        &self,
        product_id: &str,
        start_date: NaiveDate,
    ) -> Result<Vec<AvailableDate>, ApiError> {
        let key = RequestKey::AvailableDates {
            product_id: product_id.to_string(),
            start_date,
        };
        let request =
            UpstreamRequest::get::<Vec<AvailableDate>>(format!("/product/{product_id}/dates"))
                .query("start_date", start_date);
        self.fetch(key, request, None).await
    }

    async fn options_by_date(
        &self,
        product_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ProductOption>, ApiError> {
        let key = RequestKey::OptionsByDate {
            product_id: product_id.to_string(),
            date,
        };
        let request = UpstreamRequest::get::<Vec<ProductOption>>(format!(
            "/product/{product_id}/{date}/options"
        ));
        self.fetch(key, request, self.options_ttl()).await
    }

    async fn options_by_period(&self, product_id: &str) -> Result<Vec<ProductOption>, ApiError> {
        let key = RequestKey::OptionsByPeriod {
            product_id: product_id.to_string(),
        };
        let request =
            UpstreamRequest::get::<Vec<ProductOption>>(format!("/product/{product_id}/options"));
        self.fetch(key, request, self.options_ttl()).await
    }

    async fn price_by_date(
        &self,
        product_id: &str,
        option_code: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PriceQuote, ApiError> {
        let key = RequestKey::PriceByDate {
            product_id: product_id.to_string(),
            option_code: option_code.to_string(),
            start_date,
            end_date,
        };
        let request =
            UpstreamRequest::get::<PriceQuote>(format!("/product/{product_id}/price/date-type"))
                .query("product_option_code", option_code)
                .query("start_date", start_date)
                .query("end_date", end_date);
        self.fetch(key, request, self.price_ttl()).await
    }

    async fn price_by_period(
        &self,
        product_id: &str,
        option_code: &str,
    ) -> Result<PriceQuote, ApiError> {
        let key = RequestKey::PriceByPeriod {
            product_id: product_id.to_string(),
            option_code: option_code.to_string(),
        };
        let request =
            UpstreamRequest::get::<PriceQuote>(format!("/product/{product_id}/price/period-type"))
                .query("product_option_code", option_code);
        self.fetch(key, request, self.price_ttl()).await
    }

    async fn dynamic_price(
        &self,
        product_id: &str,
        option_id: &str,
        request: &DynamicPriceRequest,
    ) -> Result<PriceQuote, ApiError> {
        let key = RequestKey::DynamicPrice {
            product_id: product_id.to_string(),
            option_id: option_id.to_string(),
            selected_date: request.selected_date,
            labels: request.labels.clone(),
            timeslot_id: request.timeslot.as_ref().map(|slot| slot.id.clone()),
        };
        let body = serde_json::to_value(request)?;
        let upstream = UpstreamRequest::post::<PriceQuote>(
            format!("/product/{product_id}/options/{option_id}/dynamic-price"),
            body,
        );
        self.fetch(key, upstream, None).await
    }
}
