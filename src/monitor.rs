// Per-endpoint call outcomes, latency and threshold alerts.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Error rate above which an endpoint is unhealthy and an alert fires.
    pub error_rate_threshold: f64,
    /// Error rate above which an endpoint counts as degraded.
    pub degraded_error_rate: f64,
    pub latency_threshold_ms: f64,
    /// Failure count an endpoint must exceed before the failure alert fires.
    pub consecutive_failure_threshold: u64,
    /// Endpoints with fewer samples are reported healthy.
    pub min_samples: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.5,
            degraded_error_rate: 0.1,
            latency_threshold_ms: 5000.0,
            consecutive_failure_threshold: 3,
            min_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time_ms: f64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl EndpointMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    HighErrorRate {
        endpoint: String,
        error_rate: f64,
        threshold: f64,
    },
    SlowResponses {
        endpoint: String,
        average_response_time_ms: f64,
        threshold_ms: f64,
    },
    ConsecutiveFailures {
        endpoint: String,
        failures: u64,
        last_error: Option<String>,
    },
}

/// Receives alerts raised by the monitor. Hosts route them to whatever
/// observability backend they run.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: &Alert);
}

/// Default sink: warning-level tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, alert: &Alert) {
        match alert {
            Alert::HighErrorRate {
                endpoint,
                error_rate,
                threshold,
            } => tracing::warn!(endpoint = %endpoint, error_rate, threshold, "high error rate"),
            Alert::SlowResponses {
                endpoint,
                average_response_time_ms,
                threshold_ms,
            } => tracing::warn!(
                endpoint = %endpoint,
                average_response_time_ms,
                threshold_ms,
                "slow upstream responses"
            ),
            Alert::ConsecutiveFailures {
                endpoint,
                failures,
                last_error,
            } => tracing::warn!(
                endpoint = %endpoint,
                failures,
                last_error = last_error.as_deref().unwrap_or(""),
                "upstream failures above threshold"
            ),
        }
    }
}

pub struct CallMonitor {
    config: MonitorConfig,
    endpoints: RwLock<HashMap<String, EndpointMetrics>>,
    sink: Arc<dyn AlertSink>,
}

impl CallMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingAlertSink))
    }

    pub fn with_sink(config: MonitorConfig, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            config,
            endpoints: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Records one logical call and emits any alerts it crosses.
    pub fn record_request(
        &self,
        endpoint: &str,
        success: bool,
        response_time: Duration,
        error: Option<&ApiError>,
    ) {
        let snapshot = {
            let mut endpoints = self.endpoints.write();
            let metrics = endpoints.entry(endpoint.to_string()).or_default();

            metrics.total_requests += 1;
            let sample_ms = response_time.as_secs_f64() * 1000.0;
            metrics.average_response_time_ms +=
                (sample_ms - metrics.average_response_time_ms) / metrics.total_requests as f64;

            if success {
                metrics.successful_requests += 1;
            } else {
                metrics.failed_requests += 1;
                metrics.last_error = Some(
                    error
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "unknown error".to_string()),
                );
                metrics.last_error_at = Some(Utc::now());
            }
            metrics.clone()
        };

        // emit outside the lock so sinks may call back into the monitor
        for alert in self.evaluate(endpoint, &snapshot) {
            self.sink.emit(&alert);
        }
    }

    pub fn health_status(&self, endpoint: &str) -> HealthStatus {
        let endpoints = self.endpoints.read();
        let Some(metrics) = endpoints.get(endpoint) else {
            return HealthStatus::Healthy;
        };
        if metrics.total_requests < self.config.min_samples {
            return HealthStatus::Healthy;
        }

        let error_rate = metrics.error_rate();
        if error_rate > self.config.error_rate_threshold {
            HealthStatus::Unhealthy
        } else if error_rate > self.config.degraded_error_rate
            || metrics.average_response_time_ms > self.config.latency_threshold_ms
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn metrics(&self, endpoint: &str) -> Option<EndpointMetrics> {
        self.endpoints.read().get(endpoint).cloned()
    }

    pub fn all_metrics(&self) -> HashMap<String, EndpointMetrics> {
        self.endpoints.read().clone()
    }

    pub fn reset(&self) {
        self.endpoints.write().clear();
    }

    fn evaluate(&self, endpoint: &str, metrics: &EndpointMetrics) -> Vec<Alert> {
        let mut alerts = Vec::new();

        let error_rate = metrics.error_rate();
        if error_rate > self.config.error_rate_threshold {
            alerts.push(Alert::HighErrorRate {
                endpoint: endpoint.to_string(),
                error_rate,
                threshold: self.config.error_rate_threshold,
            });
        }

        if metrics.average_response_time_ms > self.config.latency_threshold_ms {
            alerts.push(Alert::SlowResponses {
                endpoint: endpoint.to_string(),
                average_response_time_ms: metrics.average_response_time_ms,
                threshold_ms: self.config.latency_threshold_ms,
            });
        }

        // failures accumulate over the endpoint's lifetime; successes do not clear them
        if metrics.failed_requests > self.config.consecutive_failure_threshold {
            alerts.push(Alert::ConsecutiveFailures {
                endpoint: endpoint.to_string(),
                failures: metrics.failed_requests,
                last_error: metrics.last_error.clone(),
            });
        }

        alerts
    }
}
