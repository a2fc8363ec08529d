use std::{future::Future, time::Duration};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::Instant;

use crate::error::ApiError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct State {
    circuit: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Guards one upstream dependency. All endpoints of that dependency share the
/// same failure count, so a failure storm on one endpoint fails fast for the rest.
#[derive(Debug)]
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service_name: service_name.into(),
            config,
            state: Mutex::new(State {
                circuit: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().circuit
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Runs `f` unless the circuit is open. While open and inside the recovery
    /// timeout, fails with `ApiError::CircuitOpen` without calling `f`.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.should_allow_call()?;

        let result = f().await;
        match &result {
            Ok(_) => self.success(),
            Err(err) => self.fail(err),
        }
        result
    }

    /// Forces the circuit closed. Meant for operators, not for the request path.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.circuit = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure_at = None;
        tracing::info!(service = %self.service_name, "circuit breaker reset");
    }

    fn should_allow_call(&self) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        if state.circuit != CircuitState::Open {
            return Ok(());
        }

        let recovery = Duration::from_millis(self.config.recovery_timeout_ms);
        let elapsed = state
            .last_failure_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::MAX);

        if elapsed <= recovery {
            return Err(ApiError::CircuitOpen {
                service: self.service_name.clone(),
                retry_after_ms: Some((recovery - elapsed).as_millis() as u64),
            });
        }

        state.circuit = CircuitState::HalfOpen;
        tracing::info!(service = %self.service_name, "circuit half-open, probing upstream");
        Ok(())
    }

    fn success(&self) {
        let mut state = self.state.lock();
        state.failure_count = 0;
        if state.circuit == CircuitState::HalfOpen {
            state.circuit = CircuitState::Closed;
            tracing::info!(service = %self.service_name, "circuit closed");
        }
    }

    fn fail(&self, err: &ApiError) {
        let mut state = self.state.lock();
        state.failure_count += 1;
        state.last_failure_at = Some(Instant::now());

        let trip = state.circuit == CircuitState::HalfOpen
            || state.failure_count >= self.config.failure_threshold;

        if trip && state.circuit != CircuitState::Open {
            state.circuit = CircuitState::Open;
            tracing::warn!(
                service = %self.service_name,
                failures = state.failure_count,
                error = %err,
                "circuit opened"
            );
        }
    }
}
