//! Circuit breaker: per-name fault isolation for downstream calls.
//!
//! State machine: `closed` -> (failures reach threshold) -> `open` ->
//! (timeout elapses) -> `half_open` -> (two consecutive successes) ->
//! `closed`, with any half-open failure snapping back to `open`. Breakers
//! are in-memory only and reset on process start.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, format_utc};

/// Successes required in half-open before the circuit closes again.
const SUCCESSES_TO_CLOSE: u32 = 2;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Threshold exceeded, calls fail fast.
    Open,
    /// Probing whether the downstream recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures required to open the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a half-open probe.
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Error returned by `CircuitBreaker::call`.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E: std::fmt::Display + std::fmt::Debug> {
    /// Fast failure: the circuit is open and the inner call never ran.
    /// Callers should treat this as transient.
    #[error("circuit breaker '{name}' is open; retry in {retry_in_secs:.1}s")]
    Open { name: String, retry_in_secs: f64 },

    /// The inner call ran and failed.
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
}

/// Point-in-time view of a breaker, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure_time: Option<String>,
    pub timeout_seconds: u64,
}

/// A named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Run `op` under breaker protection.
    ///
    /// The lock is never held across the inner await; concurrent callers may
    /// both probe in half-open, which only delays closing by a success or
    /// two.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display + std::fmt::Debug,
    {
        self.before_call()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    /// Gate keeping ahead of the call: fail fast while open, transition to
    /// half-open once the timeout has elapsed.
    fn before_call<E: std::fmt::Display + std::fmt::Debug>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .last_failure_time
            .map(|t| (self.clock.now() - t).num_milliseconds().max(0) as u64)
            .unwrap_or(u64::MAX);
        let timeout_ms = self.config.timeout.as_millis() as u64;

        if elapsed >= timeout_ms {
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            tracing::info!(breaker = self.name.as_str(), "circuit breaker half-open");
            Ok(())
        } else {
            Err(CircuitBreakerError::Open {
                name: self.name.clone(),
                retry_in_secs: (timeout_ms - elapsed) as f64 / 1000.0,
            })
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= SUCCESSES_TO_CLOSE {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    tracing::info!(breaker = self.name.as_str(), "circuit breaker closed");
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failure_count += 1;
        inner.last_failure_time = Some(self.clock.now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                tracing::warn!(
                    breaker = self.name.as_str(),
                    "circuit breaker reopened after half-open failure"
                );
            }
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        breaker = self.name.as_str(),
                        failure_count = inner.failure_count,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker back to closed and zero the counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = None;
        tracing::info!(breaker = self.name.as_str(), "circuit breaker reset");
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            last_failure_time: inner.last_failure_time.map(format_utc),
            timeout_seconds: self.config.timeout.as_secs(),
        }
    }
}

/// Registry of named breakers sharing one configuration.
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: DashMap::new(),
        }
    }

    /// Get or create the breaker with this name.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(name, self.config, Arc::clone(&self.clock)))
            })
            .clone()
    }

    /// Snapshots of every known breaker.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.iter().map(|b| b.snapshot()).collect()
    }
}
