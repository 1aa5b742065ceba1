//! Error recovery toolkit: classification, retry with backoff, and circuit
//! breaking.

pub mod circuit;
pub mod classify;
pub mod retry;

pub use circuit::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakers, CircuitState,
};
pub use classify::{ErrorClassifier, failed_task_from_error};
pub use retry::{RetryPolicy, execute_with_retry};
