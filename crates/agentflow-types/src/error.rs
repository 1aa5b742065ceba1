//! Error taxonomy and store error types.
//!
//! `ErrorCategory`/`ErrorSeverity`/`ClassifiedError` are the output of the
//! error classifier; `FailedTask` is the dead-letter-queue record. The
//! store error enums at the bottom are what the repository traits in
//! `agentflow-core` return.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Failure category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    UserError,
    SystemError,
    RateLimit,
    Timeout,
    Network,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::UserError => "user_error",
            Self::SystemError => "system_error",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Network => "network",
        }
    }
}

/// Severity assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A classified failure: category, severity, retry posture, and the raw
/// message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub retryable: bool,
    /// Suggested base backoff before the next attempt.
    #[serde(default)]
    pub retry_delay_seconds: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Dead-letter record
// ---------------------------------------------------------------------------

/// A terminally failed task, persisted for operator triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTask {
    pub task_id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub error: ClassifiedError,
    pub attempts: u32,
    /// ISO-8601 UTC timestamp of the final failure.
    pub failed_at: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
    pub can_retry: bool,
    /// Earliest reasonable retry time, when retryable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from the event log.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event storage error: {0}")]
    Storage(String),

    #[error("event serialization error: {0}")]
    Serialization(String),
}

/// Errors from the state repository.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// Optimistic-lock failure: the caller's version is stale. Reload and
    /// retry.
    #[error("state version conflict for '{state_id}': stored {stored}, got {given}")]
    VersionConflict {
        state_id: String,
        stored: i64,
        given: i64,
    },

    #[error("state storage error: {0}")]
    Storage(String),

    #[error("state serialization error: {0}")]
    Serialization(String),
}

/// Errors from the handoff registry.
#[derive(Debug, Error)]
pub enum HandoffStoreError {
    #[error("handoff not found: {0}")]
    NotFound(String),

    #[error("handoff storage error: {0}")]
    Storage(String),

    #[error("handoff serialization error: {0}")]
    Serialization(String),
}

/// Errors from the dead-letter queue.
#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead-letter IO error: {0}")]
    Io(String),

    #[error("dead-letter serialization error: {0}")]
    Serialization(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
