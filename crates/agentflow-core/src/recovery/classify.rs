//! Error classification by message keywords.
//!
//! The classifier maps a raw failure message to a category, severity, retry
//! posture, and suggested backoff. Matching is case-insensitive over the
//! whole message; the first matching rule wins, everything else is a
//! retryable system error.

use std::collections::HashMap;

use agentflow_types::error::{ClassifiedError, ErrorCategory, ErrorSeverity, FailedTask};
use chrono::{DateTime, Duration, Utc};

use crate::clock::format_utc;

/// Stateless keyword classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a failure message.
    pub fn classify(
        message: &str,
        context: HashMap<String, serde_json::Value>,
    ) -> ClassifiedError {
        let lower = message.to_lowercase();

        let (category, severity, retryable, retry_delay_seconds) =
            if lower.contains("timeout") || lower.contains("timed out") {
                (ErrorCategory::Timeout, ErrorSeverity::Medium, true, 5.0)
            } else if lower.contains("rate limit") || message.contains("429") {
                (ErrorCategory::RateLimit, ErrorSeverity::Medium, true, 60.0)
            } else if lower.contains("network") || lower.contains("connection") {
                (ErrorCategory::Network, ErrorSeverity::Medium, true, 2.0)
            } else if lower.contains("validation") || lower.contains("invalid") {
                (ErrorCategory::UserError, ErrorSeverity::Low, false, 0.0)
            } else if lower.contains("not found") || message.contains("404") {
                (ErrorCategory::Permanent, ErrorSeverity::Low, false, 0.0)
            } else {
                (ErrorCategory::SystemError, ErrorSeverity::High, true, 1.0)
            };

        ClassifiedError {
            category,
            severity,
            message: message.to_string(),
            retryable,
            retry_delay_seconds,
            context,
        }
    }
}

/// Build a dead-letter record from a raw failure.
///
/// `retry_after` is stamped only for retryable errors, at `now` plus the
/// classified backoff.
pub fn failed_task_from_error(
    task_id: impl Into<String>,
    agent_id: impl Into<String>,
    workflow_id: Option<String>,
    message: &str,
    attempts: u32,
    context: HashMap<String, serde_json::Value>,
    now: DateTime<Utc>,
) -> FailedTask {
    let classified = ErrorClassifier::classify(message, context.clone());
    let retry_after = classified.retryable.then(|| {
        format_utc(now + Duration::milliseconds((classified.retry_delay_seconds * 1000.0) as i64))
    });
    let can_retry = classified.retryable;

    FailedTask {
        task_id: task_id.into(),
        agent_id: agent_id.into(),
        workflow_id,
        error: classified,
        attempts,
        failed_at: format_utc(now),
        context,
        can_retry,
        retry_after,
    }
}
