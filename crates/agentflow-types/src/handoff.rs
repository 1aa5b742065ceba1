//! Handoff records: durable descriptions of work transferred between agents.

use serde::{Deserialize, Serialize};

/// The protocol-level handoff kind (mapped from the step's `HandoffMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffKind {
    Standard,
    Escalation,
    Collaboration,
    ErrorRecovery,
}

impl HandoffKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Escalation => "escalation",
            Self::Collaboration => "collaboration",
            Self::ErrorRecovery => "error_recovery",
        }
    }
}

impl std::fmt::Display for HandoffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handoff processing status. New records start `Pending`; the consuming
/// agent runtime drives later transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Pending,
    InProgress,
    Complete,
    Blocked,
    Failed,
}

impl HandoffStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable handoff record, persisted both as a JSON file and in the
/// handoff registry.
///
/// `handoff_id` and `timestamp` are strings on purpose: the handoff protocol
/// validates them (UUID parse, ISO-8601 parse) rather than trusting the
/// producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    /// UUIDv4, validated at save time.
    pub handoff_id: String,
    pub from_agent: String,
    pub to_agent: String,
    /// ISO-8601 UTC timestamp with trailing `Z`.
    pub timestamp: String,
    pub handoff_type: HandoffKind,
    pub status: HandoffStatus,
    pub work_summary: String,
    #[serde(default)]
    pub deliverables: Vec<serde_json::Value>,
    #[serde(default)]
    pub blockers: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
