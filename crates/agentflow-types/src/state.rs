//! Versioned state snapshots.
//!
//! A `StateSnapshot` is a durable, checksum-validated projection of runtime
//! state (today: workflow executions). The event log remains the audit
//! trail; snapshots are the cache the executor reloads on resume.

use serde::{Deserialize, Serialize};

/// What kind of state a snapshot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Workflow,
    Agent,
}

impl StateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Agent => "agent",
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned state snapshot.
///
/// Writers pass the `version` they read; the store accepts the write only if
/// the stored row still carries that version, then increments it. A fresh
/// snapshot is written with `version = 0` and stored as version 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state_id: String,
    pub state_type: StateKind,
    /// Optimistic-lock version. 0 means "not yet persisted".
    #[serde(default)]
    pub version: i64,
    /// The state payload. Serialized canonically (sorted keys) for the
    /// checksum.
    pub data: serde_json::Value,
    /// ISO-8601 UTC, stamped by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl StateSnapshot {
    /// Build an unpersisted snapshot (version 0).
    pub fn new(state_id: impl Into<String>, state_type: StateKind, data: serde_json::Value) -> Self {
        Self {
            state_id: state_id.into(),
            state_type,
            version: 0,
            data,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Metadata-only view of a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSummary {
    pub state_id: String,
    pub state_type: StateKind,
    pub version: i64,
    pub updated_at: String,
}
