//! Workflow lifecycle events.
//!
//! Events are the append-only audit trail of every execution. The event log
//! stamps the timestamp at append time (from the injected clock) when the
//! producer has not set one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event type / status
// ---------------------------------------------------------------------------

/// The canonical lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    PhaseResumed,
    StepStarted,
    StepCompleted,
    StepFailed,
    HandoffCreated,
}

impl EventType {
    /// Wire name as stored in the event log.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::WorkflowCancelled => "workflow_cancelled",
            Self::PhaseStarted => "phase_started",
            Self::PhaseCompleted => "phase_completed",
            Self::PhaseFailed => "phase_failed",
            Self::PhaseResumed => "phase_resumed",
            Self::StepStarted => "step_started",
            Self::StepCompleted => "step_completed",
            Self::StepFailed => "step_failed",
            Self::HandoffCreated => "handoff_created",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status attached to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    InProgress,
    Success,
    Failed,
    Cancelled,
    Pending,
    Warning,
}

// ---------------------------------------------------------------------------
// WorkflowEvent
// ---------------------------------------------------------------------------

/// One append-only record in the workflow event journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// UUIDv4, assigned at construction.
    pub event_id: Uuid,
    pub event_type: EventType,
    pub execution_id: Uuid,
    pub workflow_id: String,
    /// Stamped by the event log at append time when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub status: EventStatus,
    /// Event-specific payload.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowEvent {
    /// Build an event with a fresh v4 id and an unset timestamp.
    pub fn new(
        event_type: EventType,
        execution_id: Uuid,
        workflow_id: impl Into<String>,
        status: EventStatus,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            execution_id,
            workflow_id: workflow_id.into(),
            timestamp: None,
            step_id: None,
            phase_id: None,
            agent_id: None,
            status,
            data: serde_json::Map::new(),
            error: None,
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_phase(mut self, phase_id: impl Into<String>) -> Self {
        self.phase_id = Some(phase_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a payload. Non-object values are stored under an `"output"` key.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = match data {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("output".to_string(), other);
                map
            }
        };
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_wire_names() {
        assert_eq!(EventType::WorkflowStarted.as_str(), "workflow_started");
        assert_eq!(EventType::HandoffCreated.as_str(), "handoff_created");
        assert_eq!(EventType::PhaseResumed.to_string(), "phase_resumed");
        // serde tag matches the wire name
        let json = serde_json::to_string(&EventType::StepFailed).unwrap();
        assert_eq!(json, "\"step_failed\"");
    }

    #[test]
    fn builder_sets_optional_fields() {
        let execution_id = Uuid::now_v7();
        let event = WorkflowEvent::new(
            EventType::StepStarted,
            execution_id,
            "test_workflow",
            EventStatus::InProgress,
        )
        .with_step("phase_1_step_1")
        .with_phase("phase_1")
        .with_agent("backend")
        .with_data(json!({"attempt": 1}));

        assert_eq!(event.execution_id, execution_id);
        assert_eq!(event.step_id.as_deref(), Some("phase_1_step_1"));
        assert_eq!(event.agent_id.as_deref(), Some("backend"));
        assert_eq!(event.data["attempt"], json!(1));
        assert!(event.timestamp.is_none());
        assert_eq!(event.event_id.get_version_num(), 4);
    }

    #[test]
    fn non_object_data_wrapped_under_output() {
        let event = WorkflowEvent::new(
            EventType::StepCompleted,
            Uuid::now_v7(),
            "wf",
            EventStatus::Success,
        )
        .with_data(json!("done"));
        assert_eq!(event.data["output"], json!("done"));
    }

    #[test]
    fn event_json_roundtrip() {
        let event = WorkflowEvent::new(
            EventType::WorkflowFailed,
            Uuid::now_v7(),
            "wf",
            EventStatus::Failed,
        )
        .with_error("phase 'phase_2' failed");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, EventType::WorkflowFailed);
        assert_eq!(parsed.error.as_deref(), Some("phase 'phase_2' failed"));
    }
}
