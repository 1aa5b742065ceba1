//! Runtime execution records.
//!
//! A `WorkflowExecution` is one run of a definition; it owns ordered
//! `PhaseExecution`s which own ordered `StepExecution`s. These records are
//! what the state repository snapshots and what `resume_workflow` rebuilds
//! its skip set from.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status shared by executions, phases, and steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// One runtime instance of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 execution id.
    pub execution_id: Uuid,
    /// Slug of the definition being executed.
    pub workflow_id: String,
    /// Version pinned at `start_workflow`; never rewritten mid-run.
    pub workflow_version: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    /// Caller-supplied input bag.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ordered phase records, one per executed (or resumed) phase.
    #[serde(default)]
    pub phase_executions: Vec<PhaseExecution>,
    /// Execution metadata; `request_id` lives here.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowExecution {
    /// The request id recorded at `start_workflow`, falling back to the
    /// execution id.
    pub fn request_id(&self) -> String {
        self.metadata
            .get("request_id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.execution_id.to_string())
    }

    /// Step ids whose latest recorded attempt completed. This set gates
    /// re-execution on resume.
    pub fn completed_step_ids(&self) -> HashSet<String> {
        let mut completed = HashSet::new();
        for phase in &self.phase_executions {
            for step in &phase.step_executions {
                if step.status == ExecutionStatus::Completed {
                    completed.insert(step.step_id.clone());
                }
            }
        }
        completed
    }

    /// Mutable access to the phase record with the given id.
    pub fn phase_execution_mut(&mut self, phase_id: &str) -> Option<&mut PhaseExecution> {
        self.phase_executions
            .iter_mut()
            .find(|p| p.phase_id == phase_id)
    }
}

// ---------------------------------------------------------------------------
// PhaseExecution / StepExecution
// ---------------------------------------------------------------------------

/// Runtime record for one phase of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub phase_id: String,
    pub phase_number: u32,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub step_executions: Vec<StepExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runtime record for one step attempt. The latest attempt for a given
/// `step_id` is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub output_data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn step(step_id: &str, status: ExecutionStatus) -> StepExecution {
        StepExecution {
            step_id: step_id.to_string(),
            status,
            output_data: HashMap::new(),
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    fn execution_with_steps(steps: Vec<StepExecution>) -> WorkflowExecution {
        WorkflowExecution {
            execution_id: Uuid::now_v7(),
            workflow_id: "test_workflow".to_string(),
            workflow_version: "1.0".to_string(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            current_phase_id: Some("phase_1".to_string()),
            current_step_id: None,
            input_data: HashMap::new(),
            error: None,
            phase_executions: vec![PhaseExecution {
                phase_id: "phase_1".to_string(),
                phase_number: 1,
                status: ExecutionStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                duration_ms: None,
                step_executions: steps,
                error: None,
            }],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
    }

    #[test]
    fn completed_step_ids_only_counts_completed() {
        let exec = execution_with_steps(vec![
            step("phase_1_step_1", ExecutionStatus::Completed),
            step("phase_1_step_2", ExecutionStatus::Failed),
        ]);
        let ids = exec.completed_step_ids();
        assert!(ids.contains("phase_1_step_1"));
        assert!(!ids.contains("phase_1_step_2"));
    }

    #[test]
    fn request_id_falls_back_to_execution_id() {
        let mut exec = execution_with_steps(vec![]);
        assert_eq!(exec.request_id(), exec.execution_id.to_string());
        exec.metadata.insert(
            "request_id".to_string(),
            serde_json::json!("req-12345678"),
        );
        assert_eq!(exec.request_id(), "req-12345678");
    }

    #[test]
    fn execution_json_roundtrip() {
        let exec = execution_with_steps(vec![step("phase_1_step_1", ExecutionStatus::Completed)]);
        let json = serde_json::to_string(&exec).unwrap();
        let parsed: WorkflowExecution = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.execution_id, exec.execution_id);
        assert_eq!(parsed.status, ExecutionStatus::Running);
        assert_eq!(parsed.phase_executions.len(), 1);
        assert_eq!(parsed.phase_executions[0].step_executions.len(), 1);
    }
}
