//! Event log trait and the replay projection.
//!
//! The event log is strictly append-only: no update, no delete. Queries are
//! ordered by timestamp (ascending for history, descending for "latest").

use agentflow_types::error::EventStoreError;
use agentflow_types::event::{EventType, WorkflowEvent};
use agentflow_types::execution::{ExecutionStatus, WorkflowExecution};
use uuid::Uuid;

/// Query filter for `EventStore::events`.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub execution_id: Option<Uuid>,
    pub workflow_id: Option<String>,
    pub event_type: Option<EventType>,
    /// Maximum number of events returned; 0 means the store default (100).
    pub limit: u32,
}

impl EventFilter {
    pub fn for_execution(execution_id: Uuid) -> Self {
        Self {
            execution_id: Some(execution_id),
            ..Self::default()
        }
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Effective limit after applying the store default.
    pub fn effective_limit(&self) -> u32 {
        if self.limit == 0 { 100 } else { self.limit }
    }
}

/// Append-only journal of workflow lifecycle events.
pub trait EventStore: Send + Sync {
    /// Append an event, stamping its timestamp from the clock when unset.
    /// Returns the stamped event.
    fn append_event(
        &self,
        event: WorkflowEvent,
    ) -> impl std::future::Future<Output = Result<WorkflowEvent, EventStoreError>> + Send;

    /// Query events matching the filter, ordered by timestamp ascending.
    fn events(
        &self,
        filter: EventFilter,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowEvent>, EventStoreError>> + Send;

    /// Latest events across executions, ordered by timestamp descending.
    fn latest_events(
        &self,
        workflow_id: Option<&str>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowEvent>, EventStoreError>> + Send;

    /// Reconstruct the terminal-state projection of an execution from its
    /// events. Post-mortem inspection only; `None` when the execution has no
    /// `workflow_started` event.
    fn replay_execution(
        &self,
        execution_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, EventStoreError>> + Send;
}

/// Build the terminal-state projection from an execution's events.
///
/// Shared by `EventStore` implementations: status comes from the terminal
/// event present (if any), the pinned version from the `workflow_started`
/// event's payload.
pub fn project_execution(events: &[WorkflowEvent]) -> Option<WorkflowExecution> {
    let started = events
        .iter()
        .find(|e| e.event_type == EventType::WorkflowStarted)?;
    let started_at = started.timestamp?;

    let workflow_version = started
        .data
        .get("workflow_version")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("1.0")
        .to_string();

    let terminal = events.iter().find(|e| {
        matches!(
            e.event_type,
            EventType::WorkflowCompleted | EventType::WorkflowFailed | EventType::WorkflowCancelled
        )
    });

    let status = match terminal.map(|e| e.event_type) {
        Some(EventType::WorkflowCompleted) => ExecutionStatus::Completed,
        Some(EventType::WorkflowFailed) => ExecutionStatus::Failed,
        Some(EventType::WorkflowCancelled) => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Running,
    };

    let completed_at = terminal.and_then(|e| e.timestamp);
    let duration_ms = completed_at
        .map(|end| (end - started_at).num_milliseconds().max(0) as u64);

    Some(WorkflowExecution {
        execution_id: started.execution_id,
        workflow_id: started.workflow_id.clone(),
        workflow_version,
        status,
        started_at,
        completed_at,
        duration_ms,
        current_phase_id: None,
        current_step_id: None,
        input_data: Default::default(),
        error: terminal.and_then(|e| e.error.clone()),
        phase_executions: Vec::new(),
        metadata: Default::default(),
    })
}
