//! In-memory fakes for executor tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentflow_types::agent::{AgentInvocation, AgentRequest};
use agentflow_types::error::{
    DeadLetterError, EventStoreError, FailedTask, HandoffStoreError, StateStoreError,
};
use agentflow_types::event::WorkflowEvent;
use agentflow_types::execution::WorkflowExecution;
use agentflow_types::handoff::{HandoffRecord, HandoffStatus};
use agentflow_types::state::{StateKind, StateSnapshot, StateSummary};
use uuid::Uuid;

use crate::agent::{AgentCatalog, AgentInvoker, AgentInvokerError};
use crate::clock::{Clock, format_utc};
use crate::repository::dlq::{DeadLetterFilter, DeadLetterQueue};
use crate::repository::events::{EventFilter, EventStore, project_execution};
use crate::repository::handoffs::{HandoffFilter, HandoffRegistry};
use crate::repository::state::StateStore;

// ---------------------------------------------------------------------------
// MemoryEventLog
// ---------------------------------------------------------------------------

pub struct MemoryEventLog {
    clock: Arc<dyn Clock>,
    events: Mutex<Vec<WorkflowEvent>>,
    fail_appends: AtomicBool,
}

impl MemoryEventLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            events: Mutex::new(Vec::new()),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Make every subsequent append fail, for emission-safety tests.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

impl EventStore for MemoryEventLog {
    async fn append_event(&self, mut event: WorkflowEvent) -> Result<WorkflowEvent, EventStoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(EventStoreError::Storage("injected append failure".to_string()));
        }
        if event.timestamp.is_none() {
            event.timestamp = Some(self.clock.now());
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(event)
    }

    async fn events(&self, filter: EventFilter) -> Result<Vec<WorkflowEvent>, EventStoreError> {
        let events = self.events.lock().unwrap();
        Ok(events
            .iter()
            .filter(|e| {
                filter.execution_id.is_none_or(|id| e.execution_id == id)
                    && filter
                        .workflow_id
                        .as_deref()
                        .is_none_or(|w| e.workflow_id == w)
                    && filter.event_type.is_none_or(|t| e.event_type == t)
            })
            .take(filter.effective_limit() as usize)
            .cloned()
            .collect())
    }

    async fn latest_events(
        &self,
        workflow_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkflowEvent>, EventStoreError> {
        let events = self.events.lock().unwrap();
        Ok(events
            .iter()
            .rev()
            .filter(|e| workflow_id.is_none_or(|w| e.workflow_id == w))
            .take(limit.max(1) as usize)
            .cloned()
            .collect())
    }

    async fn replay_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, EventStoreError> {
        let events = self
            .events(EventFilter::for_execution(execution_id).with_limit(10_000))
            .await?;
        Ok(project_execution(&events))
    }
}

// ---------------------------------------------------------------------------
// ScriptedInvoker
// ---------------------------------------------------------------------------

/// Call-recording agent invoker with per-step scripted outcomes. Steps
/// without a queued outcome succeed with empty output.
pub struct ScriptedInvoker {
    outcomes: Mutex<HashMap<String, VecDeque<Result<AgentInvocation, String>>>>,
    calls: Mutex<Vec<AgentRequest>>,
    delay: Duration,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Delay every invocation, for timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue the next outcome for a step id.
    pub fn push_outcome(&self, step_id: &str, outcome: Result<AgentInvocation, String>) {
        self.outcomes
            .lock()
            .unwrap()
            .entry(step_id.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Step ids invoked, in call order.
    pub fn invoked_step_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| {
                r.input_data
                    .get("step_id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }

    pub fn call_count(&self, step_id: &str) -> usize {
        self.invoked_step_ids()
            .iter()
            .filter(|id| *id == step_id)
            .count()
    }
}

impl AgentInvoker for ScriptedInvoker {
    async fn execute_agent(
        &self,
        request: AgentRequest,
    ) -> Result<AgentInvocation, AgentInvokerError> {
        self.calls.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step_id = request
            .input_data
            .get("step_id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let next = self
            .outcomes
            .lock()
            .unwrap()
            .get_mut(&step_id)
            .and_then(VecDeque::pop_front);

        match next {
            Some(outcome) => outcome.map_err(AgentInvokerError),
            None => Ok(AgentInvocation::success(HashMap::new())),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

pub struct MemoryStateStore {
    clock: Arc<dyn Clock>,
    rows: Mutex<HashMap<String, StateSnapshot>>,
}

impl MemoryStateStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl StateStore for MemoryStateStore {
    async fn save_state(&self, mut snapshot: StateSnapshot) -> Result<StateSnapshot, StateStoreError> {
        let mut rows = self.rows.lock().unwrap();
        let now = format_utc(self.clock.now());

        match rows.get(&snapshot.state_id) {
            Some(stored) if stored.version != snapshot.version => {
                return Err(StateStoreError::VersionConflict {
                    state_id: snapshot.state_id.clone(),
                    stored: stored.version,
                    given: snapshot.version,
                });
            }
            Some(stored) => {
                snapshot.created_at = stored.created_at.clone();
                snapshot.version = stored.version + 1;
            }
            None => {
                snapshot.created_at = Some(now.clone());
                snapshot.version = 1;
            }
        }
        snapshot.updated_at = Some(now);
        rows.insert(snapshot.state_id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn load_state(&self, state_id: &str) -> Result<Option<StateSnapshot>, StateStoreError> {
        Ok(self.rows.lock().unwrap().get(state_id).cloned())
    }

    async fn load_state_summary(
        &self,
        state_id: &str,
    ) -> Result<Option<StateSummary>, StateStoreError> {
        Ok(self.rows.lock().unwrap().get(state_id).map(|s| StateSummary {
            state_id: s.state_id.clone(),
            state_type: s.state_type,
            version: s.version,
            updated_at: s.updated_at.clone().unwrap_or_default(),
        }))
    }

    async fn delete_state(&self, state_id: &str) -> Result<bool, StateStoreError> {
        Ok(self.rows.lock().unwrap().remove(state_id).is_some())
    }

    async fn list_states(
        &self,
        kind: Option<StateKind>,
        limit: u32,
    ) -> Result<Vec<StateSummary>, StateStoreError> {
        let rows = self.rows.lock().unwrap();
        let mut summaries: Vec<StateSummary> = rows
            .values()
            .filter(|s| kind.is_none_or(|k| s.state_type == k))
            .map(|s| StateSummary {
                state_id: s.state_id.clone(),
                state_type: s.state_type,
                version: s.version,
                updated_at: s.updated_at.clone().unwrap_or_default(),
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries.truncate(limit.max(1) as usize);
        Ok(summaries)
    }
}

// ---------------------------------------------------------------------------
// MemoryHandoffRegistry / MemoryDeadLetterQueue / StaticCatalog
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryHandoffRegistry {
    rows: Mutex<HashMap<String, (HandoffRecord, Uuid, String)>>,
}

impl MemoryHandoffRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<HandoffRecord> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .map(|(r, _, _)| r.clone())
            .collect()
    }
}

impl HandoffRegistry for MemoryHandoffRegistry {
    async fn register_handoff(
        &self,
        record: &HandoffRecord,
        execution_id: Uuid,
        workflow_id: &str,
    ) -> Result<(), HandoffStoreError> {
        self.rows.lock().unwrap().insert(
            record.handoff_id.clone(),
            (record.clone(), execution_id, workflow_id.to_string()),
        );
        Ok(())
    }

    async fn handoffs(&self, filter: HandoffFilter) -> Result<Vec<HandoffRecord>, HandoffStoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|(r, exec, wf)| {
                filter.execution_id.is_none_or(|id| *exec == id)
                    && filter.workflow_id.as_deref().is_none_or(|w| wf == w)
                    && filter.status.is_none_or(|s| r.status == s)
                    && filter.to_agent.as_deref().is_none_or(|a| r.to_agent == a)
            })
            .take(filter.effective_limit() as usize)
            .map(|(r, _, _)| r.clone())
            .collect())
    }

    async fn update_handoff_status(
        &self,
        handoff_id: &str,
        status: HandoffStatus,
    ) -> Result<(), HandoffStoreError> {
        let mut rows = self.rows.lock().unwrap();
        let (record, _, _) = rows
            .get_mut(handoff_id)
            .ok_or_else(|| HandoffStoreError::NotFound(handoff_id.to_string()))?;
        record.status = status;
        Ok(())
    }

    async fn handoff_stats(&self) -> Result<HashMap<String, u64>, HandoffStoreError> {
        let rows = self.rows.lock().unwrap();
        let mut stats = HashMap::new();
        for (record, _, _) in rows.values() {
            *stats.entry(record.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[derive(Default)]
pub struct MemoryDeadLetterQueue {
    tasks: Mutex<HashMap<String, FailedTask>>,
}

impl MemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<FailedTask> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }
}

impl DeadLetterQueue for MemoryDeadLetterQueue {
    async fn add_failed_task(&self, task: &FailedTask) -> Result<(), DeadLetterError> {
        self.tasks
            .lock()
            .unwrap()
            .insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn failed_tasks(
        &self,
        filter: DeadLetterFilter,
    ) -> Result<Vec<FailedTask>, DeadLetterError> {
        let tasks = self.tasks.lock().unwrap();
        let mut out: Vec<FailedTask> = tasks
            .values()
            .filter(|t| {
                filter.agent_id.as_deref().is_none_or(|a| t.agent_id == a)
                    && filter.can_retry.is_none_or(|c| t.can_retry == c)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        out.truncate(filter.effective_limit() as usize);
        Ok(out)
    }

    async fn remove_task(&self, task_id: &str) -> Result<bool, DeadLetterError> {
        Ok(self.tasks.lock().unwrap().remove(task_id).is_some())
    }
}

pub struct StaticCatalog(pub Vec<&'static str>);

impl AgentCatalog for StaticCatalog {
    fn exists(&self, agent_id: &str) -> bool {
        self.0.contains(&agent_id)
    }

    fn agent_ids(&self) -> Vec<String> {
        self.0.iter().map(|s| s.to_string()).collect()
    }
}
