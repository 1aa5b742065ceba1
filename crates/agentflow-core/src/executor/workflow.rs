//! Top-level workflow orchestrator.
//!
//! Iterates phases and steps in definition order, persists state snapshots
//! under optimistic locking, generates handoffs from completed steps,
//! routes workflow failures to the dead-letter queue, and supports resume
//! from the last completed step and cooperative cancellation.
//!
//! Failure propagation: step failures fail the phase, phase failures fail
//! the workflow, each layer emitting its `_failed` event. Handoff and
//! event-log errors are logged and swallowed -- the workflow is more
//! important than its audit record.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use agentflow_types::error::StateStoreError;
use agentflow_types::event::{EventStatus, EventType, WorkflowEvent};
use agentflow_types::execution::{
    ExecutionStatus, PhaseExecution, StepExecution, WorkflowExecution,
};
use agentflow_types::state::{StateKind, StateSnapshot};
use agentflow_types::workflow::{HandoffMode, WorkflowDefinition, WorkflowPhase, WorkflowStep};
use dashmap::DashMap;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentCatalog, AgentInvoker};
use crate::bus::EventBus;
use crate::clock::Clock;
use crate::handoff::HandoffGenerator;
use crate::parser::{ParseError, WorkflowParser};
use crate::recovery::{CircuitBreakerConfig, CircuitBreakers, RetryPolicy, execute_with_retry};
use crate::recovery::classify::failed_task_from_error;
use crate::repository::dlq::DeadLetterQueue;
use crate::repository::events::EventStore;
use crate::repository::handoffs::HandoffRegistry;
use crate::repository::state::StateStore;

use super::emit_event_safe;
use super::step::{StepContext, StepExecutor};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the orchestrator. Step and phase failures are not
/// errors here -- they land in the returned execution's status.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Snapshot persistence failed; a `VersionConflict` means reload and
    /// retry.
    #[error(transparent)]
    State(#[from] StateStoreError),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Composed context
// ---------------------------------------------------------------------------

/// The engine's composed dependency set, constructed once at startup and
/// threaded through explicitly.
pub struct EngineContext<E, S, R, Q, A, C>
where
    E: EventStore,
    S: StateStore,
    R: HandoffRegistry,
    Q: DeadLetterQueue,
    A: AgentInvoker,
    C: AgentCatalog,
{
    pub events: Arc<E>,
    pub state: Arc<S>,
    pub registry: Arc<R>,
    pub dlq: Arc<Q>,
    pub invoker: Arc<A>,
    pub catalog: Arc<C>,
    pub clock: Arc<dyn Clock>,
}

enum PhaseOutcome {
    Completed,
    Failed,
    Paused,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Orchestrates workflow executions. One logical instance per process owns
/// the in-memory active-execution map; individual executions run serially
/// step by step, while separate executions may run concurrently.
pub struct WorkflowExecutor<E, S, R, Q, A, C>
where
    E: EventStore,
    S: StateStore,
    R: HandoffRegistry,
    Q: DeadLetterQueue,
    A: AgentInvoker,
    C: AgentCatalog,
{
    parser: WorkflowParser,
    events: Arc<E>,
    state: Arc<S>,
    registry: Arc<R>,
    dlq: Arc<Q>,
    steps: StepExecutor<E, A>,
    handoffs: HandoffGenerator<C>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    retry_policy: RetryPolicy,
    active: DashMap<Uuid, WorkflowExecution>,
    state_versions: DashMap<Uuid, i64>,
    cancel_tokens: DashMap<Uuid, CancellationToken>,
}

impl<E, S, R, Q, A, C> WorkflowExecutor<E, S, R, Q, A, C>
where
    E: EventStore,
    S: StateStore,
    R: HandoffRegistry,
    Q: DeadLetterQueue,
    A: AgentInvoker,
    C: AgentCatalog,
{
    pub fn new(
        ctx: EngineContext<E, S, R, Q, A, C>,
        parser: WorkflowParser,
        handoffs_dir: impl Into<PathBuf>,
        breaker_config: CircuitBreakerConfig,
        retry_policy: RetryPolicy,
    ) -> Self {
        let bus = EventBus::default();
        let breakers = Arc::new(CircuitBreakers::new(breaker_config, Arc::clone(&ctx.clock)));
        let steps = StepExecutor::new(
            Arc::clone(&ctx.events),
            Arc::clone(&ctx.invoker),
            Arc::clone(&ctx.clock),
            breakers,
            bus.clone(),
        );
        let handoffs = HandoffGenerator::new(
            Arc::clone(&ctx.catalog),
            handoffs_dir,
            Arc::clone(&ctx.clock),
        );

        Self {
            parser,
            events: ctx.events,
            state: ctx.state,
            registry: ctx.registry,
            dlq: ctx.dlq,
            steps,
            handoffs,
            clock: ctx.clock,
            bus,
            retry_policy,
            active: DashMap::new(),
            state_versions: DashMap::new(),
            cancel_tokens: DashMap::new(),
        }
    }

    /// Subscribe to the live lifecycle event feed.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.bus.subscribe()
    }

    /// Workflow definition files known to the parser.
    pub fn list_workflows(&self) -> Vec<PathBuf> {
        self.parser.list_workflows()
    }

    // -----------------------------------------------------------------------
    // start
    // -----------------------------------------------------------------------

    /// Create a new execution in `pending` state: load the definition, pin
    /// the workflow version, persist the first snapshot, and emit
    /// `workflow_started`.
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        input_data: HashMap<String, serde_json::Value>,
        request_id: Option<String>,
        workflow_version: Option<String>,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let def = self.parser.load_workflow(workflow_id).await?;

        let execution_id = Uuid::now_v7();
        let request_id =
            request_id.unwrap_or_else(|| format!("req-{}", &execution_id.to_string()[..8]));
        let workflow_version =
            workflow_version.unwrap_or_else(|| def.metadata.version.clone());

        let execution = WorkflowExecution {
            execution_id,
            workflow_id: def.workflow_id.clone(),
            workflow_version: workflow_version.clone(),
            status: ExecutionStatus::Pending,
            started_at: self.clock.now(),
            completed_at: None,
            duration_ms: None,
            current_phase_id: def.phases.first().map(|p| p.phase_id.clone()),
            current_step_id: None,
            input_data,
            error: None,
            phase_executions: Vec::new(),
            metadata: HashMap::from([("request_id".to_string(), json!(request_id))]),
        };

        self.active.insert(execution_id, execution.clone());
        self.cancel_tokens
            .insert(execution_id, CancellationToken::new());
        self.save_execution_state(&execution).await?;

        self.emit(
            WorkflowEvent::new(
                EventType::WorkflowStarted,
                execution_id,
                &execution.workflow_id,
                EventStatus::InProgress,
            )
            .with_data(json!({
                "workflow_version": workflow_version,
                "request_id": request_id,
            })),
        )
        .await;

        tracing::info!(
            execution_id = %execution_id,
            workflow_id = execution.workflow_id.as_str(),
            workflow_version = workflow_version.as_str(),
            "started workflow execution"
        );

        Ok(execution)
    }

    // -----------------------------------------------------------------------
    // execute
    // -----------------------------------------------------------------------

    /// Run an execution's phases in definition order until completion,
    /// failure, suspension, or cancellation.
    pub async fn execute_workflow(
        &self,
        execution_id: Uuid,
        workflow_def: Option<&WorkflowDefinition>,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let mut execution = self
            .find_execution(execution_id)
            .await?
            .ok_or(ExecutorError::ExecutionNotFound(execution_id))?;

        let owned_def;
        let def = match workflow_def {
            Some(def) => def,
            None => match self.parser.load_workflow(&execution.workflow_id).await {
                Ok(def) => {
                    owned_def = def;
                    &owned_def
                }
                Err(err) => {
                    self.fail_execution(&mut execution, err.to_string(), "DefinitionLoad")
                        .await;
                    self.update_active(&execution);
                    self.save_execution_state(&execution).await?;
                    return Err(err.into());
                }
            },
        };

        execution.status = ExecutionStatus::Running;
        self.cancel_tokens
            .entry(execution_id)
            .or_insert_with(CancellationToken::new);
        self.update_active(&execution);

        for phase_def in &def.phases {
            if self.adopt_cancellation(&mut execution) {
                break;
            }

            match self.execute_phase(&mut execution, phase_def).await {
                PhaseOutcome::Completed => {
                    execution.current_phase_id = Some(phase_def.phase_id.clone());
                }
                PhaseOutcome::Failed => {
                    execution.current_phase_id = Some(phase_def.phase_id.clone());
                    execution.status = ExecutionStatus::Failed;
                    execution.error = Some(self.last_step_error(&execution).unwrap_or_else(
                        || format!("Phase '{}' failed", phase_def.phase_id),
                    ));
                    break;
                }
                PhaseOutcome::Paused => {
                    execution.current_phase_id = Some(phase_def.phase_id.clone());
                    execution.status = ExecutionStatus::Paused;
                    break;
                }
            }
        }

        match execution.status {
            ExecutionStatus::Running => {
                execution.status = ExecutionStatus::Completed;
                self.stamp_completion(&mut execution);
                self.emit(
                    WorkflowEvent::new(
                        EventType::WorkflowCompleted,
                        execution_id,
                        &execution.workflow_id,
                        EventStatus::Success,
                    )
                    .with_data(json!({
                        "duration_ms": execution.duration_ms,
                        "phases_completed": execution.phase_executions.len(),
                    })),
                )
                .await;
            }
            ExecutionStatus::Failed => {
                let error = execution
                    .error
                    .clone()
                    .unwrap_or_else(|| "Workflow failed".to_string());
                self.fail_execution(&mut execution, error, "PhaseFailure").await;
            }
            ExecutionStatus::Paused => {
                tracing::info!(
                    execution_id = %execution_id,
                    "workflow paused awaiting manual step"
                );
            }
            _ => {}
        }

        self.update_active(&execution);
        self.save_execution_state(&execution).await?;
        Ok(execution)
    }

    async fn execute_phase(
        &self,
        execution: &mut WorkflowExecution,
        phase_def: &WorkflowPhase,
    ) -> PhaseOutcome {
        let started_at = self.clock.now();
        let mut phase = PhaseExecution {
            phase_id: phase_def.phase_id.clone(),
            phase_number: phase_def.phase_number,
            status: ExecutionStatus::Running,
            started_at,
            completed_at: None,
            duration_ms: None,
            step_executions: Vec::new(),
            error: None,
        };

        self.emit(
            WorkflowEvent::new(
                EventType::PhaseStarted,
                execution.execution_id,
                &execution.workflow_id,
                EventStatus::InProgress,
            )
            .with_phase(&phase_def.phase_id)
            .with_data(json!({"steps": phase_def.steps.len()})),
        )
        .await;

        let mut outcome = PhaseOutcome::Completed;

        for step_def in &phase_def.steps {
            execution.current_step_id = Some(step_def.step_id.clone());
            let ctx = StepContext {
                execution_id: execution.execution_id,
                workflow_id: execution.workflow_id.clone(),
                phase_id: Some(phase_def.phase_id.clone()),
            };

            let step_execution = self.steps.execute_step(step_def, &ctx).await;
            let step_status = step_execution.status;
            let step_error = step_execution.error.clone();
            phase.step_executions.push(step_execution);

            match step_status {
                ExecutionStatus::Failed => {
                    phase.status = ExecutionStatus::Failed;
                    phase.error = step_error;
                    let steps_completed = phase
                        .step_executions
                        .iter()
                        .filter(|s| s.status == ExecutionStatus::Completed)
                        .count();
                    self.emit(
                        WorkflowEvent::new(
                            EventType::PhaseFailed,
                            execution.execution_id,
                            &execution.workflow_id,
                            EventStatus::Failed,
                        )
                        .with_phase(&phase_def.phase_id)
                        .with_data(json!({
                            "failed_step_id": step_def.step_id,
                            "steps_completed": steps_completed,
                        })),
                    )
                    .await;
                    outcome = PhaseOutcome::Failed;
                    break;
                }
                ExecutionStatus::Paused => {
                    phase.status = ExecutionStatus::Paused;
                    outcome = PhaseOutcome::Paused;
                    break;
                }
                ExecutionStatus::Completed => {
                    if step_def.handoff_to.is_some()
                        && step_def.handoff_mode != HandoffMode::Never
                        && let Some(step_execution) = phase.step_executions.last()
                    {
                        self.create_handoff(
                            execution.execution_id,
                            &execution.workflow_id,
                            &phase_def.phase_id,
                            step_def,
                            step_execution,
                        )
                        .await;
                    }
                }
                _ => {}
            }
        }

        if matches!(outcome, PhaseOutcome::Completed) {
            let completed_at = self.clock.now();
            phase.status = ExecutionStatus::Completed;
            phase.completed_at = Some(completed_at);
            phase.duration_ms =
                Some((completed_at - phase.started_at).num_milliseconds().max(0) as u64);
            self.emit(
                WorkflowEvent::new(
                    EventType::PhaseCompleted,
                    execution.execution_id,
                    &execution.workflow_id,
                    EventStatus::Success,
                )
                .with_phase(&phase_def.phase_id)
                .with_data(json!({"steps_completed": phase.step_executions.len()})),
            )
            .await;
        }

        execution.phase_executions.push(phase);
        outcome
    }

    /// Generate, persist, register, and announce a handoff. Every failure
    /// here is logged and swallowed.
    async fn create_handoff(
        &self,
        execution_id: Uuid,
        workflow_id: &str,
        phase_id: &str,
        step_def: &WorkflowStep,
        step_execution: &StepExecution,
    ) {
        let record = match self.handoffs.generate(step_def, step_execution) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    step_id = step_def.step_id.as_str(),
                    error = %err,
                    "failed to generate handoff"
                );
                return;
            }
        };

        let path = match self.handoffs.save(&record).await {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(
                    handoff_id = record.handoff_id.as_str(),
                    error = %err,
                    "failed to save handoff"
                );
                return;
            }
        };

        let registry = Arc::clone(&self.registry);
        let register = execute_with_retry(
            &self.retry_policy,
            &format!("register-handoff-{}", record.handoff_id),
            |_attempt| {
                let registry = Arc::clone(&registry);
                let record = record.clone();
                let workflow_id = workflow_id.to_string();
                async move {
                    registry
                        .register_handoff(&record, execution_id, &workflow_id)
                        .await
                }
            },
        )
        .await;
        if let Err(err) = register {
            tracing::warn!(
                handoff_id = record.handoff_id.as_str(),
                error = %err,
                "failed to register handoff"
            );
        }

        let mut event = WorkflowEvent::new(
            EventType::HandoffCreated,
            execution_id,
            workflow_id,
            EventStatus::Pending,
        )
        .with_step(&step_def.step_id)
        .with_phase(phase_id)
        .with_data(json!({
            "handoff_id": record.handoff_id,
            "from_agent": record.from_agent,
            "to_agent": record.to_agent,
            "handoff_type": record.handoff_type.as_str(),
            "handoff_path": path.display().to_string(),
        }));
        if let Some(agent_id) = &step_def.agent_id {
            event = event.with_agent(agent_id);
        }
        self.emit(event).await;
    }

    // -----------------------------------------------------------------------
    // resume
    // -----------------------------------------------------------------------

    /// Resume a partially failed (or paused) execution, skipping every step
    /// whose latest recorded attempt completed.
    pub async fn resume_workflow(
        &self,
        execution_id: Uuid,
        workflow_def: Option<&WorkflowDefinition>,
    ) -> Result<WorkflowExecution, ExecutorError> {
        let mut execution = self
            .find_execution(execution_id)
            .await?
            .ok_or(ExecutorError::ExecutionNotFound(execution_id))?;

        let owned_def;
        let def = match workflow_def {
            Some(def) => def,
            None => {
                owned_def = self.parser.load_workflow(&execution.workflow_id).await?;
                &owned_def
            }
        };

        let completed_ids = execution.completed_step_ids();
        execution.status = ExecutionStatus::Running;
        execution.error = None;
        execution.completed_at = None;
        execution.duration_ms = None;
        self.cancel_tokens
            .entry(execution_id)
            .or_insert_with(CancellationToken::new);
        self.update_active(&execution);

        tracing::info!(
            execution_id = %execution_id,
            workflow_id = execution.workflow_id.as_str(),
            completed_steps = completed_ids.len(),
            "resuming workflow execution"
        );

        for phase_def in &def.phases {
            if self.adopt_cancellation(&mut execution) {
                break;
            }

            let all_done = !phase_def.steps.is_empty()
                && phase_def
                    .steps
                    .iter()
                    .all(|s| completed_ids.contains(&s.step_id));
            if all_done || phase_def.steps.is_empty() {
                self.mark_phase_completed(&mut execution, phase_def);
                continue;
            }

            match self
                .execute_phase_resume(&mut execution, phase_def, &completed_ids)
                .await
            {
                PhaseOutcome::Completed => {
                    execution.current_phase_id = Some(phase_def.phase_id.clone());
                }
                PhaseOutcome::Failed => {
                    execution.current_phase_id = Some(phase_def.phase_id.clone());
                    execution.status = ExecutionStatus::Failed;
                    execution.error = Some(self.last_step_error(&execution).unwrap_or_else(
                        || format!("Phase '{}' failed during resume", phase_def.phase_id),
                    ));
                    break;
                }
                PhaseOutcome::Paused => {
                    execution.current_phase_id = Some(phase_def.phase_id.clone());
                    execution.status = ExecutionStatus::Paused;
                    break;
                }
            }
        }

        match execution.status {
            ExecutionStatus::Running => {
                execution.status = ExecutionStatus::Completed;
                self.stamp_completion(&mut execution);
                self.emit(
                    WorkflowEvent::new(
                        EventType::WorkflowCompleted,
                        execution_id,
                        &execution.workflow_id,
                        EventStatus::Success,
                    )
                    .with_data(json!({
                        "resumed": true,
                        "phases_completed": execution.phase_executions.len(),
                    })),
                )
                .await;
            }
            ExecutionStatus::Failed => {
                let error = execution
                    .error
                    .clone()
                    .unwrap_or_else(|| "Workflow failed during resume".to_string());
                execution.completed_at = Some(self.clock.now());
                self.handle_workflow_failure(&execution, &error).await;
                self.emit(
                    WorkflowEvent::new(
                        EventType::WorkflowFailed,
                        execution_id,
                        &execution.workflow_id,
                        EventStatus::Failed,
                    )
                    .with_error(&error)
                    .with_data(json!({"resumed": true})),
                )
                .await;
            }
            _ => {}
        }

        self.update_active(&execution);
        self.save_execution_state(&execution).await?;
        Ok(execution)
    }

    /// Re-run the incomplete steps of one phase, preserving completed
    /// attempts and replacing stale ones.
    async fn execute_phase_resume(
        &self,
        execution: &mut WorkflowExecution,
        phase_def: &WorkflowPhase,
        completed_ids: &HashSet<String>,
    ) -> PhaseOutcome {
        let now = self.clock.now();
        let existing = execution
            .phase_executions
            .iter()
            .position(|p| p.phase_id == phase_def.phase_id);
        let resumed = existing.is_some();

        let mut phase = match existing {
            Some(idx) => {
                let mut phase = execution.phase_executions.remove(idx);
                phase
                    .step_executions
                    .retain(|s| s.status == ExecutionStatus::Completed);
                phase.status = ExecutionStatus::Running;
                phase.error = None;
                phase.completed_at = None;
                phase.duration_ms = None;
                phase
            }
            None => PhaseExecution {
                phase_id: phase_def.phase_id.clone(),
                phase_number: phase_def.phase_number,
                status: ExecutionStatus::Running,
                started_at: now,
                completed_at: None,
                duration_ms: None,
                step_executions: Vec::new(),
                error: None,
            },
        };

        let mut completed_list: Vec<&String> = completed_ids.iter().collect();
        completed_list.sort();
        self.emit(
            WorkflowEvent::new(
                if resumed {
                    EventType::PhaseResumed
                } else {
                    EventType::PhaseStarted
                },
                execution.execution_id,
                &execution.workflow_id,
                EventStatus::InProgress,
            )
            .with_phase(&phase_def.phase_id)
            .with_data(json!({
                "completed_steps": completed_list,
                "resumed": resumed,
            })),
        )
        .await;

        let mut suspended = false;

        for step_def in &phase_def.steps {
            if completed_ids.contains(&step_def.step_id) {
                tracing::debug!(
                    step_id = step_def.step_id.as_str(),
                    "skipping completed step on resume"
                );
                continue;
            }

            execution.current_step_id = Some(step_def.step_id.clone());
            let ctx = StepContext {
                execution_id: execution.execution_id,
                workflow_id: execution.workflow_id.clone(),
                phase_id: Some(phase_def.phase_id.clone()),
            };

            let step_execution = self.steps.execute_step(step_def, &ctx).await;
            let step_status = step_execution.status;

            // Replace semantics: the latest attempt is authoritative
            phase
                .step_executions
                .retain(|s| s.step_id != step_def.step_id);
            phase.step_executions.push(step_execution);
            phase
                .step_executions
                .sort_by(|a, b| a.step_id.cmp(&b.step_id));

            match step_status {
                ExecutionStatus::Failed => {
                    let steps_completed = phase
                        .step_executions
                        .iter()
                        .filter(|s| s.status == ExecutionStatus::Completed)
                        .count();
                    self.emit(
                        WorkflowEvent::new(
                            EventType::PhaseFailed,
                            execution.execution_id,
                            &execution.workflow_id,
                            EventStatus::Failed,
                        )
                        .with_phase(&phase_def.phase_id)
                        .with_data(json!({
                            "failed_step_id": step_def.step_id,
                            "steps_completed": steps_completed,
                            "resumed": true,
                        })),
                    )
                    .await;
                    break;
                }
                ExecutionStatus::Paused => {
                    suspended = true;
                    break;
                }
                _ => {}
            }
        }

        // Final phase status is computed from all remembered steps
        let any_failed = phase
            .step_executions
            .iter()
            .any(|s| s.status == ExecutionStatus::Failed);

        let outcome = if suspended {
            phase.status = ExecutionStatus::Paused;
            PhaseOutcome::Paused
        } else if any_failed {
            phase.status = ExecutionStatus::Failed;
            phase.error = phase
                .step_executions
                .iter()
                .rev()
                .find_map(|s| s.error.clone());
            PhaseOutcome::Failed
        } else {
            let completed_at = self.clock.now();
            phase.status = ExecutionStatus::Completed;
            phase.completed_at = Some(completed_at);
            phase.duration_ms =
                Some((completed_at - phase.started_at).num_milliseconds().max(0) as u64);
            self.emit(
                WorkflowEvent::new(
                    EventType::PhaseCompleted,
                    execution.execution_id,
                    &execution.workflow_id,
                    EventStatus::Success,
                )
                .with_phase(&phase_def.phase_id)
                .with_data(json!({
                    "steps_completed": phase.step_executions.len(),
                    "resumed": resumed,
                })),
            )
            .await;
            PhaseOutcome::Completed
        };

        execution.phase_executions.push(phase);
        execution
            .phase_executions
            .sort_by_key(|p| p.phase_number);
        outcome
    }

    /// Mark a phase whose steps all completed in a prior attempt, creating
    /// the record if the snapshot lost it.
    fn mark_phase_completed(
        &self,
        execution: &mut WorkflowExecution,
        phase_def: &WorkflowPhase,
    ) {
        let now = self.clock.now();
        match execution.phase_execution_mut(&phase_def.phase_id) {
            Some(phase) => {
                phase.status = ExecutionStatus::Completed;
                if phase.completed_at.is_none() {
                    phase.completed_at = Some(now);
                }
            }
            None => {
                execution.phase_executions.push(PhaseExecution {
                    phase_id: phase_def.phase_id.clone(),
                    phase_number: phase_def.phase_number,
                    status: ExecutionStatus::Completed,
                    started_at: now,
                    completed_at: Some(now),
                    duration_ms: Some(0),
                    step_executions: Vec::new(),
                    error: None,
                });
                execution
                    .phase_executions
                    .sort_by_key(|p| p.phase_number);
            }
        }
        execution.current_phase_id = Some(phase_def.phase_id.clone());
    }

    // -----------------------------------------------------------------------
    // cancel / lookup
    // -----------------------------------------------------------------------

    /// Cancel a non-terminal execution. Returns `false` when the execution
    /// is unknown or already terminal. The in-flight step (if any) is not
    /// interrupted; the executor adopts the cancellation at its next
    /// scheduling boundary.
    pub async fn cancel_workflow(
        &self,
        execution_id: Uuid,
        reason: Option<&str>,
    ) -> Result<bool, ExecutorError> {
        let Some(mut execution) = self.find_execution(execution_id).await? else {
            tracing::warn!(execution_id = %execution_id, "cannot cancel: execution not found");
            return Ok(false);
        };
        if execution.status.is_terminal() {
            tracing::info!(
                execution_id = %execution_id,
                status = ?execution.status,
                "cannot cancel: execution already terminal"
            );
            return Ok(false);
        }

        execution.status = ExecutionStatus::Cancelled;
        execution.error = Some(reason.unwrap_or("Cancelled by user").to_string());
        self.stamp_completion(&mut execution);

        if let Some(token) = self.cancel_tokens.get(&execution_id) {
            token.cancel();
        }

        self.update_active(&execution);
        self.save_execution_state(&execution).await?;

        self.emit(
            WorkflowEvent::new(
                EventType::WorkflowCancelled,
                execution_id,
                &execution.workflow_id,
                EventStatus::Cancelled,
            )
            .with_error(execution.error.clone().unwrap_or_default())
            .with_data(json!({
                "reason": reason,
                "duration_ms": execution.duration_ms,
            })),
        )
        .await;

        tracing::info!(
            execution_id = %execution_id,
            reason = reason.unwrap_or("none"),
            "workflow execution cancelled"
        );
        Ok(true)
    }

    /// Look up an execution: active map first, then the state repository.
    pub async fn get_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, ExecutorError> {
        self.find_execution(execution_id).await
    }

    /// Executions known to the state repository, optionally filtered by
    /// workflow id.
    pub async fn list_executions(
        &self,
        workflow_id: Option<&str>,
    ) -> Result<Vec<WorkflowExecution>, ExecutorError> {
        let summaries = self
            .state
            .list_states(Some(StateKind::Workflow), 100)
            .await?;

        let mut executions = Vec::new();
        for summary in summaries {
            let Some(snapshot) = self.state.load_state(&summary.state_id).await? else {
                continue;
            };
            match serde_json::from_value::<WorkflowExecution>(snapshot.data) {
                Ok(execution) => {
                    if workflow_id.is_none_or(|w| execution.workflow_id == w) {
                        executions.push(execution);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        state_id = summary.state_id.as_str(),
                        error = %err,
                        "skipping undecodable execution snapshot"
                    );
                }
            }
        }
        Ok(executions)
    }

    // -----------------------------------------------------------------------
    // internals
    // -----------------------------------------------------------------------

    async fn find_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, ExecutorError> {
        if let Some(execution) = self.active.get(&execution_id) {
            return Ok(Some(execution.clone()));
        }
        let Some(snapshot) = self.state.load_state(&execution_id.to_string()).await? else {
            return Ok(None);
        };
        let version = snapshot.version;
        let execution: WorkflowExecution = serde_json::from_value(snapshot.data)
            .map_err(|e| StateStoreError::Serialization(e.to_string()))?;
        self.state_versions.insert(execution_id, version);
        Ok(Some(execution))
    }

    fn update_active(&self, execution: &WorkflowExecution) {
        self.active
            .insert(execution.execution_id, execution.clone());
    }

    /// True when the execution was cancelled out-of-band; merges the
    /// cancellation decision into the local copy.
    fn adopt_cancellation(&self, execution: &mut WorkflowExecution) -> bool {
        let cancelled = self
            .cancel_tokens
            .get(&execution.execution_id)
            .is_some_and(|t| t.is_cancelled());
        if !cancelled {
            return false;
        }
        if let Some(latest) = self.active.get(&execution.execution_id) {
            execution.status = latest.status;
            execution.error = latest.error.clone();
            execution.completed_at = latest.completed_at;
            execution.duration_ms = latest.duration_ms;
        } else {
            execution.status = ExecutionStatus::Cancelled;
        }
        tracing::info!(
            execution_id = %execution.execution_id,
            "adopting cancellation at scheduling boundary"
        );
        true
    }

    fn stamp_completion(&self, execution: &mut WorkflowExecution) {
        let completed_at = self.clock.now();
        execution.completed_at = Some(completed_at);
        execution.duration_ms =
            Some((completed_at - execution.started_at).num_milliseconds().max(0) as u64);
    }

    fn last_step_error(&self, execution: &WorkflowExecution) -> Option<String> {
        execution
            .phase_executions
            .last()?
            .step_executions
            .iter()
            .rev()
            .find_map(|s| s.error.clone())
    }

    /// Terminal failure bookkeeping shared by the phase-failure and
    /// definition-load paths: stamp, dead-letter, emit `workflow_failed`.
    async fn fail_execution(
        &self,
        execution: &mut WorkflowExecution,
        error: String,
        error_type: &str,
    ) {
        execution.status = ExecutionStatus::Failed;
        execution.error = Some(error.clone());
        if execution.completed_at.is_none() {
            execution.completed_at = Some(self.clock.now());
        }

        self.handle_workflow_failure(execution, &error).await;

        self.emit(
            WorkflowEvent::new(
                EventType::WorkflowFailed,
                execution.execution_id,
                &execution.workflow_id,
                EventStatus::Failed,
            )
            .with_error(&error)
            .with_data(json!({
                "error_type": error_type,
                "phases_completed": execution.phase_executions.len(),
            })),
        )
        .await;
    }

    /// Push a dead-letter record for a failed execution. Best effort.
    async fn handle_workflow_failure(&self, execution: &WorkflowExecution, error: &str) {
        let agent_id = execution
            .current_step_id
            .clone()
            .unwrap_or_else(|| execution.workflow_id.clone());
        let attempts = execution
            .metadata
            .get("attempts")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(1) as u32;

        let context = HashMap::from([
            ("workflow_id".to_string(), json!(execution.workflow_id)),
            (
                "execution_id".to_string(),
                json!(execution.execution_id.to_string()),
            ),
            (
                "workflow_version".to_string(),
                json!(execution.workflow_version),
            ),
            (
                "current_phase_id".to_string(),
                json!(execution.current_phase_id),
            ),
            (
                "current_step_id".to_string(),
                json!(execution.current_step_id),
            ),
            (
                "phases_completed".to_string(),
                json!(execution.phase_executions.len()),
            ),
            (
                "started_at".to_string(),
                json!(crate::clock::format_utc(execution.started_at)),
            ),
            (
                "completed_at".to_string(),
                json!(execution.completed_at.map(crate::clock::format_utc)),
            ),
        ]);

        let task = failed_task_from_error(
            execution.execution_id.to_string(),
            agent_id,
            Some(execution.workflow_id.clone()),
            error,
            attempts,
            context,
            self.clock.now(),
        );

        if let Err(err) = self.dlq.add_failed_task(&task).await {
            tracing::error!(
                execution_id = %execution.execution_id,
                error = %err,
                "failed to push workflow failure to dead-letter queue"
            );
        } else {
            tracing::info!(
                execution_id = %execution.execution_id,
                "workflow failure recorded in dead-letter queue"
            );
        }
    }

    async fn save_execution_state(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), StateStoreError> {
        let version = self
            .state_versions
            .get(&execution.execution_id)
            .map(|v| *v)
            .unwrap_or(0);
        let data = serde_json::to_value(execution)
            .map_err(|e| StateStoreError::Serialization(e.to_string()))?;

        let mut snapshot = StateSnapshot::new(
            execution.execution_id.to_string(),
            StateKind::Workflow,
            data,
        );
        snapshot.version = version;

        let saved = self.state.save_state(snapshot).await?;
        self.state_versions
            .insert(execution.execution_id, saved.version);
        Ok(())
    }

    async fn emit(&self, event: WorkflowEvent) {
        emit_event_safe(self.events.as_ref(), &self.bus, event).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
