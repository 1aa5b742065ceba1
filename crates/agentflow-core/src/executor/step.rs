//! Step executor: runs one step with a timeout, emitting lifecycle events.
//!
//! Dispatch is by step type. Agent steps go through the per-agent circuit
//! breaker and a bounded wait; script steps spawn a subprocess; condition
//! steps evaluate a placeholder; manual steps suspend the workflow. Steps
//! run serially within one execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentflow_types::agent::{AgentRequest, InvocationStatus};
use agentflow_types::event::{EventStatus, EventType, WorkflowEvent};
use agentflow_types::execution::{ExecutionStatus, StepExecution};
use agentflow_types::workflow::{StepType, WorkflowStep};
use serde_json::json;
use uuid::Uuid;

use crate::agent::AgentInvoker;
use crate::bus::EventBus;
use crate::clock::Clock;
use crate::recovery::{CircuitBreakerError, CircuitBreakers};
use crate::repository::events::EventStore;

use super::emit_event_safe;

/// Safety ceiling for script subprocesses, applied on top of the step
/// timeout.
const SCRIPT_SAFETY_TIMEOUT_SECS: u64 = 3600;

/// Per-step execution context.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub phase_id: Option<String>,
}

enum StepOutcome {
    Completed(HashMap<String, serde_json::Value>),
    Failed(String),
    Paused,
}

/// Executes individual workflow steps.
pub struct StepExecutor<E: EventStore, A: AgentInvoker> {
    events: Arc<E>,
    invoker: Arc<A>,
    clock: Arc<dyn Clock>,
    breakers: Arc<CircuitBreakers>,
    bus: EventBus,
}

impl<E: EventStore, A: AgentInvoker> StepExecutor<E, A> {
    pub fn new(
        events: Arc<E>,
        invoker: Arc<A>,
        clock: Arc<dyn Clock>,
        breakers: Arc<CircuitBreakers>,
        bus: EventBus,
    ) -> Self {
        Self {
            events,
            invoker,
            clock,
            breakers,
            bus,
        }
    }

    /// Run one step to completion (or failure, or suspension for manual
    /// steps), emitting `step_started` and the matching terminal event.
    pub async fn execute_step(&self, step: &WorkflowStep, ctx: &StepContext) -> StepExecution {
        let mut started = WorkflowEvent::new(
            EventType::StepStarted,
            ctx.execution_id,
            &ctx.workflow_id,
            EventStatus::InProgress,
        )
        .with_step(&step.step_id);
        if let Some(phase_id) = &ctx.phase_id {
            started = started.with_phase(phase_id);
        }
        if let Some(agent_id) = &step.agent_id {
            started = started.with_agent(agent_id);
        }
        emit_event_safe(self.events.as_ref(), &self.bus, started).await;

        let started_at = self.clock.now();
        let timer = Instant::now();

        let outcome = match step.step_type {
            StepType::Agent => self.run_agent_step(step, ctx).await,
            StepType::Script => self.run_script_step(step).await,
            StepType::Condition => self.run_condition_step(step),
            StepType::Manual => StepOutcome::Paused,
        };

        let duration_ms = timer.elapsed().as_millis() as u64;
        let completed_at = self.clock.now();

        match outcome {
            StepOutcome::Completed(output_data) => {
                let mut completed = WorkflowEvent::new(
                    EventType::StepCompleted,
                    ctx.execution_id,
                    &ctx.workflow_id,
                    EventStatus::Success,
                )
                .with_step(&step.step_id)
                .with_data(json!({"output": output_data}));
                if let Some(phase_id) = &ctx.phase_id {
                    completed = completed.with_phase(phase_id);
                }
                if let Some(agent_id) = &step.agent_id {
                    completed = completed.with_agent(agent_id);
                }
                emit_event_safe(self.events.as_ref(), &self.bus, completed).await;

                StepExecution {
                    step_id: step.step_id.clone(),
                    status: ExecutionStatus::Completed,
                    output_data,
                    error: None,
                    started_at: Some(started_at),
                    completed_at: Some(completed_at),
                    duration_ms: Some(duration_ms),
                }
            }
            StepOutcome::Failed(error) => {
                tracing::warn!(
                    step_id = step.step_id.as_str(),
                    error = error.as_str(),
                    "step failed"
                );
                let mut failed = WorkflowEvent::new(
                    EventType::StepFailed,
                    ctx.execution_id,
                    &ctx.workflow_id,
                    EventStatus::Failed,
                )
                .with_step(&step.step_id)
                .with_error(&error);
                if let Some(phase_id) = &ctx.phase_id {
                    failed = failed.with_phase(phase_id);
                }
                if let Some(agent_id) = &step.agent_id {
                    failed = failed.with_agent(agent_id);
                }
                emit_event_safe(self.events.as_ref(), &self.bus, failed).await;

                StepExecution {
                    step_id: step.step_id.clone(),
                    status: ExecutionStatus::Failed,
                    output_data: HashMap::new(),
                    error: Some(error),
                    started_at: Some(started_at),
                    completed_at: Some(completed_at),
                    duration_ms: Some(duration_ms),
                }
            }
            // Manual gate: suspension, not a terminal state, so no
            // completed/failed event
            StepOutcome::Paused => StepExecution {
                step_id: step.step_id.clone(),
                status: ExecutionStatus::Paused,
                output_data: HashMap::new(),
                error: None,
                started_at: Some(started_at),
                completed_at: None,
                duration_ms: None,
            },
        }
    }

    async fn run_agent_step(&self, step: &WorkflowStep, ctx: &StepContext) -> StepOutcome {
        let Some(agent_id) = step.agent_id.clone() else {
            return StepOutcome::Failed("agent step is missing an agent id".to_string());
        };

        let mut input_data = step.input_data.clone();
        input_data.insert("execution_id".to_string(), json!(ctx.execution_id.to_string()));
        input_data.insert("workflow_id".to_string(), json!(ctx.workflow_id));
        input_data.insert("step_id".to_string(), json!(step.step_id));

        let request = AgentRequest {
            agent_id: agent_id.clone(),
            request_id: ctx.execution_id.to_string(),
            workflow_id: ctx.workflow_id.clone(),
            input_data,
        };

        let timeout_secs = step.timeout_seconds();
        let breaker = self.breakers.get(&format!("agent:{agent_id}"));
        let invoker = Arc::clone(&self.invoker);

        let call = breaker.call(|| async move { invoker.execute_agent(request).await });

        match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
            Err(_elapsed) => {
                StepOutcome::Failed(format!("Step timed out after {timeout_secs} seconds"))
            }
            Ok(Err(open @ CircuitBreakerError::Open { .. })) => {
                StepOutcome::Failed(open.to_string())
            }
            Ok(Err(CircuitBreakerError::Inner(err))) => StepOutcome::Failed(err.to_string()),
            Ok(Ok(invocation)) => match invocation.status {
                InvocationStatus::Success | InvocationStatus::Handoff => {
                    StepOutcome::Completed(invocation.output_data)
                }
                InvocationStatus::Failed => StepOutcome::Failed(
                    invocation
                        .error
                        .unwrap_or_else(|| format!("agent '{agent_id}' reported failure")),
                ),
                InvocationStatus::Blocked => StepOutcome::Failed(
                    invocation
                        .error
                        .unwrap_or_else(|| format!("agent '{agent_id}' is blocked")),
                ),
            },
        }
    }

    async fn run_script_step(&self, step: &WorkflowStep) -> StepOutcome {
        let Some(script_path) = step.script_path.clone() else {
            return StepOutcome::Failed("script step is missing a script path".to_string());
        };

        let timeout_secs = step.timeout_seconds().min(SCRIPT_SAFETY_TIMEOUT_SECS);
        let output = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            tokio::process::Command::new(&script_path)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match output {
            Err(_elapsed) => {
                StepOutcome::Failed(format!("Script step timed out after {timeout_secs} seconds"))
            }
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                StepOutcome::Failed(format!("script not found: {script_path}"))
            }
            Ok(Err(err)) => {
                StepOutcome::Failed(format!("failed to run script {script_path}: {err}"))
            }
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                StepOutcome::Completed(HashMap::from([
                    ("stdout".to_string(), json!(stdout)),
                    ("exit_code".to_string(), json!(0)),
                ]))
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let code = output.status.code().unwrap_or(-1);
                StepOutcome::Failed(format!("script exited with status {code}: {stderr}"))
            }
        }
    }

    // Placeholder evaluation until a real condition engine lands; the result
    // shape is stable.
    fn run_condition_step(&self, step: &WorkflowStep) -> StepOutcome {
        let condition_result = true;
        tracing::debug!(
            step_id = step.step_id.as_str(),
            conditions = step.conditions.len(),
            condition_result,
            "evaluated condition step"
        );
        StepOutcome::Completed(HashMap::from([(
            "condition_result".to_string(),
            json!(condition_result),
        )]))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
