//! Handoff generation, validation, and file persistence.
//!
//! A handoff is built from a completed step whose definition names a target
//! agent. Validation collects every problem instead of short-circuiting;
//! `save` requires a clean validation and writes the record as pretty JSON
//! with sorted keys. The executor catches and logs handoff failures without
//! failing the workflow.

use std::path::PathBuf;
use std::sync::Arc;

use agentflow_types::execution::StepExecution;
use agentflow_types::handoff::{HandoffKind, HandoffRecord, HandoffStatus};
use agentflow_types::workflow::{HandoffMode, WorkflowStep};
use thiserror::Error;
use uuid::Uuid;

use crate::agent::AgentCatalog;
use crate::clock::{Clock, parse_utc};

/// Errors from handoff generation and persistence.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("step '{0}' has no handoff target")]
    MissingTarget(String),

    #[error("handoff validation failed: {0}")]
    Validation(String),

    #[error("failed to write handoff file {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

/// Builds and persists handoff records.
pub struct HandoffGenerator<C: AgentCatalog> {
    catalog: Arc<C>,
    handoffs_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl<C: AgentCatalog> HandoffGenerator<C> {
    pub fn new(catalog: Arc<C>, handoffs_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog,
            handoffs_dir: handoffs_dir.into(),
            clock,
        }
    }

    /// Build a handoff record from a completed step.
    ///
    /// The step's `HandoffMode` maps onto the protocol kind: `OnError`
    /// becomes `ErrorRecovery`, everything else is `Standard`.
    pub fn generate(
        &self,
        step: &WorkflowStep,
        step_execution: &StepExecution,
    ) -> Result<HandoffRecord, HandoffError> {
        let to_agent = step
            .handoff_to
            .clone()
            .ok_or_else(|| HandoffError::MissingTarget(step.step_id.clone()))?;

        let kind = match step.handoff_mode {
            HandoffMode::OnError => HandoffKind::ErrorRecovery,
            HandoffMode::Always | HandoffMode::Conditional | HandoffMode::Never => {
                HandoffKind::Standard
            }
        };

        let output = &step_execution.output_data;
        let work_summary = output
            .get("summary")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| step.description.clone());

        let deliverables = match output.get("deliverables") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            Some(serde_json::Value::Null) | None => Vec::new(),
            Some(single) => vec![single.clone()],
        };

        let blockers = match output.get("blockers") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let notes = output
            .get("notes")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .or_else(|| step.handoff_criteria.clone());

        let record = HandoffRecord {
            handoff_id: Uuid::new_v4().to_string(),
            from_agent: step
                .agent_id
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            to_agent,
            timestamp: self.clock.now_string(),
            handoff_type: kind,
            status: HandoffStatus::Pending,
            work_summary,
            deliverables,
            blockers,
            notes,
        };

        tracing::info!(
            handoff_id = record.handoff_id.as_str(),
            from = record.from_agent.as_str(),
            to = record.to_agent.as_str(),
            "generated handoff"
        );

        Ok(record)
    }

    /// Validate a record against the handoff protocol. Returns every
    /// violation found, empty when valid.
    pub fn validate(&self, record: &HandoffRecord) -> Vec<String> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("handoff_id", &record.handoff_id),
            ("from_agent", &record.from_agent),
            ("to_agent", &record.to_agent),
            ("timestamp", &record.timestamp),
        ] {
            if value.is_empty() {
                errors.push(format!("Missing required field: {field}"));
            }
        }

        if !record.from_agent.is_empty() && !self.catalog.exists(&record.from_agent) {
            errors.push(format!("Source agent does not exist: {}", record.from_agent));
        }
        if !record.to_agent.is_empty() && !self.catalog.exists(&record.to_agent) {
            errors.push(format!("Target agent does not exist: {}", record.to_agent));
        }

        if !record.timestamp.is_empty() && parse_utc(&record.timestamp).is_err() {
            errors.push(format!(
                "Invalid timestamp format: {}. Must be ISO 8601",
                record.timestamp
            ));
        }

        if !record.handoff_id.is_empty() && Uuid::parse_str(&record.handoff_id).is_err() {
            errors.push(format!(
                "Invalid handoff_id format: {}. Must be a valid UUID",
                record.handoff_id
            ));
        }

        errors
    }

    /// Validate and write the record to `<handoffs_dir>/<handoff_id>.json`
    /// as pretty JSON with sorted keys. Returns the file path.
    pub async fn save(&self, record: &HandoffRecord) -> Result<PathBuf, HandoffError> {
        let errors = self.validate(record);
        if !errors.is_empty() {
            return Err(HandoffError::Validation(errors.join("; ")));
        }

        tokio::fs::create_dir_all(&self.handoffs_dir)
            .await
            .map_err(|e| HandoffError::Io {
                path: self.handoffs_dir.clone(),
                message: e.to_string(),
            })?;

        let path = self.handoffs_dir.join(format!("{}.json", record.handoff_id));
        // Through Value so object keys serialize sorted
        let value = serde_json::to_value(record).map_err(|e| HandoffError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let json = serde_json::to_string_pretty(&value).map_err(|e| HandoffError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;

        tokio::fs::write(&path, json)
            .await
            .map_err(|e| HandoffError::Io {
                path: path.clone(),
                message: e.to_string(),
            })?;

        tracing::info!(
            handoff_id = record.handoff_id.as_str(),
            path = %path.display(),
            "saved handoff file"
        );

        Ok(path)
    }

    /// Generate, validate, and persist in one call.
    pub async fn generate_and_save(
        &self,
        step: &WorkflowStep,
        step_execution: &StepExecution,
    ) -> Result<(HandoffRecord, PathBuf), HandoffError> {
        let record = self.generate(step, step_execution)?;
        let path = self.save(&record).await?;
        Ok((record, path))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, parse_utc as parse};
    use agentflow_types::execution::ExecutionStatus;
    use agentflow_types::workflow::StepType;
    use serde_json::json;
    use std::collections::HashMap;

    struct StaticCatalog(Vec<&'static str>);

    impl AgentCatalog for StaticCatalog {
        fn exists(&self, agent_id: &str) -> bool {
            self.0.contains(&agent_id)
        }
        fn agent_ids(&self) -> Vec<String> {
            self.0.iter().map(|s| s.to_string()).collect()
        }
    }

    fn generator(dir: &std::path::Path) -> HandoffGenerator<StaticCatalog> {
        HandoffGenerator::new(
            Arc::new(StaticCatalog(vec!["agent-1", "agent-2", "backend"])),
            dir,
            Arc::new(ManualClock::new(parse("2025-06-01T12:00:00Z").unwrap())),
        )
    }

    fn step_with_handoff() -> WorkflowStep {
        WorkflowStep {
            step_id: "phase_1_step_1".to_string(),
            step_number: 1,
            name: "Build".to_string(),
            description: "Build the thing".to_string(),
            step_type: StepType::Agent,
            agent_id: Some("agent-1".to_string()),
            script_path: None,
            input_data: HashMap::new(),
            handoff_to: Some("agent-2".to_string()),
            handoff_mode: HandoffMode::Always,
            handoff_criteria: Some("contract frozen".to_string()),
            is_mandatory: false,
            conditions: vec![],
            metadata: HashMap::new(),
        }
    }

    fn completed_step(output: HashMap<String, serde_json::Value>) -> StepExecution {
        StepExecution {
            step_id: "phase_1_step_1".to_string(),
            status: ExecutionStatus::Completed,
            output_data: output,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: Some(10),
        }
    }

    #[test]
    fn generates_standard_handoff_from_output() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path());
        let output = HashMap::from([
            ("summary".to_string(), json!("done")),
            ("deliverables".to_string(), json!(["file1.txt"])),
        ]);

        let record = generator
            .generate(&step_with_handoff(), &completed_step(output))
            .unwrap();

        assert_eq!(record.from_agent, "agent-1");
        assert_eq!(record.to_agent, "agent-2");
        assert_eq!(record.handoff_type, HandoffKind::Standard);
        assert_eq!(record.status, HandoffStatus::Pending);
        assert_eq!(record.work_summary, "done");
        assert_eq!(record.deliverables, vec![json!("file1.txt")]);
        assert_eq!(record.timestamp, "2025-06-01T12:00:00.000Z");
        assert!(Uuid::parse_str(&record.handoff_id).is_ok());
    }

    #[test]
    fn summary_falls_back_to_description_and_notes_to_criteria() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path());
        let record = generator
            .generate(&step_with_handoff(), &completed_step(HashMap::new()))
            .unwrap();
        assert_eq!(record.work_summary, "Build the thing");
        assert_eq!(record.notes.as_deref(), Some("contract frozen"));
        assert!(record.deliverables.is_empty());
    }

    #[test]
    fn scalar_deliverable_coerced_to_list() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path());
        let output = HashMap::from([("deliverables".to_string(), json!("report.pdf"))]);
        let record = generator
            .generate(&step_with_handoff(), &completed_step(output))
            .unwrap();
        assert_eq!(record.deliverables, vec![json!("report.pdf")]);
    }

    #[test]
    fn on_error_maps_to_error_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path());
        let mut step = step_with_handoff();
        step.handoff_mode = HandoffMode::OnError;
        let record = generator
            .generate(&step, &completed_step(HashMap::new()))
            .unwrap();
        assert_eq!(record.handoff_type, HandoffKind::ErrorRecovery);
    }

    #[test]
    fn missing_agent_id_becomes_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path());
        let mut step = step_with_handoff();
        step.agent_id = None;
        let record = generator
            .generate(&step, &completed_step(HashMap::new()))
            .unwrap();
        assert_eq!(record.from_agent, "unknown");
    }

    #[test]
    fn validation_collects_all_errors() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path());
        let record = HandoffRecord {
            handoff_id: "not-a-uuid".to_string(),
            from_agent: "ghost".to_string(),
            to_agent: String::new(),
            timestamp: "yesterday".to_string(),
            handoff_type: HandoffKind::Standard,
            status: HandoffStatus::Pending,
            work_summary: String::new(),
            deliverables: vec![],
            blockers: vec![],
            notes: None,
        };

        let errors = generator.validate(&record);
        assert!(errors.iter().any(|e| e.contains("to_agent")));
        assert!(errors.iter().any(|e| e.contains("Source agent does not exist")));
        assert!(errors.iter().any(|e| e.contains("Invalid timestamp")));
        assert!(errors.iter().any(|e| e.contains("Invalid handoff_id")));
        assert_eq!(errors.len(), 4);
    }

    #[tokio::test]
    async fn save_rejects_invalid_record() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path());
        let mut step = step_with_handoff();
        step.handoff_to = Some("nonexistent-agent".to_string());
        let record = generator
            .generate(&step, &completed_step(HashMap::new()))
            .unwrap();

        let err = generator.save(&record).await.unwrap_err();
        assert!(matches!(err, HandoffError::Validation(_)));
        assert!(err.to_string().contains("Target agent does not exist"));
    }

    #[tokio::test]
    async fn save_writes_sorted_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let generator = generator(dir.path());
        let record = generator
            .generate(&step_with_handoff(), &completed_step(HashMap::new()))
            .unwrap();

        let path = generator.save(&record).await.unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("{}.json", record.handoff_id)
        );

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HandoffRecord = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.handoff_id, record.handoff_id);
        // sorted keys: deliverables before from_agent before timestamp
        let d = contents.find("\"deliverables\"").unwrap();
        let f = contents.find("\"from_agent\"").unwrap();
        let t = contents.find("\"timestamp\"").unwrap();
        assert!(d < f && f < t);
    }
}
