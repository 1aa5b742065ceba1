//! Workflow definition types.
//!
//! A `WorkflowDefinition` is the parsed, runtime-immutable form of a markdown
//! workflow file: metadata, ordered phases, ordered steps within each phase,
//! plus the trailing rule/criteria sections. The parser in `agentflow-core`
//! is the only producer; executors treat definitions as read-only.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default per-step timeout when the definition does not carry one.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 3600;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A parsed workflow definition. Immutable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable slug derived from the source filename (`-` mapped to `_`).
    pub workflow_id: String,
    /// Display name (first H1 of the source document).
    pub name: String,
    /// Body of the `## Overview` section.
    #[serde(default)]
    pub description: String,
    /// Header metadata (version, status, priority).
    pub metadata: WorkflowMetadata,
    /// Ordered phases.
    pub phases: Vec<WorkflowPhase>,
    /// Rule sets from the `## Workflow Rules` section.
    #[serde(default)]
    pub rules: Vec<WorkflowRule>,
    /// Error scenarios from `## Error Handling` (scenario name -> guidance).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub error_handling: HashMap<String, String>,
    /// Checklist items from `## Success Criteria`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_criteria: Vec<String>,
    /// Key/value pairs from `## Metrics`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, String>,
    /// Contents of the first ```mermaid``` fenced block, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mermaid_diagram: Option<String>,
    /// Path of the source file this definition was parsed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl WorkflowDefinition {
    /// Look up a phase by id.
    pub fn phase(&self, phase_id: &str) -> Option<&WorkflowPhase> {
        self.phases.iter().find(|p| p.phase_id == phase_id)
    }

    /// Total number of steps across all phases.
    pub fn step_count(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }
}

/// Header metadata parsed from the bold-tag lines at the top of the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Declared version (defaults to "1.0").
    pub version: String,
    /// Free-form last-updated string (empty when absent).
    #[serde(default)]
    pub last_updated: String,
    /// Declared status (defaults to "Active").
    pub status: String,
    /// Declared priority (defaults to "Standard").
    pub priority: String,
}

impl Default for WorkflowMetadata {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            last_updated: String::new(),
            status: "Active".to_string(),
            priority: "Standard".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// An ordered container of steps sharing a lifecycle boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPhase {
    /// `phase_<N>`, N assigned in encounter order starting at 1.
    pub phase_id: String,
    /// 1-based, contiguous phase number (the source's written number is
    /// informational only).
    pub phase_number: u32,
    /// Phase display name.
    pub name: String,
    /// Generated description.
    #[serde(default)]
    pub description: String,
    /// Estimated duration parsed from the heading, in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_minutes: Option<u32>,
    /// Ordered steps.
    pub steps: Vec<WorkflowStep>,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// The smallest schedulable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// `phase_<N>_step_<M>`, unique within a workflow.
    pub step_id: String,
    /// 1-based step number within the phase.
    pub step_number: u32,
    /// Step display name.
    pub name: String,
    /// Text between this step's header line and the next step/phase.
    #[serde(default)]
    pub description: String,
    /// What kind of work this step performs.
    pub step_type: StepType,
    /// Normalized agent id for `StepType::Agent` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Script path/name for `StepType::Script` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
    /// Static input bag merged into the agent invocation input.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_data: HashMap<String, serde_json::Value>,
    /// Target agent slug if this step hands off on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_to: Option<String>,
    /// When the handoff fires.
    #[serde(default)]
    pub handoff_mode: HandoffMode,
    /// Free-text criteria captured for conditional handoffs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_criteria: Option<String>,
    /// Whether the step may be skipped.
    #[serde(default)]
    pub is_mandatory: bool,
    /// Conditional branches extracted from `{...}` expressions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<WorkflowCondition>,
    /// Extensible metadata; `timeout_seconds` is read from here.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowStep {
    /// Resolve the per-step timeout: `metadata.timeout_seconds` or the
    /// engine default.
    pub fn timeout_seconds(&self) -> u64 {
        self.metadata
            .get("timeout_seconds")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(DEFAULT_STEP_TIMEOUT_SECS)
    }
}

/// The kind of work a step performs. Dispatch is by variant, never by
/// string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Agent,
    Script,
    Condition,
    Manual,
}

/// When a step's handoff fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffMode {
    #[default]
    Always,
    Conditional,
    OnError,
    Never,
}

/// A conditional branch extracted from a `{...}` expression in a step body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCondition {
    pub condition_id: String,
    pub description: String,
    pub expression: String,
}

/// A rule set from the `## Workflow Rules` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRule {
    /// "mandatory", "conditional", or "handoff_criteria".
    pub rule_type: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_step() -> WorkflowStep {
        WorkflowStep {
            step_id: "phase_1_step_1".to_string(),
            step_number: 1,
            name: "Implement API".to_string(),
            description: "Build the endpoint. Hands off to frontend.".to_string(),
            step_type: StepType::Agent,
            agent_id: Some("backend".to_string()),
            script_path: None,
            input_data: HashMap::new(),
            handoff_to: Some("frontend".to_string()),
            handoff_mode: HandoffMode::Always,
            handoff_criteria: None,
            is_mandatory: true,
            conditions: vec![],
            metadata: HashMap::from([("timeout_seconds".to_string(), json!(120))]),
        }
    }

    #[test]
    fn step_timeout_from_metadata() {
        let step = sample_step();
        assert_eq!(step.timeout_seconds(), 120);
    }

    #[test]
    fn step_timeout_defaults() {
        let mut step = sample_step();
        step.metadata.clear();
        assert_eq!(step.timeout_seconds(), DEFAULT_STEP_TIMEOUT_SECS);
    }

    #[test]
    fn step_type_serde_snake_case() {
        for (ty, tag) in [
            (StepType::Agent, "\"agent\""),
            (StepType::Script, "\"script\""),
            (StepType::Condition, "\"condition\""),
            (StepType::Manual, "\"manual\""),
        ] {
            assert_eq!(serde_json::to_string(&ty).unwrap(), tag);
            let parsed: StepType = serde_json::from_str(tag).unwrap();
            assert_eq!(parsed, ty);
        }
    }

    #[test]
    fn handoff_mode_defaults_to_always() {
        assert_eq!(HandoffMode::default(), HandoffMode::Always);
        let json = serde_json::to_string(&HandoffMode::OnError).unwrap();
        assert_eq!(json, "\"on_error\"");
    }

    #[test]
    fn definition_json_roundtrip() {
        let def = WorkflowDefinition {
            workflow_id: "feature_development".to_string(),
            name: "Feature Development".to_string(),
            description: "End-to-end feature flow".to_string(),
            metadata: WorkflowMetadata::default(),
            phases: vec![WorkflowPhase {
                phase_id: "phase_1".to_string(),
                phase_number: 1,
                name: "Build".to_string(),
                description: "Phase 1: Build".to_string(),
                estimated_duration_minutes: Some(90),
                steps: vec![sample_step()],
            }],
            rules: vec![WorkflowRule {
                rule_type: "mandatory".to_string(),
                description: "Mandatory steps that cannot be skipped".to_string(),
                step_ids: vec!["Implement API".to_string()],
                conditions: vec![],
            }],
            error_handling: HashMap::new(),
            success_criteria: vec!["All tests pass".to_string()],
            metrics: HashMap::new(),
            mermaid_diagram: None,
            source_path: Some("workflows/feature-development.md".to_string()),
        };

        let json = serde_json::to_string_pretty(&def).unwrap();
        let parsed: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.workflow_id, "feature_development");
        assert_eq!(parsed.step_count(), 1);
        assert_eq!(parsed.phase("phase_1").unwrap().phase_number, 1);
        assert!(parsed.phase("phase_9").is_none());
        assert_eq!(parsed.metadata.version, "1.0");
    }
}
