//! Markdown workflow definition parser.
//!
//! The definition format is a markdown document with well-known sections,
//! so the parser is contract-driven rather than grammar-driven: a single
//! pass over the lines feeds a small state machine (preamble -> sections ->
//! phase -> steps), and the recognised patterns are matched per line.
//!
//! The parser is tolerant: missing optional sections yield empty
//! collections and unknown agent references become best-effort slugs. The
//! only fatal error is a missing file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use agentflow_types::workflow::{
    HandoffMode, StepType, WorkflowCondition, WorkflowDefinition, WorkflowMetadata, WorkflowPhase,
    WorkflowRule, WorkflowStep,
};
use regex::Regex;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Line patterns
// ---------------------------------------------------------------------------

static META_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*\*(Version|Last Updated|Status|Priority)\*\*:\s*(.+)$").unwrap());
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\s+(.+)$").unwrap());
static PHASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^###\s+Phase\s+(\d+):\s*(.*?)\s*\(([^)]+)\)\s*$").unwrap());
static STEP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.\s+\*\*(.+?)\*\*\s*→\s*(.+?)\s*$").unwrap());
static HANDOFF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)hands?\s+off\s+to\s+([^\n,.]+)").unwrap());
static HANDOFF_ARTIFACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*|\([^)]*\)|→").unwrap());
static NON_SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9-]").unwrap());
static DASH_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());
static BRACE_CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^}]+)\}").unwrap());
static CRITERIA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:if|when)\s+([^\n,.]+)").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());
static BOLD_KV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-\s+\*\*(.+?)\*\*:\s*(.+)$").unwrap());
static MANDATORY_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"✅\s+(.+)").unwrap());
static CONDITIONAL_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"⚠️\s+(.+)").unwrap());
static SUCCESS_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-\s+✅\s+(.+)$").unwrap());

/// Canonical agent-name aliases, longest phrase first so a reference like
/// "Requirements Analyst Agent" never half-matches a shorter entry.
static AGENT_ALIASES: LazyLock<Vec<(&'static str, &'static str)>> = LazyLock::new(|| {
    let mut aliases = vec![
        ("planner agent", "planner"),
        ("planner", "planner"),
        ("requirements analyst agent", "requirements-analyst"),
        ("requirements analyst", "requirements-analyst"),
        ("system architect agent", "system-architect"),
        ("system architect", "system-architect"),
        ("backend agent", "backend"),
        ("backend", "backend"),
        ("frontend agent", "frontend"),
        ("frontend", "frontend"),
        ("senior frontend developer", "senior-frontend-developer"),
        ("fullstack agent", "fullstack"),
        ("fullstack", "fullstack"),
        ("api contract agent", "api-contract"),
        ("api contract", "api-contract"),
        ("test manager", "test-manager"),
        ("code review agent", "code-review"),
        ("code review", "code-review"),
        ("security review agent", "security-review"),
        ("security review", "security-review"),
        ("documentation agent", "documentation"),
        ("documentation", "documentation"),
        ("garbage collection agent", "garbage-collection"),
        ("garbage collection", "garbage-collection"),
        ("version controller", "version-controller"),
        ("prompt engineer agent", "prompt-engineer"),
        ("prompt engineer", "prompt-engineer"),
        ("knowledge specialist agent", "knowledge-specialist"),
        ("knowledge specialist", "knowledge-specialist"),
        ("researcher agent", "researcher"),
        ("researcher", "researcher"),
        ("agent quality agent", "agent-quality"),
        ("agent quality", "agent-quality"),
        ("bug collector", "bug-collector"),
        ("debug agent", "debug-agent"),
        ("fix agent", "fix-agent"),
    ];
    aliases.sort_by_key(|(phrase, _)| std::cmp::Reverse(phrase.len()));
    aliases
});

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal parser failures. Everything structural is tolerated.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("workflow file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read workflow file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parses workflow definitions from markdown files in a workflows directory.
pub struct WorkflowParser {
    workflows_dir: PathBuf,
}

impl WorkflowParser {
    pub fn new(workflows_dir: impl Into<PathBuf>) -> Self {
        let workflows_dir = workflows_dir.into();
        if !workflows_dir.exists() {
            tracing::warn!(
                dir = %workflows_dir.display(),
                "workflows directory not found"
            );
        }
        Self { workflows_dir }
    }

    pub fn workflows_dir(&self) -> &Path {
        &self.workflows_dir
    }

    /// All workflow definition files in the directory, sorted by name.
    pub fn list_workflows(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.workflows_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        files.sort();
        files
    }

    /// Load a definition by workflow id: `<dir>/<id>.md`, falling back to
    /// the hyphenated filename.
    pub async fn load_workflow(&self, workflow_id: &str) -> Result<WorkflowDefinition, ParseError> {
        let primary = self.workflows_dir.join(format!("{workflow_id}.md"));
        if primary.exists() {
            return self.parse_file(&primary).await;
        }
        let hyphenated = self
            .workflows_dir
            .join(format!("{}.md", workflow_id.replace('_', "-")));
        if hyphenated.exists() {
            return self.parse_file(&hyphenated).await;
        }
        Err(ParseError::NotFound(primary))
    }

    /// Parse a definition from a markdown file.
    pub async fn parse_file(&self, path: &Path) -> Result<WorkflowDefinition, ParseError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ParseError::NotFound(path.to_path_buf())
            } else {
                ParseError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        // workflow_id is derived from the filename stem, `-` mapped to `_`
        let workflow_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().replace('-', "_"))
            .unwrap_or_else(|| "unknown_workflow".to_string());

        Ok(self.parse_document(&content, &workflow_id, Some(path)))
    }

    /// Parse a definition from markdown text.
    pub fn parse_document(
        &self,
        content: &str,
        workflow_id: &str,
        source_path: Option<&Path>,
    ) -> WorkflowDefinition {
        let scan = scan_document(content);

        let mut phases = Vec::new();
        let mut phase_number = 1u32;
        for block in &scan.phase_blocks {
            let body = block.body.join("\n");
            // "#### Phase" inside the body marks a documentation subsection,
            // not a runnable phase
            if body.contains("#### Phase") {
                tracing::debug!(phase = block.written_number, "skipping phase subsection");
                continue;
            }
            let steps = parse_steps(&block.body, phase_number);
            if steps.is_empty() && body.contains("####") {
                tracing::debug!(
                    phase = block.written_number,
                    "skipping phase with no steps and nested headings"
                );
                continue;
            }
            phases.push(WorkflowPhase {
                phase_id: format!("phase_{phase_number}"),
                phase_number,
                name: block.name.clone(),
                description: format!("Phase {phase_number}: {}", block.name),
                estimated_duration_minutes: parse_duration(&block.duration),
                steps,
            });
            phase_number += 1;
        }

        let rules_body = scan.section("Workflow Rules");
        let error_body = scan.section("Error Handling");
        let success_body = scan.section("Success Criteria");
        let metrics_body = scan.section("Metrics");

        WorkflowDefinition {
            workflow_id: workflow_id.to_string(),
            name: scan.name.clone().unwrap_or_else(|| "Unknown Workflow".to_string()),
            description: scan.section("Overview").map(|s| s.trim().to_string()).unwrap_or_default(),
            metadata: scan.metadata,
            phases,
            rules: rules_body.map(parse_rules).unwrap_or_default(),
            error_handling: error_body.map(parse_error_handling).unwrap_or_default(),
            success_criteria: success_body.map(parse_success_criteria).unwrap_or_default(),
            metrics: metrics_body.map(parse_metrics).unwrap_or_default(),
            mermaid_diagram: extract_mermaid(content),
            source_path: source_path.map(|p| p.display().to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Document scan
// ---------------------------------------------------------------------------

struct PhaseBlock {
    written_number: u32,
    name: String,
    duration: String,
    body: Vec<String>,
}

struct DocumentScan {
    metadata: WorkflowMetadata,
    name: Option<String>,
    /// H2 sections in encounter order: (heading, body lines).
    sections: Vec<(String, Vec<String>)>,
    phase_blocks: Vec<PhaseBlock>,
}

impl DocumentScan {
    fn section(&self, heading: &str) -> Option<String> {
        self.sections
            .iter()
            .find(|(name, _)| name == heading)
            .map(|(_, lines)| lines.join("\n"))
    }
}

/// Single pass over the document: record metadata, the title, H2 section
/// bodies, and phase blocks. A line belongs to the innermost open scope
/// (phase body if a phase heading is open, else the current H2 section).
fn scan_document(content: &str) -> DocumentScan {
    let mut metadata = WorkflowMetadata::default();
    let mut version_set = false;
    let mut updated_set = false;
    let mut status_set = false;
    let mut priority_set = false;

    let mut name = None;
    let mut sections: Vec<(String, Vec<String>)> = Vec::new();
    let mut phase_blocks: Vec<PhaseBlock> = Vec::new();

    // Indices into sections / phase_blocks for the open scopes
    let mut current_section: Option<usize> = None;
    let mut current_phase: Option<usize> = None;

    for line in content.lines() {
        // Metadata tags can appear anywhere; the first occurrence wins and
        // the line still belongs to its enclosing section body.
        if let Some(caps) = META_RE.captures(line) {
            let value = caps[2].trim().to_string();
            match &caps[1] {
                "Version" if !version_set => {
                    metadata.version = value;
                    version_set = true;
                }
                "Last Updated" if !updated_set => {
                    metadata.last_updated = value;
                    updated_set = true;
                }
                "Status" if !status_set => {
                    metadata.status = value;
                    status_set = true;
                }
                "Priority" if !priority_set => {
                    metadata.priority = value;
                    priority_set = true;
                }
                _ => {}
            }
        }

        if name.is_none()
            && !line.starts_with("##")
            && let Some(caps) = TITLE_RE.captures(line)
        {
            name = Some(caps[1].trim().to_string());
            continue;
        }

        if let Some(heading) = line.strip_prefix("## ") {
            sections.push((heading.trim().to_string(), Vec::new()));
            current_section = Some(sections.len() - 1);
            current_phase = None;
            continue;
        }

        if line.starts_with("### ")
            && let Some(caps) = PHASE_RE.captures(line)
        {
            phase_blocks.push(PhaseBlock {
                written_number: caps[1].parse().unwrap_or(0),
                name: caps[2].trim().to_string(),
                duration: caps[3].trim().to_string(),
                body: Vec::new(),
            });
            current_phase = Some(phase_blocks.len() - 1);
            continue;
        }

        if let Some(p) = current_phase {
            phase_blocks[p].body.push(line.to_string());
        } else if let Some(s) = current_section {
            sections[s].1.push(line.to_string());
        }
    }

    DocumentScan {
        metadata,
        name,
        sections,
        phase_blocks,
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn parse_steps(body: &[String], phase_number: u32) -> Vec<WorkflowStep> {
    struct RawStep {
        name: String,
        target: String,
        description: Vec<String>,
    }

    let mut raw: Vec<RawStep> = Vec::new();
    for line in body {
        if let Some(caps) = STEP_RE.captures(line) {
            raw.push(RawStep {
                name: caps[2].trim().to_string(),
                target: caps[3].trim().to_string(),
                description: Vec::new(),
            });
        } else if let Some(current) = raw.last_mut() {
            current.description.push(line.clone());
        }
    }

    raw.into_iter()
        .enumerate()
        .map(|(idx, step)| {
            let step_number = idx as u32 + 1;
            let description = step.description.join("\n").trim().to_string();
            let lower = description.to_lowercase();

            let (step_type, reference) = parse_agent_reference(&step.target);
            let (agent_id, script_path) = match step_type {
                StepType::Script => (None, reference),
                StepType::Agent => (reference, None),
                StepType::Condition | StepType::Manual => (None, None),
            };

            let (handoff_to, handoff_mode, handoff_criteria) = parse_handoff(&description);
            let conditions = parse_conditions(&description);
            let is_mandatory = lower.contains("always") || lower.contains("required");

            WorkflowStep {
                step_id: format!("phase_{phase_number}_step_{step_number}"),
                step_number,
                name: step.name,
                description,
                step_type,
                agent_id,
                script_path,
                input_data: HashMap::new(),
                handoff_to,
                handoff_mode,
                handoff_criteria,
                is_mandatory,
                conditions,
                metadata: HashMap::new(),
            }
        })
        .collect()
}

/// Classify the right side of a step's `→` and normalize the agent id.
fn parse_agent_reference(target: &str) -> (StepType, Option<String>) {
    let lower = target.to_lowercase();

    if lower.contains("script") {
        let script = lower
            .replace(" script", "")
            .replace("script", "")
            .trim()
            .to_string();
        let script = (!script.is_empty()).then_some(script);
        return (StepType::Script, script);
    }

    if lower.contains("manual") || lower.contains("user") {
        return (StepType::Manual, None);
    }

    for (phrase, slug) in AGENT_ALIASES.iter() {
        if lower.contains(phrase) {
            return (StepType::Agent, Some((*slug).to_string()));
        }
    }

    // Best-effort slug for unknown agents
    let slug = lower.replace(" agent", "").replace(' ', "-");
    (StepType::Agent, Some(slug))
}

/// Extract handoff target, mode, and conditional criteria from a step body.
fn parse_handoff(description: &str) -> (Option<String>, HandoffMode, Option<String>) {
    let handoff_to = HANDOFF_RE
        .captures(description)
        .map(|caps| normalize_handoff_target(&caps[1]));

    let lower = description.to_lowercase();
    let mut handoff_mode = HandoffMode::Always;
    let mut handoff_criteria = None;

    if lower.contains("if ") || lower.contains("when ") {
        handoff_mode = HandoffMode::Conditional;
        handoff_criteria = CRITERIA_RE
            .captures(description)
            .map(|caps| caps[1].trim().to_string());
    }
    if lower.contains("always") {
        handoff_mode = HandoffMode::Always;
    }

    (handoff_to, handoff_mode, handoff_criteria)
}

/// Normalize a handoff target to an agent slug: drop any trailing
/// `if`/`when` clause the sentence pattern swallowed, strip markdown
/// artifacts, then resolve through the canonical alias map with a
/// slugified fallback.
fn normalize_handoff_target(text: &str) -> String {
    let mut lower = text.trim().to_lowercase();
    for marker in [" if ", " when "] {
        if let Some(pos) = lower.find(marker) {
            lower.truncate(pos);
            break;
        }
    }

    let cleaned = HANDOFF_ARTIFACT_RE.replace_all(&lower, "");
    let lower = cleaned.trim().to_string();

    for (phrase, slug) in AGENT_ALIASES.iter() {
        if lower.contains(phrase) {
            return (*slug).to_string();
        }
    }

    let slug = lower.replace([' ', '_'], "-");
    let slug = NON_SLUG_RE.replace_all(&slug, "");
    DASH_RUN_RE
        .replace_all(&slug, "-")
        .trim_matches('-')
        .to_string()
}

fn parse_conditions(description: &str) -> Vec<WorkflowCondition> {
    BRACE_CONDITION_RE
        .captures_iter(description)
        .enumerate()
        .map(|(idx, caps)| {
            let text = caps[1].trim().to_string();
            WorkflowCondition {
                condition_id: format!("condition_{idx}"),
                description: text.clone(),
                expression: text,
            }
        })
        .collect()
}

/// Parse a heading duration like "30-45 minutes" or "1-4 hours" into
/// minutes. The first number wins; unknown units yield `None`.
fn parse_duration(duration: &str) -> Option<u32> {
    let lower = duration.to_lowercase();
    let first: u32 = NUMBER_RE.captures(&lower)?[1].parse().ok()?;
    if lower.contains("hour") {
        Some(first * 60)
    } else if lower.contains("minute") {
        Some(first)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Trailing sections
// ---------------------------------------------------------------------------

fn parse_rules(body: String) -> Vec<WorkflowRule> {
    let mut rules = Vec::new();

    let mut mandatory: Vec<String> = Vec::new();
    let mut conditional: Vec<String> = Vec::new();
    let mut criteria: Vec<String> = Vec::new();

    #[derive(Clone, Copy, PartialEq)]
    enum Sub {
        None,
        Mandatory,
        Conditional,
        Criteria,
    }
    let mut sub = Sub::None;

    for line in body.lines() {
        if line.starts_with("### ") {
            sub = match line.trim() {
                "### Mandatory Steps" => Sub::Mandatory,
                "### Conditional Steps" => Sub::Conditional,
                "### Handoff Criteria" => Sub::Criteria,
                _ => Sub::None,
            };
            continue;
        }
        match sub {
            Sub::Mandatory => {
                if let Some(caps) = MANDATORY_ITEM_RE.captures(line) {
                    mandatory.push(caps[1].trim().to_string());
                }
            }
            Sub::Conditional => {
                if let Some(caps) = CONDITIONAL_ITEM_RE.captures(line) {
                    conditional.push(caps[1].trim().to_string());
                }
            }
            Sub::Criteria => {
                if let Some(caps) = BOLD_KV_RE.captures(line) {
                    criteria.push(format!("{}: {}", caps[1].trim(), caps[2].trim()));
                }
            }
            Sub::None => {}
        }
    }

    if !mandatory.is_empty() {
        rules.push(WorkflowRule {
            rule_type: "mandatory".to_string(),
            description: "Mandatory steps that cannot be skipped".to_string(),
            step_ids: mandatory,
            conditions: vec![],
        });
    }
    if !conditional.is_empty() {
        rules.push(WorkflowRule {
            rule_type: "conditional".to_string(),
            description: "Conditional steps that may be skipped".to_string(),
            step_ids: conditional,
            conditions: vec![],
        });
    }
    if !criteria.is_empty() {
        rules.push(WorkflowRule {
            rule_type: "handoff_criteria".to_string(),
            description: "Criteria for agent handoffs".to_string(),
            step_ids: vec![],
            conditions: criteria,
        });
    }

    rules
}

fn parse_error_handling(body: String) -> HashMap<String, String> {
    let mut scenarios = HashMap::new();
    let mut current: Option<(String, Vec<String>)> = None;

    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("### If ") {
            if let Some((name, lines)) = current.take() {
                scenarios.insert(name, lines.join("\n").trim().to_string());
            }
            current = Some((heading.trim().to_string(), Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line.to_string());
        }
    }
    if let Some((name, lines)) = current {
        scenarios.insert(name, lines.join("\n").trim().to_string());
    }

    scenarios
}

fn parse_success_criteria(body: String) -> Vec<String> {
    body.lines()
        .filter_map(|line| SUCCESS_ITEM_RE.captures(line))
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

fn parse_metrics(body: String) -> HashMap<String, String> {
    body.lines()
        .filter_map(|line| BOLD_KV_RE.captures(line))
        .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
        .collect()
}

fn extract_mermaid(content: &str) -> Option<String> {
    let mut in_fence = false;
    let mut collected: Vec<&str> = Vec::new();
    for line in content.lines() {
        if in_fence {
            if line.trim_start().starts_with("```") {
                return Some(collected.join("\n").trim().to_string());
            }
            collected.push(line);
        } else if line.trim_start().starts_with("```mermaid") {
            in_fence = true;
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
