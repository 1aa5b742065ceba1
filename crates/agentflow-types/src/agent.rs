//! Agent invocation request/response shapes.
//!
//! Agents are opaque to the engine: the executor sends an `AgentRequest`
//! through the `AgentInvoker` capability and receives an `AgentInvocation`
//! back. What the agent does internally (prompting, retrieval, tool use) is
//! out of scope here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Outcome status reported by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Success,
    Handoff,
    Failed,
    Blocked,
}

/// A request to execute one agent for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub agent_id: String,
    /// Tracking id; the executor passes the execution id here.
    pub request_id: String,
    pub workflow_id: String,
    /// Step input bag plus the engine-injected `execution_id`,
    /// `workflow_id`, and `step_id` keys.
    #[serde(default)]
    pub input_data: HashMap<String, serde_json::Value>,
}

/// The result of one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInvocation {
    pub status: InvocationStatus,
    #[serde(default)]
    pub output_data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AgentInvocation {
    /// Shorthand for a successful invocation with the given output bag.
    pub fn success(output_data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            status: InvocationStatus::Success,
            output_data,
            error: None,
            duration_ms: None,
        }
    }

    /// Shorthand for a failed invocation.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: InvocationStatus::Failed,
            output_data: HashMap::new(),
            error: Some(error.into()),
            duration_ms: None,
        }
    }
}
