//! Agent capabilities consumed by the engine.
//!
//! The engine decides *what* runs *when*; agents are opaque compute units
//! behind these traits. `AgentInvoker` is implemented by the agent runtime,
//! `AgentCatalog` by whatever knows which agents exist (filesystem scan in
//! `agentflow-infra`).

use agentflow_types::agent::{AgentInvocation, AgentRequest};
use thiserror::Error;

/// Failure reported by the agent runtime itself (transport, crash), as
/// opposed to an agent returning `InvocationStatus::Failed`.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct AgentInvokerError(pub String);

/// Executes an agent given a request. Implementations must be safe to call
/// concurrently across executions.
pub trait AgentInvoker: Send + Sync {
    fn execute_agent(
        &self,
        request: AgentRequest,
    ) -> impl std::future::Future<Output = Result<AgentInvocation, AgentInvokerError>> + Send;
}

/// Lookup of known agents, used by handoff validation.
pub trait AgentCatalog: Send + Sync {
    /// Whether an agent with this id exists.
    fn exists(&self, agent_id: &str) -> bool;

    /// All known agent ids.
    fn agent_ids(&self) -> Vec<String>;
}
