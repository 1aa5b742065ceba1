//! Handoff registry trait.

use std::collections::HashMap;

use agentflow_types::error::HandoffStoreError;
use agentflow_types::handoff::{HandoffRecord, HandoffStatus};
use uuid::Uuid;

/// Query filter for `HandoffRegistry::handoffs`.
#[derive(Debug, Clone, Default)]
pub struct HandoffFilter {
    pub execution_id: Option<Uuid>,
    pub workflow_id: Option<String>,
    pub status: Option<HandoffStatus>,
    pub to_agent: Option<String>,
    /// Maximum number of records returned; 0 means the store default (100).
    pub limit: u32,
}

impl HandoffFilter {
    pub fn for_execution(execution_id: Uuid) -> Self {
        Self {
            execution_id: Some(execution_id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: HandoffStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_to_agent(mut self, to_agent: impl Into<String>) -> Self {
        self.to_agent = Some(to_agent.into());
        self
    }

    pub fn effective_limit(&self) -> u32 {
        if self.limit == 0 { 100 } else { self.limit }
    }
}

/// Persistent, queryable store of handoff records.
pub trait HandoffRegistry: Send + Sync {
    /// Register a handoff. Idempotent: re-registration with the same
    /// `handoff_id` replaces the row.
    fn register_handoff(
        &self,
        record: &HandoffRecord,
        execution_id: Uuid,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<(), HandoffStoreError>> + Send;

    /// Query handoffs, newest first.
    fn handoffs(
        &self,
        filter: HandoffFilter,
    ) -> impl std::future::Future<Output = Result<Vec<HandoffRecord>, HandoffStoreError>> + Send;

    /// Update a handoff's status (both the status column and the embedded
    /// record). Fails with `NotFound` for an unknown id.
    fn update_handoff_status(
        &self,
        handoff_id: &str,
        status: HandoffStatus,
    ) -> impl std::future::Future<Output = Result<(), HandoffStoreError>> + Send;

    /// Record counts per status (wire names as keys).
    fn handoff_stats(
        &self,
    ) -> impl std::future::Future<Output = Result<HashMap<String, u64>, HandoffStoreError>> + Send;
}
