//! Dead-letter queue trait.

use agentflow_types::error::{DeadLetterError, FailedTask};

/// Query filter for `DeadLetterQueue::failed_tasks`.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterFilter {
    pub agent_id: Option<String>,
    pub can_retry: Option<bool>,
    /// Maximum number of tasks returned; 0 means the store default (100).
    pub limit: u32,
}

impl DeadLetterFilter {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }

    pub fn retryable(mut self, can_retry: bool) -> Self {
        self.can_retry = Some(can_retry);
        self
    }

    pub fn effective_limit(&self) -> u32 {
        if self.limit == 0 { 100 } else { self.limit }
    }
}

/// Store of terminally failed tasks for operator triage.
pub trait DeadLetterQueue: Send + Sync {
    /// Persist a failed task. One record per `task_id`; a later failure with
    /// the same id replaces the earlier record.
    fn add_failed_task(
        &self,
        task: &FailedTask,
    ) -> impl std::future::Future<Output = Result<(), DeadLetterError>> + Send;

    /// Query failed tasks, newest failure first.
    fn failed_tasks(
        &self,
        filter: DeadLetterFilter,
    ) -> impl std::future::Future<Output = Result<Vec<FailedTask>, DeadLetterError>> + Send;

    /// Remove a task. Returns whether a record existed.
    fn remove_task(
        &self,
        task_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, DeadLetterError>> + Send;
}
