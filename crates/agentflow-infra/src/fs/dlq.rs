//! Filesystem dead-letter queue.
//!
//! One pretty-printed JSON file per failed task, named `<task_id>.json`.
//! Task ids are execution ids, so collisions only happen when the same
//! execution fails again, in which case the newer record wins.

use std::path::{Path, PathBuf};

use agentflow_core::repository::dlq::{DeadLetterFilter, DeadLetterQueue};
use agentflow_types::error::{DeadLetterError, FailedTask};

/// Directory-backed dead-letter queue.
pub struct FsDeadLetterQueue {
    queue_dir: PathBuf,
}

impl FsDeadLetterQueue {
    pub fn new(queue_dir: impl Into<PathBuf>) -> Self {
        Self {
            queue_dir: queue_dir.into(),
        }
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.queue_dir.join(format!("{task_id}.json"))
    }
}

impl DeadLetterQueue for FsDeadLetterQueue {
    async fn add_failed_task(&self, task: &FailedTask) -> Result<(), DeadLetterError> {
        tokio::fs::create_dir_all(&self.queue_dir)
            .await
            .map_err(|e| DeadLetterError::Io(e.to_string()))?;

        // Through Value so keys serialize sorted
        let value = serde_json::to_value(task)
            .map_err(|e| DeadLetterError::Serialization(e.to_string()))?;
        let json = serde_json::to_string_pretty(&value)
            .map_err(|e| DeadLetterError::Serialization(e.to_string()))?;

        let path = self.task_path(&task.task_id);
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| DeadLetterError::Io(e.to_string()))?;

        tracing::info!(
            task_id = task.task_id.as_str(),
            agent_id = task.agent_id.as_str(),
            category = task.error.category.as_str(),
            "task added to dead-letter queue"
        );
        Ok(())
    }

    async fn failed_tasks(
        &self,
        filter: DeadLetterFilter,
    ) -> Result<Vec<FailedTask>, DeadLetterError> {
        let mut entries = match tokio::fs::read_dir(&self.queue_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DeadLetterError::Io(e.to_string())),
        };

        let mut tasks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DeadLetterError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping unreadable dead-letter file");
                    continue;
                }
            };
            let task: FailedTask = match serde_json::from_str(&contents) {
                Ok(task) => task,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping undecodable dead-letter file");
                    continue;
                }
            };

            if filter.agent_id.as_deref().is_none_or(|a| task.agent_id == a)
                && filter.can_retry.is_none_or(|c| task.can_retry == c)
            {
                tasks.push(task);
            }
        }

        tasks.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        tasks.truncate(filter.effective_limit() as usize);
        Ok(tasks)
    }

    async fn remove_task(&self, task_id: &str) -> Result<bool, DeadLetterError> {
        match tokio::fs::remove_file(self.task_path(task_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DeadLetterError::Io(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::clock::parse_utc;
    use agentflow_core::recovery::failed_task_from_error;
    use agentflow_types::error::{ErrorCategory, ErrorSeverity};
    use std::collections::HashMap;

    fn task(task_id: &str, agent_id: &str, message: &str, at: &str) -> FailedTask {
        failed_task_from_error(
            task_id,
            agent_id,
            Some("test_workflow".to_string()),
            message,
            3,
            HashMap::new(),
            parse_utc(at).unwrap(),
        )
    }

    #[tokio::test]
    async fn add_then_get_roundtrips_classification() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = FsDeadLetterQueue::new(dir.path().join("dead_letter_queue"));

        dlq.add_failed_task(&task("exec-1", "backend", "boom", "2025-06-01T12:00:00Z"))
            .await
            .unwrap();

        let file = dlq.queue_dir().join("exec-1.json");
        assert!(file.exists());

        let tasks = dlq.failed_tasks(DeadLetterFilter::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        let loaded = &tasks[0];
        assert_eq!(loaded.task_id, "exec-1");
        assert_eq!(loaded.error.category, ErrorCategory::SystemError);
        assert_eq!(loaded.error.severity, ErrorSeverity::High);
        assert!(loaded.can_retry);
        assert_eq!(loaded.attempts, 3);
    }

    #[tokio::test]
    async fn filters_by_agent_and_retryability() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = FsDeadLetterQueue::new(dir.path());

        dlq.add_failed_task(&task("t1", "backend", "boom", "2025-06-01T12:00:00Z"))
            .await
            .unwrap();
        dlq.add_failed_task(&task(
            "t2",
            "frontend",
            "resource not found",
            "2025-06-01T12:00:01Z",
        ))
        .await
        .unwrap();

        let backend_only = dlq
            .failed_tasks(DeadLetterFilter::for_agent("backend"))
            .await
            .unwrap();
        assert_eq!(backend_only.len(), 1);
        assert_eq!(backend_only[0].task_id, "t1");

        let permanent = dlq
            .failed_tasks(DeadLetterFilter::default().retryable(false))
            .await
            .unwrap();
        assert_eq!(permanent.len(), 1);
        assert_eq!(permanent[0].task_id, "t2");
    }

    #[tokio::test]
    async fn newest_failures_first() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = FsDeadLetterQueue::new(dir.path());

        dlq.add_failed_task(&task("old", "backend", "boom", "2025-06-01T12:00:00Z"))
            .await
            .unwrap();
        dlq.add_failed_task(&task("new", "backend", "boom", "2025-06-01T12:05:00Z"))
            .await
            .unwrap();

        let tasks = dlq.failed_tasks(DeadLetterFilter::default()).await.unwrap();
        assert_eq!(tasks[0].task_id, "new");
        assert_eq!(tasks[1].task_id, "old");
    }

    #[tokio::test]
    async fn remove_task_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = FsDeadLetterQueue::new(dir.path());

        dlq.add_failed_task(&task("t1", "backend", "boom", "2025-06-01T12:00:00Z"))
            .await
            .unwrap();
        assert!(dlq.remove_task("t1").await.unwrap());
        assert!(!dlq.remove_task("t1").await.unwrap());
        assert!(
            dlq.failed_tasks(DeadLetterFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn missing_queue_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = FsDeadLetterQueue::new(dir.path().join("never-created"));
        assert!(
            dlq.failed_tasks(DeadLetterFilter::default())
                .await
                .unwrap()
                .is_empty()
        );
    }
}
