//! SQLite handoff registry implementation.
//!
//! Implements `HandoffRegistry` from `agentflow-core`. Registration is
//! idempotent (INSERT OR REPLACE keyed by `handoff_id`, safe because ids
//! are fresh UUIDs); status updates rewrite both the status column and the
//! embedded record JSON.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use agentflow_core::clock::{Clock, format_utc};
use agentflow_core::repository::handoffs::{HandoffFilter, HandoffRegistry};
use agentflow_types::error::HandoffStoreError;
use agentflow_types::handoff::{HandoffRecord, HandoffStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS handoffs (
        handoff_id TEXT PRIMARY KEY,
        execution_id TEXT NOT NULL,
        workflow_id TEXT NOT NULL,
        from_agent TEXT NOT NULL,
        to_agent TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        handoff_type TEXT NOT NULL,
        status TEXT NOT NULL,
        handoff_data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_handoffs_execution_id ON handoffs(execution_id)",
    "CREATE INDEX IF NOT EXISTS idx_handoffs_workflow_id ON handoffs(workflow_id)",
    "CREATE INDEX IF NOT EXISTS idx_handoffs_status ON handoffs(status)",
    "CREATE INDEX IF NOT EXISTS idx_handoffs_to_agent ON handoffs(to_agent)",
    "CREATE INDEX IF NOT EXISTS idx_handoffs_timestamp ON handoffs(timestamp)",
];

/// SQLite-backed handoff registry.
pub struct SqliteHandoffRegistry {
    pool: DatabasePool,
    clock: Arc<dyn Clock>,
}

impl SqliteHandoffRegistry {
    /// Open (creating if needed) the registry at `db_path`.
    pub async fn open(db_path: &Path, clock: Arc<dyn Clock>) -> Result<Self, sqlx::Error> {
        let pool = DatabasePool::open(db_path, SCHEMA).await?;
        tracing::info!(db = %db_path.display(), "handoff registry ready");
        Ok(Self { pool, clock })
    }
}

fn decode_record(handoff_data: &str) -> Result<HandoffRecord, HandoffStoreError> {
    serde_json::from_str(handoff_data)
        .map_err(|e| HandoffStoreError::Serialization(format!("invalid handoff JSON: {e}")))
}

impl HandoffRegistry for SqliteHandoffRegistry {
    async fn register_handoff(
        &self,
        record: &HandoffRecord,
        execution_id: Uuid,
        workflow_id: &str,
    ) -> Result<(), HandoffStoreError> {
        let handoff_data = serde_json::to_string(record)
            .map_err(|e| HandoffStoreError::Serialization(e.to_string()))?;
        let now = format_utc(self.clock.now());

        sqlx::query(
            r#"INSERT INTO handoffs
               (handoff_id, execution_id, workflow_id, from_agent, to_agent,
                timestamp, handoff_type, status, handoff_data, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(handoff_id) DO UPDATE SET
                 execution_id = excluded.execution_id,
                 workflow_id = excluded.workflow_id,
                 from_agent = excluded.from_agent,
                 to_agent = excluded.to_agent,
                 timestamp = excluded.timestamp,
                 handoff_type = excluded.handoff_type,
                 status = excluded.status,
                 handoff_data = excluded.handoff_data,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&record.handoff_id)
        .bind(execution_id.to_string())
        .bind(workflow_id)
        .bind(&record.from_agent)
        .bind(&record.to_agent)
        .bind(&record.timestamp)
        .bind(record.handoff_type.as_str())
        .bind(record.status.as_str())
        .bind(&handoff_data)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| HandoffStoreError::Storage(e.to_string()))?;

        tracing::debug!(
            handoff_id = record.handoff_id.as_str(),
            to_agent = record.to_agent.as_str(),
            "handoff registered"
        );
        Ok(())
    }

    async fn handoffs(
        &self,
        filter: HandoffFilter,
    ) -> Result<Vec<HandoffRecord>, HandoffStoreError> {
        let mut sql = String::from("SELECT handoff_data FROM handoffs WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(execution_id) = filter.execution_id {
            sql.push_str(" AND execution_id = ?");
            binds.push(execution_id.to_string());
        }
        if let Some(workflow_id) = &filter.workflow_id {
            sql.push_str(" AND workflow_id = ?");
            binds.push(workflow_id.clone());
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        if let Some(to_agent) = &filter.to_agent {
            sql.push_str(" AND to_agent = ?");
            binds.push(to_agent.clone());
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        query = query.bind(filter.effective_limit() as i64);

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| HandoffStoreError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let handoff_data: String = row
                    .try_get("handoff_data")
                    .map_err(|e| HandoffStoreError::Storage(e.to_string()))?;
                decode_record(&handoff_data)
            })
            .collect()
    }

    async fn update_handoff_status(
        &self,
        handoff_id: &str,
        status: HandoffStatus,
    ) -> Result<(), HandoffStoreError> {
        let row = sqlx::query("SELECT handoff_data FROM handoffs WHERE handoff_id = ?")
            .bind(handoff_id)
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| HandoffStoreError::Storage(e.to_string()))?
            .ok_or_else(|| HandoffStoreError::NotFound(handoff_id.to_string()))?;

        let handoff_data: String = row
            .try_get("handoff_data")
            .map_err(|e| HandoffStoreError::Storage(e.to_string()))?;
        let mut record = decode_record(&handoff_data)?;
        record.status = status;
        let handoff_data = serde_json::to_string(&record)
            .map_err(|e| HandoffStoreError::Serialization(e.to_string()))?;

        sqlx::query(
            "UPDATE handoffs SET status = ?, handoff_data = ?, updated_at = ? WHERE handoff_id = ?",
        )
        .bind(status.as_str())
        .bind(&handoff_data)
        .bind(format_utc(self.clock.now()))
        .bind(handoff_id)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| HandoffStoreError::Storage(e.to_string()))?;

        tracing::debug!(handoff_id, status = status.as_str(), "handoff status updated");
        Ok(())
    }

    async fn handoff_stats(&self) -> Result<HashMap<String, u64>, HandoffStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM handoffs GROUP BY status")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| HandoffStoreError::Storage(e.to_string()))?;

        let mut stats = HashMap::new();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| HandoffStoreError::Storage(e.to_string()))?;
            let count: i64 = row
                .try_get("n")
                .map_err(|e| HandoffStoreError::Storage(e.to_string()))?;
            stats.insert(status, count.max(0) as u64);
        }
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::clock::{ManualClock, parse_utc};
    use agentflow_types::handoff::HandoffKind;
    use serde_json::json;

    async fn registry(dir: &Path) -> (Arc<ManualClock>, SqliteHandoffRegistry) {
        let clock = Arc::new(ManualClock::new(
            parse_utc("2025-06-01T12:00:00Z").unwrap(),
        ));
        let registry = SqliteHandoffRegistry::open(&dir.join("handoffs.db"), clock.clone())
            .await
            .unwrap();
        (clock, registry)
    }

    fn record(timestamp: &str) -> HandoffRecord {
        HandoffRecord {
            handoff_id: Uuid::new_v4().to_string(),
            from_agent: "backend".to_string(),
            to_agent: "frontend".to_string(),
            timestamp: timestamp.to_string(),
            handoff_type: HandoffKind::Standard,
            status: HandoffStatus::Pending,
            work_summary: "API ready".to_string(),
            deliverables: vec![json!("openapi.yaml")],
            blockers: vec![],
            notes: None,
        }
    }

    #[tokio::test]
    async fn register_and_query_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path()).await;
        let execution_id = Uuid::now_v7();
        let record = record("2025-06-01T12:00:00.000Z");

        registry
            .register_handoff(&record, execution_id, "test_workflow")
            .await
            .unwrap();

        let found = registry
            .handoffs(HandoffFilter::for_execution(execution_id))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].handoff_id, record.handoff_id);
        assert_eq!(found[0].deliverables, vec![json!("openapi.yaml")]);
    }

    #[tokio::test]
    async fn re_registration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path()).await;
        let execution_id = Uuid::now_v7();
        let record = record("2025-06-01T12:00:00.000Z");

        registry
            .register_handoff(&record, execution_id, "test_workflow")
            .await
            .unwrap();
        registry
            .register_handoff(&record, execution_id, "test_workflow")
            .await
            .unwrap();

        let found = registry
            .handoffs(HandoffFilter::for_execution(execution_id))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn filters_by_status_and_agent() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path()).await;
        let execution_id = Uuid::now_v7();

        let pending = record("2025-06-01T12:00:00.000Z");
        let mut blocked = record("2025-06-01T12:00:01.000Z");
        blocked.status = HandoffStatus::Blocked;
        blocked.to_agent = "planner".to_string();

        registry
            .register_handoff(&pending, execution_id, "test_workflow")
            .await
            .unwrap();
        registry
            .register_handoff(&blocked, execution_id, "test_workflow")
            .await
            .unwrap();

        let only_blocked = registry
            .handoffs(HandoffFilter::default().with_status(HandoffStatus::Blocked))
            .await
            .unwrap();
        assert_eq!(only_blocked.len(), 1);
        assert_eq!(only_blocked[0].handoff_id, blocked.handoff_id);

        let to_planner = registry
            .handoffs(HandoffFilter::default().with_to_agent("planner"))
            .await
            .unwrap();
        assert_eq!(to_planner.len(), 1);

        // Newest first
        let all = registry.handoffs(HandoffFilter::default()).await.unwrap();
        assert_eq!(all[0].handoff_id, blocked.handoff_id);
    }

    #[tokio::test]
    async fn status_update_rewrites_embedded_record() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path()).await;
        let execution_id = Uuid::now_v7();
        let record = record("2025-06-01T12:00:00.000Z");

        registry
            .register_handoff(&record, execution_id, "test_workflow")
            .await
            .unwrap();
        registry
            .update_handoff_status(&record.handoff_id, HandoffStatus::Complete)
            .await
            .unwrap();

        let found = registry
            .handoffs(HandoffFilter::default().with_status(HandoffStatus::Complete))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].status, HandoffStatus::Complete);
    }

    #[tokio::test]
    async fn status_update_unknown_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path()).await;

        let err = registry
            .update_handoff_status("ghost", HandoffStatus::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, HandoffStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn stats_count_per_status() {
        let dir = tempfile::tempdir().unwrap();
        let (_, registry) = registry(dir.path()).await;
        let execution_id = Uuid::now_v7();

        for i in 0..3 {
            let mut r = record(&format!("2025-06-01T12:00:0{i}.000Z"));
            if i == 2 {
                r.status = HandoffStatus::Failed;
            }
            registry
                .register_handoff(&r, execution_id, "test_workflow")
                .await
                .unwrap();
        }

        let stats = registry.handoff_stats().await.unwrap();
        assert_eq!(stats.get("pending"), Some(&2));
        assert_eq!(stats.get("failed"), Some(&1));
    }
}
