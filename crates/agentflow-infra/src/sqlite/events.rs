//! SQLite event log implementation.
//!
//! Implements `EventStore` from `agentflow-core`: an append-only journal of
//! workflow lifecycle events. Rows are never updated or deleted. Ascending
//! queries tie-break equal timestamps on rowid so replay preserves emission
//! order.

use std::path::Path;
use std::sync::Arc;

use agentflow_core::clock::{Clock, format_utc, parse_utc};
use agentflow_core::repository::events::{EventFilter, EventStore, project_execution};
use agentflow_types::error::EventStoreError;
use agentflow_types::event::{EventStatus, EventType, WorkflowEvent};
use agentflow_types::execution::WorkflowExecution;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS workflow_events (
        event_id TEXT PRIMARY KEY,
        event_type TEXT NOT NULL,
        execution_id TEXT NOT NULL,
        workflow_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        step_id TEXT,
        phase_id TEXT,
        agent_id TEXT,
        status TEXT NOT NULL,
        data TEXT,
        error TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_events_execution_id ON workflow_events(execution_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON workflow_events(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_event_type ON workflow_events(event_type)",
    "CREATE INDEX IF NOT EXISTS idx_events_workflow_id ON workflow_events(workflow_id)",
];

/// SQLite-backed append-only event log.
pub struct SqliteEventLog {
    pool: DatabasePool,
    clock: Arc<dyn Clock>,
}

impl SqliteEventLog {
    /// Open (creating if needed) the event log at `db_path`.
    pub async fn open(db_path: &Path, clock: Arc<dyn Clock>) -> Result<Self, sqlx::Error> {
        let pool = DatabasePool::open(db_path, SCHEMA).await?;
        tracing::info!(db = %db_path.display(), "event log ready");
        Ok(Self { pool, clock })
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct EventRow {
    event_id: String,
    event_type: String,
    execution_id: String,
    workflow_id: String,
    timestamp: String,
    step_id: Option<String>,
    phase_id: Option<String>,
    agent_id: Option<String>,
    status: String,
    data: Option<String>,
    error: Option<String>,
}

impl EventRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            execution_id: row.try_get("execution_id")?,
            workflow_id: row.try_get("workflow_id")?,
            timestamp: row.try_get("timestamp")?,
            step_id: row.try_get("step_id")?,
            phase_id: row.try_get("phase_id")?,
            agent_id: row.try_get("agent_id")?,
            status: row.try_get("status")?,
            data: row.try_get("data")?,
            error: row.try_get("error")?,
        })
    }

    fn into_event(self) -> Result<WorkflowEvent, EventStoreError> {
        let event_type: EventType = parse_enum(&self.event_type)
            .ok_or_else(|| bad_column("event_type", &self.event_type))?;
        let status: EventStatus =
            parse_enum(&self.status).ok_or_else(|| bad_column("status", &self.status))?;

        let data = match self.data.as_deref() {
            None => serde_json::Map::new(),
            Some(text) => serde_json::from_str(text)
                .map_err(|e| EventStoreError::Serialization(format!("invalid event data: {e}")))?,
        };

        Ok(WorkflowEvent {
            event_id: parse_uuid(&self.event_id)?,
            event_type,
            execution_id: parse_uuid(&self.execution_id)?,
            workflow_id: self.workflow_id,
            timestamp: Some(parse_utc(&self.timestamp).map_err(|e| {
                EventStoreError::Serialization(format!("invalid event timestamp: {e}"))
            })?),
            step_id: self.step_id,
            phase_id: self.phase_id,
            agent_id: self.agent_id,
            status,
            data,
            error: self.error,
        })
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(s: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

fn bad_column(column: &str, value: &str) -> EventStoreError {
    EventStoreError::Serialization(format!("invalid {column}: {value}"))
}

fn parse_uuid(s: &str) -> Result<Uuid, EventStoreError> {
    s.parse::<Uuid>()
        .map_err(|e| EventStoreError::Serialization(format!("invalid UUID: {e}")))
}

fn enum_str<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

// ---------------------------------------------------------------------------
// EventStore impl
// ---------------------------------------------------------------------------

impl EventStore for SqliteEventLog {
    async fn append_event(
        &self,
        mut event: WorkflowEvent,
    ) -> Result<WorkflowEvent, EventStoreError> {
        let stamped_at = match event.timestamp {
            Some(at) => at,
            None => {
                let now = self.clock.now();
                event.timestamp = Some(now);
                now
            }
        };
        let timestamp = format_utc(stamped_at);
        let data = if event.data.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&event.data)
                    .map_err(|e| EventStoreError::Serialization(e.to_string()))?,
            )
        };

        sqlx::query(
            r#"INSERT INTO workflow_events
               (event_id, event_type, execution_id, workflow_id, timestamp,
                step_id, phase_id, agent_id, status, data, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.event_id.to_string())
        .bind(event.event_type.as_str())
        .bind(event.execution_id.to_string())
        .bind(&event.workflow_id)
        .bind(&timestamp)
        .bind(&event.step_id)
        .bind(&event.phase_id)
        .bind(&event.agent_id)
        .bind(enum_str(&event.status))
        .bind(&data)
        .bind(&event.error)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        tracing::debug!(
            event_type = event.event_type.as_str(),
            execution_id = %event.execution_id,
            "event appended"
        );
        Ok(event)
    }

    async fn events(&self, filter: EventFilter) -> Result<Vec<WorkflowEvent>, EventStoreError> {
        let mut sql = String::from(
            "SELECT event_id, event_type, execution_id, workflow_id, timestamp, \
             step_id, phase_id, agent_id, status, data, error \
             FROM workflow_events WHERE 1=1",
        );
        let mut binds: Vec<String> = Vec::new();

        if let Some(execution_id) = filter.execution_id {
            sql.push_str(" AND execution_id = ?");
            binds.push(execution_id.to_string());
        }
        if let Some(workflow_id) = &filter.workflow_id {
            sql.push_str(" AND workflow_id = ?");
            binds.push(workflow_id.clone());
        }
        if let Some(event_type) = filter.event_type {
            sql.push_str(" AND event_type = ?");
            binds.push(event_type.as_str().to_string());
        }
        sql.push_str(" ORDER BY timestamp ASC, rowid ASC LIMIT ?");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        query = query.bind(filter.effective_limit() as i64);

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                EventRow::from_row(row)
                    .map_err(|e| EventStoreError::Storage(e.to_string()))?
                    .into_event()
            })
            .collect()
    }

    async fn latest_events(
        &self,
        workflow_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkflowEvent>, EventStoreError> {
        let mut sql = String::from(
            "SELECT event_id, event_type, execution_id, workflow_id, timestamp, \
             step_id, phase_id, agent_id, status, data, error \
             FROM workflow_events WHERE 1=1",
        );
        let mut binds: Vec<String> = Vec::new();
        if let Some(workflow_id) = workflow_id {
            sql.push_str(" AND workflow_id = ?");
            binds.push(workflow_id.to_string());
        }
        sql.push_str(" ORDER BY timestamp DESC, rowid DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        query = query.bind(limit.max(1) as i64);

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| EventStoreError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                EventRow::from_row(row)
                    .map_err(|e| EventStoreError::Storage(e.to_string()))?
                    .into_event()
            })
            .collect()
    }

    async fn replay_execution(
        &self,
        execution_id: Uuid,
    ) -> Result<Option<WorkflowExecution>, EventStoreError> {
        let events = self
            .events(EventFilter::for_execution(execution_id).with_limit(10_000))
            .await?;
        if events.is_empty() {
            return Ok(None);
        }
        Ok(project_execution(&events))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
