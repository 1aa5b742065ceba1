//! SQLite state repository with optimistic locking.
//!
//! Implements `StateStore` from `agentflow-core`. Writes run in a
//! transaction on the single-connection writer pool: the stored version is
//! checked against the caller's, incremented, and the canonical JSON
//! payload is persisted together with its SHA-256 checksum. A checksum
//! mismatch on load is logged, never raised.

use std::path::Path;
use std::sync::Arc;

use agentflow_core::clock::{Clock, format_utc};
use agentflow_core::repository::state::StateStore;
use agentflow_types::error::StateStoreError;
use agentflow_types::state::{StateKind, StateSnapshot, StateSummary};
use sha2::{Digest, Sha256};
use sqlx::Row;

use super::pool::DatabasePool;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS agent_states (
        state_id TEXT PRIMARY KEY,
        state_type TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 1,
        state_data TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        checksum TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_states_state_type ON agent_states(state_type)",
    "CREATE INDEX IF NOT EXISTS idx_states_updated_at ON agent_states(updated_at)",
];

/// SQLite-backed state repository.
pub struct SqliteStateStore {
    pool: DatabasePool,
    clock: Arc<dyn Clock>,
}

impl SqliteStateStore {
    /// Open (creating if needed) the state database at `db_path`.
    pub async fn open(db_path: &Path, clock: Arc<dyn Clock>) -> Result<Self, sqlx::Error> {
        let pool = DatabasePool::open(db_path, SCHEMA).await?;
        tracing::info!(db = %db_path.display(), "state repository ready");
        Ok(Self { pool, clock })
    }
}

/// Canonical payload serialization: pretty JSON over a `Value`, whose
/// object keys are sorted.
fn canonical_json(data: &serde_json::Value) -> Result<String, StateStoreError> {
    serde_json::to_string_pretty(data).map_err(|e| StateStoreError::Serialization(e.to_string()))
}

fn checksum_of(payload: &str) -> String {
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

fn kind_str(kind: StateKind) -> &'static str {
    kind.as_str()
}

fn parse_kind(s: &str) -> Result<StateKind, StateStoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| StateStoreError::Serialization(format!("invalid state_type: {s}")))
}

impl StateStore for SqliteStateStore {
    async fn save_state(
        &self,
        mut snapshot: StateSnapshot,
    ) -> Result<StateSnapshot, StateStoreError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| StateStoreError::Storage(e.to_string()))?;

        let current =
            sqlx::query("SELECT version, created_at FROM agent_states WHERE state_id = ?")
                .bind(&snapshot.state_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StateStoreError::Storage(e.to_string()))?;

        let now = format_utc(self.clock.now());
        match &current {
            Some(row) => {
                let stored: i64 = row
                    .try_get("version")
                    .map_err(|e| StateStoreError::Storage(e.to_string()))?;
                if stored != snapshot.version {
                    return Err(StateStoreError::VersionConflict {
                        state_id: snapshot.state_id.clone(),
                        stored,
                        given: snapshot.version,
                    });
                }
                snapshot.version = stored + 1;
                let created_at: String = row
                    .try_get("created_at")
                    .map_err(|e| StateStoreError::Storage(e.to_string()))?;
                snapshot.created_at = Some(created_at);
            }
            None => {
                snapshot.version = 1;
                snapshot.created_at = Some(now.clone());
            }
        }
        snapshot.updated_at = Some(now);

        let payload = canonical_json(&snapshot.data)?;
        let checksum = checksum_of(&payload);

        sqlx::query(
            r#"INSERT OR REPLACE INTO agent_states
               (state_id, state_type, version, state_data, created_at, updated_at, checksum)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&snapshot.state_id)
        .bind(kind_str(snapshot.state_type))
        .bind(snapshot.version)
        .bind(&payload)
        .bind(&snapshot.created_at)
        .bind(&snapshot.updated_at)
        .bind(&checksum)
        .execute(&mut *tx)
        .await
        .map_err(|e| StateStoreError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StateStoreError::Storage(e.to_string()))?;

        tracing::debug!(
            state_id = snapshot.state_id.as_str(),
            version = snapshot.version,
            "state saved"
        );
        Ok(snapshot)
    }

    async fn load_state(&self, state_id: &str) -> Result<Option<StateSnapshot>, StateStoreError> {
        let row = sqlx::query(
            "SELECT state_id, state_type, version, state_data, created_at, updated_at, checksum \
             FROM agent_states WHERE state_id = ?",
        )
        .bind(state_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| StateStoreError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row
            .try_get("state_data")
            .map_err(|e| StateStoreError::Storage(e.to_string()))?;
        let stored_checksum: Option<String> = row
            .try_get("checksum")
            .map_err(|e| StateStoreError::Storage(e.to_string()))?;

        if let Some(stored) = stored_checksum
            && stored != checksum_of(&payload)
        {
            tracing::warn!(state_id, "state checksum mismatch, data may be corrupted");
        }

        let state_type: String = row
            .try_get("state_type")
            .map_err(|e| StateStoreError::Storage(e.to_string()))?;
        let data: serde_json::Value = serde_json::from_str(&payload)
            .map_err(|e| StateStoreError::Serialization(e.to_string()))?;

        Ok(Some(StateSnapshot {
            state_id: row
                .try_get("state_id")
                .map_err(|e| StateStoreError::Storage(e.to_string()))?,
            state_type: parse_kind(&state_type)?,
            version: row
                .try_get("version")
                .map_err(|e| StateStoreError::Storage(e.to_string()))?,
            data,
            created_at: row
                .try_get("created_at")
                .map_err(|e| StateStoreError::Storage(e.to_string()))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| StateStoreError::Storage(e.to_string()))?,
        }))
    }

    async fn load_state_summary(
        &self,
        state_id: &str,
    ) -> Result<Option<StateSummary>, StateStoreError> {
        let row = sqlx::query(
            "SELECT state_id, version, updated_at, state_type FROM agent_states WHERE state_id = ?",
        )
        .bind(state_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| StateStoreError::Storage(e.to_string()))?;

        row.map(|row| {
            let state_type: String = row
                .try_get("state_type")
                .map_err(|e| StateStoreError::Storage(e.to_string()))?;
            Ok(StateSummary {
                state_id: row
                    .try_get("state_id")
                    .map_err(|e| StateStoreError::Storage(e.to_string()))?,
                state_type: parse_kind(&state_type)?,
                version: row
                    .try_get("version")
                    .map_err(|e| StateStoreError::Storage(e.to_string()))?,
                updated_at: row
                    .try_get("updated_at")
                    .map_err(|e| StateStoreError::Storage(e.to_string()))?,
            })
        })
        .transpose()
    }

    async fn delete_state(&self, state_id: &str) -> Result<bool, StateStoreError> {
        let result = sqlx::query("DELETE FROM agent_states WHERE state_id = ?")
            .bind(state_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| StateStoreError::Storage(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_states(
        &self,
        kind: Option<StateKind>,
        limit: u32,
    ) -> Result<Vec<StateSummary>, StateStoreError> {
        let mut sql = String::from(
            "SELECT state_id, state_type, version, updated_at FROM agent_states WHERE 1=1",
        );
        if kind.is_some() {
            sql.push_str(" AND state_type = ?");
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(kind) = kind {
            query = query.bind(kind_str(kind));
        }
        query = query.bind(limit.max(1) as i64);

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| StateStoreError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let state_type: String = row
                    .try_get("state_type")
                    .map_err(|e| StateStoreError::Storage(e.to_string()))?;
                Ok(StateSummary {
                    state_id: row
                        .try_get("state_id")
                        .map_err(|e| StateStoreError::Storage(e.to_string()))?,
                    state_type: parse_kind(&state_type)?,
                    version: row
                        .try_get("version")
                        .map_err(|e| StateStoreError::Storage(e.to_string()))?,
                    updated_at: row
                        .try_get("updated_at")
                        .map_err(|e| StateStoreError::Storage(e.to_string()))?,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
