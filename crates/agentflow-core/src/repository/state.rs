//! State repository trait: versioned snapshots with optimistic locking.

use agentflow_types::error::StateStoreError;
use agentflow_types::state::{StateKind, StateSnapshot, StateSummary};

/// Durable key-value store of versioned, checksum-validated state snapshots.
///
/// Writers follow the read-modify-write protocol: load (or start from
/// version 0 for a new id), mutate, save with the version they read. A save
/// whose version no longer matches the stored row fails with
/// `StateStoreError::VersionConflict`; the caller reloads and retries.
pub trait StateStore: Send + Sync {
    /// Save a snapshot under optimistic locking.
    ///
    /// On success the returned snapshot carries the incremented version and
    /// the store-stamped `created_at`/`updated_at`.
    fn save_state(
        &self,
        snapshot: StateSnapshot,
    ) -> impl std::future::Future<Output = Result<StateSnapshot, StateStoreError>> + Send;

    /// Load a snapshot by id. Checksum mismatches are logged as warnings,
    /// never raised.
    fn load_state(
        &self,
        state_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<StateSnapshot>, StateStoreError>> + Send;

    /// Load only the metadata of a snapshot.
    fn load_state_summary(
        &self,
        state_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<StateSummary>, StateStoreError>> + Send;

    /// Hard-delete a snapshot. Returns whether a row was removed.
    fn delete_state(
        &self,
        state_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, StateStoreError>> + Send;

    /// List snapshots, newest first, optionally filtered by kind.
    fn list_states(
        &self,
        kind: Option<StateKind>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<StateSummary>, StateStoreError>> + Send;
}
