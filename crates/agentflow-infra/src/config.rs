//! Engine configuration loader.
//!
//! Reads `engine.toml` and deserializes it into [`EngineConfig`], falling
//! back to defaults when the file is missing or malformed. Startup never
//! fails on configuration problems; they are logged and defaulted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agentflow_core::recovery::{CircuitBreakerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Engine-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root for the SQLite files and the dead-letter queue.
    pub data_dir: PathBuf,
    /// Directory of workflow definition markdown files.
    pub workflows_dir: PathBuf,
    /// Directory of agent definition markdown files.
    pub agents_dir: PathBuf,
    /// Directory where handoff JSON files are written.
    pub handoffs_dir: PathBuf,
    /// Retry policy for transient store operations.
    pub retry: RetryPolicy,
    /// Circuit breaker settings for downstream calls.
    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            workflows_dir: PathBuf::from("workflows"),
            agents_dir: PathBuf::from("agents"),
            handoffs_dir: PathBuf::from("agents/examples/handoffs"),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("workflow_state.db")
    }

    pub fn events_db_path(&self) -> PathBuf {
        self.data_dir.join("workflow_events.db")
    }

    pub fn handoff_db_path(&self) -> PathBuf {
        self.data_dir.join("handoff_registry.db")
    }

    pub fn dead_letter_dir(&self) -> PathBuf {
        self.data_dir.join("dead_letter_queue")
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker.failure_threshold,
            timeout: Duration::from_secs(self.circuit_breaker.timeout_seconds),
        }
    }
}

/// Circuit breaker knobs as they appear in `engine.toml`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 60,
        }
    }
}

/// Load configuration from a TOML file.
///
/// - Missing file: defaults, at debug level.
/// - Unreadable or unparseable file: defaults, with a warning.
pub async fn load_engine_config(config_path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                path = %config_path.display(),
                "no engine config found, using defaults"
            );
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!(
                path = %config_path.display(),
                error = %err,
                "failed to read engine config, using defaults"
            );
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                path = %config_path.display(),
                error = %err,
                "failed to parse engine config, using defaults"
            );
            EngineConfig::default()
        }
    }
}
