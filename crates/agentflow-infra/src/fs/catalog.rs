//! Filesystem agent catalog.
//!
//! An agent exists when `<agents_dir>/<agent_id>.md` does. The directory is
//! scanned once at construction and on explicit `refresh()`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use agentflow_core::agent::AgentCatalog;

/// Catalog of agents defined as markdown files in a directory.
pub struct FsAgentCatalog {
    agents_dir: PathBuf,
    agents: RwLock<HashSet<String>>,
}

impl FsAgentCatalog {
    pub fn new(agents_dir: impl Into<PathBuf>) -> Self {
        let agents_dir = agents_dir.into();
        let agents = scan(&agents_dir);
        if agents.is_empty() {
            tracing::warn!(dir = %agents_dir.display(), "agent catalog is empty");
        }
        Self {
            agents_dir,
            agents: RwLock::new(agents),
        }
    }

    /// Re-scan the agents directory.
    pub fn refresh(&self) {
        let agents = scan(&self.agents_dir);
        *self.agents.write().expect("catalog lock poisoned") = agents;
    }
}

fn scan(agents_dir: &Path) -> HashSet<String> {
    let Ok(entries) = std::fs::read_dir(agents_dir) else {
        return HashSet::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect()
}

impl AgentCatalog for FsAgentCatalog {
    fn exists(&self, agent_id: &str) -> bool {
        self.agents
            .read()
            .expect("catalog lock poisoned")
            .contains(agent_id)
    }

    fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .read()
            .expect("catalog lock poisoned")
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_markdown_stems() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("backend.md"), "# Backend Agent").unwrap();
        std::fs::write(dir.path().join("frontend.md"), "# Frontend Agent").unwrap();
        std::fs::write(dir.path().join("README.txt"), "not an agent").unwrap();

        let catalog = FsAgentCatalog::new(dir.path());
        assert!(catalog.exists("backend"));
        assert!(catalog.exists("frontend"));
        assert!(!catalog.exists("README"));
        assert_eq!(catalog.agent_ids(), vec!["backend", "frontend"]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FsAgentCatalog::new(dir.path().join("nope"));
        assert!(!catalog.exists("backend"));
        assert!(catalog.agent_ids().is_empty());
    }

    #[test]
    fn refresh_picks_up_new_agents() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FsAgentCatalog::new(dir.path());
        assert!(!catalog.exists("planner"));

        std::fs::write(dir.path().join("planner.md"), "# Planner").unwrap();
        catalog.refresh();
        assert!(catalog.exists("planner"));
    }
}
