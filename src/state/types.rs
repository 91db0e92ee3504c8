//! State types recorded between invocations.
//!
//! The control plane is the source of truth. Local state only remembers
//! which cluster a manifest owns and what was last applied to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ClusterConfig;
use crate::metakube::ClusterLocator;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept.
const MAX_HISTORY: usize = 50;

/// Recorded state of one managed cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterState {
    /// State format version.
    pub version: String,
    /// Cluster identifier.
    pub cluster_id: String,
    /// Project the cluster belongs to.
    pub project_id: String,
    /// Human-facing datacenter name.
    pub datacenter: String,
    /// Datacenter seed used in cluster paths.
    pub seed: String,
    /// Name of the managed node pool.
    pub node_pool: String,
    /// Last applied manifest, provider password removed.
    pub applied: ClusterConfig,
    /// When the cluster was created.
    pub created_at: DateTime<Utc>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Recent operations.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A single entry in the operation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation ran.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: Operation,
    /// Groups or resources affected.
    pub changes: Vec<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message of a failed operation.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Initial creation.
    Create,
    /// Update of existing fields.
    Update,
}

impl ClusterState {
    /// Creates the state of a freshly created cluster.
    #[must_use]
    pub fn new(locator: &ClusterLocator, applied: &ClusterConfig) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION.to_string(),
            cluster_id: locator.cluster_id.clone(),
            project_id: locator.project_id.clone(),
            datacenter: applied.datacenter.clone(),
            seed: locator.seed.clone(),
            node_pool: applied.node_pool.name.clone(),
            applied: applied.redacted(),
            created_at: now,
            last_updated: now,
            history: Vec::new(),
        }
    }

    /// Locator of the recorded cluster.
    #[must_use]
    pub fn locator(&self) -> ClusterLocator {
        ClusterLocator::new(&self.project_id, &self.seed, &self.cluster_id)
    }

    /// Records a new applied manifest.
    pub fn set_applied(&mut self, applied: &ClusterConfig) {
        self.applied = applied.redacted();
        self.last_updated = Utc::now();
    }

    /// Adds a history entry, dropping the oldest past the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.last_updated = Utc::now();
    }
}

impl HistoryEntry {
    /// Creates a successful entry.
    #[must_use]
    pub fn new(operation: Operation, changes: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            changes,
            success: true,
            error: None,
        }
    }

    /// Creates a failed entry.
    #[must_use]
    pub fn failed(operation: Operation, changes: Vec<String>, error: &str) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, changes)
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Update => "update",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    const MANIFEST: &str = r"
cluster:
  project_id: prj
  name: demo
  dc: dbl1
  version: '1.17'
  provider:
    tenant: t1
    username: ops
    password: secret
  node_pool:
    name: workers
    replicas: 2
    flavor: m1.small
    image: Ubuntu Bionic
";

    fn state() -> ClusterState {
        let manifest = ConfigParser::new().parse_yaml(MANIFEST, None).unwrap();
        ClusterState::new(&ClusterLocator::new("prj", "seed", "c1"), &manifest.cluster)
    }

    #[test]
    fn test_new_state_redacts_password() {
        let state = state();
        assert_eq!(state.cluster_id, "c1");
        assert_eq!(state.seed, "seed");
        assert_eq!(state.node_pool, "workers");
        assert!(state.applied.provider.password.is_empty());
        assert_eq!(state.locator(), ClusterLocator::new("prj", "seed", "c1"));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = state();
        for i in 0..60 {
            state.add_history(HistoryEntry::new(Operation::Update, vec![i.to_string()]));
        }
        assert_eq!(state.history.len(), 50);
        assert_eq!(state.history[0].changes, ["10"]);

        state.add_history(HistoryEntry::failed(Operation::Update, Vec::new(), "boom"));
        let last = state.history.last().unwrap();
        assert!(!last.success);
        assert_eq!(last.error.as_deref(), Some("boom"));
    }
}
