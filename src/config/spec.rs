//! Manifest types for the provisioner.
//!
//! This module defines the structs that map to `metakube.cluster.yaml`.
//! The manifest is the desired state of one cluster together with the
//! knobs that control how the provisioner talks to the control plane.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// The root manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    /// Desired cluster.
    pub cluster: ClusterConfig,
    /// Control-plane API settings.
    #[serde(default)]
    pub api: ApiConfig,
    /// Polling budgets.
    #[serde(default)]
    pub waits: WaitConfig,
    /// Local state settings.
    #[serde(default)]
    pub state: StateConfig,
}

/// Desired state of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Project the cluster belongs to.
    pub project_id: String,
    /// Cluster display name.
    pub name: String,
    /// Human-facing datacenter name.
    #[serde(rename = "dc")]
    pub datacenter: String,
    /// Requested version prefix, e.g. `1.17`.
    pub version: String,
    /// Cluster-local labels (must not repeat project label keys).
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Whether audit logging is enabled.
    #[serde(default)]
    pub audit_logging: bool,
    /// Names of project SSH keys to assign to the cluster.
    #[serde(default)]
    pub ssh_keys: BTreeSet<String>,
    /// `OpenStack` provider settings.
    pub provider: ProviderConfig,
    /// The cluster's first node pool.
    pub node_pool: NodePoolConfig,
}

/// `OpenStack` credentials and tenant selection.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// `OpenStack` tenant (project) name.
    pub tenant: String,
    /// `OpenStack` user name.
    #[serde(default)]
    pub username: String,
    /// `OpenStack` password.
    #[serde(default)]
    pub password: String,
    /// `OpenStack` domain.
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("tenant", &self.tenant)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// Desired node pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodePoolConfig {
    /// Pool name; the pool is always looked up by this name.
    pub name: String,
    /// Desired replica count.
    pub replicas: u32,
    /// Optional autoscaling bounds.
    #[serde(default)]
    pub autoscale: Option<AutoscaleConfig>,
    /// Machine flavor.
    pub flavor: String,
    /// Machine image.
    pub image: String,
    /// Whether nodes get a floating IP.
    #[serde(default = "default_use_floating_ip")]
    pub use_floating_ip: bool,
}

/// Autoscaling bounds for a node pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AutoscaleConfig {
    /// Lower bound.
    pub min_replicas: u32,
    /// Upper bound.
    pub max_replicas: u32,
}

/// Control-plane API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL of the control plane.
    #[serde(default = "default_api_url")]
    pub url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts for a patch that keeps returning 409.
    #[serde(default = "default_conflict_attempts")]
    pub conflict_attempts: u32,
    /// Delay between conflicting patch attempts, in milliseconds.
    #[serde(default = "default_conflict_delay_ms")]
    pub conflict_delay_ms: u64,
}

/// Polling budgets for the wait primitive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitConfig {
    /// Tick interval in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Ticks to wait for the cluster to report healthy.
    #[serde(default = "default_long_ticks")]
    pub cluster_ready_ticks: u32,
    /// Ticks to wait for the node pool to become listable.
    #[serde(default = "default_node_pool_ticks")]
    pub node_pool_ticks: u32,
    /// Ticks to wait for a delete to complete.
    #[serde(default = "default_long_ticks")]
    pub delete_ticks: u32,
    /// Ticks to wait for a new project to become active.
    #[serde(default = "default_project_ticks")]
    pub project_ticks: u32,
}

/// Local state settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Directory holding the state and lock files.
    #[serde(default = "default_state_dir")]
    pub dir: String,
}

fn default_domain() -> String {
    String::from("Default")
}

const fn default_use_floating_ip() -> bool {
    true
}

fn default_api_url() -> String {
    String::from("https://metakube.syseleven.de")
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_conflict_attempts() -> u32 {
    3
}

const fn default_conflict_delay_ms() -> u64 {
    5000
}

const fn default_interval_ms() -> u64 {
    1000
}

const fn default_long_ticks() -> u32 {
    600
}

const fn default_node_pool_ticks() -> u32 {
    300
}

const fn default_project_ticks() -> u32 {
    120
}

fn default_state_dir() -> String {
    String::from(".metakube")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            conflict_attempts: default_conflict_attempts(),
            conflict_delay_ms: default_conflict_delay_ms(),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            cluster_ready_ticks: default_long_ticks(),
            node_pool_ticks: default_node_pool_ticks(),
            delete_ticks: default_long_ticks(),
            project_ticks: default_project_ticks(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

impl ApiConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay between conflicting patch attempts.
    #[must_use]
    pub const fn conflict_delay(&self) -> Duration {
        Duration::from_millis(self.conflict_delay_ms)
    }
}

impl WaitConfig {
    /// Tick interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl NodePoolConfig {
    /// Returns `(min, max)`; `(0, 0)` means autoscaling is disabled.
    #[must_use]
    pub fn autoscale_bounds(&self) -> (u32, u32) {
        self.autoscale
            .map_or((0, 0), |a| (a.min_replicas, a.max_replicas))
    }
}

impl ClusterConfig {
    /// Returns a copy safe to persist: the provider password is cleared.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.provider.password.clear();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let api = ApiConfig::default();
        assert_eq!(api.url, "https://metakube.syseleven.de");
        assert_eq!(api.conflict_attempts, 3);
        assert_eq!(api.conflict_delay(), Duration::from_secs(5));

        let waits = WaitConfig::default();
        assert_eq!(waits.interval(), Duration::from_secs(1));
        assert_eq!(waits.cluster_ready_ticks, 600);
        assert_eq!(waits.node_pool_ticks, 300);
        assert_eq!(waits.delete_ticks, 600);
        assert_eq!(waits.project_ticks, 120);
    }

    #[test]
    fn test_provider_debug_redacts_password() {
        let provider = ProviderConfig {
            tenant: String::from("t"),
            username: String::from("u"),
            password: String::from("hunter2"),
            domain: default_domain(),
        };
        let rendered = format!("{provider:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_autoscale_bounds() {
        let mut pool = NodePoolConfig {
            name: String::from("workers"),
            replicas: 3,
            autoscale: None,
            flavor: String::from("m1.small"),
            image: String::from("Ubuntu Bionic"),
            use_floating_ip: true,
        };
        assert_eq!(pool.autoscale_bounds(), (0, 0));

        pool.autoscale = Some(AutoscaleConfig {
            min_replicas: 1,
            max_replicas: 5,
        });
        assert_eq!(pool.autoscale_bounds(), (1, 5));
    }
}
