//! MetaKube API types.
//!
//! Only the fields the provisioner reads or writes are modelled. Every
//! object that is sent back to the API after being read keeps the fields it
//! does not know about in a flattened `extra` map, so a whole-document
//! replace never drops them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Opaque JSON fields carried through unchanged.
pub type Extra = Map<String, Value>;

/// A datacenter as returned by `/api/v1/dc/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Datacenter {
    /// Datacenter metadata.
    #[serde(default)]
    pub metadata: DatacenterMetadata,
    /// Datacenter spec; carries the seed.
    #[serde(default)]
    pub spec: Option<DatacenterSpec>,
}

/// Datacenter metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatacenterMetadata {
    /// Human-facing datacenter name.
    #[serde(default)]
    pub name: String,
}

/// Datacenter spec.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatacenterSpec {
    /// Seed identifier used as `{dc}` in cluster-scoped paths.
    #[serde(default)]
    pub seed: String,
    /// Provider-specific details.
    #[serde(flatten)]
    pub extra: Extra,
}

impl Datacenter {
    /// Returns the seed, if the datacenter has one.
    #[must_use]
    pub fn seed(&self) -> Option<&str> {
        self.spec
            .as_ref()
            .map(|spec| spec.seed.as_str())
            .filter(|seed| !seed.is_empty())
    }
}

/// A project. Its labels are inherited by every cluster in it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project identifier.
    pub id: String,
    /// Project name.
    #[serde(default)]
    pub name: String,
    /// Labels inherited by every cluster in the project.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Project status, `Active` once usable.
    #[serde(default)]
    pub status: String,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set once a delete has been accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl Project {
    /// Status of a project that is ready for use.
    pub const ACTIVE: &'static str = "Active";

    /// Returns true once the project can be used.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == Self::ACTIVE
    }

    /// Returns true once a delete has been accepted.
    #[must_use]
    pub const fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Body of a project create or update.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProjectRequest {
    /// Project name.
    pub name: String,
    /// Project labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// An `OpenStack` tenant visible with the supplied credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier.
    #[serde(default)]
    pub id: String,
    /// Tenant name.
    pub name: String,
}

/// An `OpenStack` image. The API uses Go-style capitalised keys here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    /// Image identifier.
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Image name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Image status.
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// One version reachable by an upgrade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterUpgrade {
    /// Target version.
    pub version: String,
    /// Whether this is the default version.
    #[serde(default)]
    pub default: bool,
}

/// A cluster.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Cluster identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Display name.
    pub name: String,
    /// All labels, including the ones inherited from the project.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Cluster type.
    #[serde(rename = "type", default)]
    pub cluster_type: String,
    /// Cluster spec.
    pub spec: ClusterSpec,
    /// Observed status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterStatus>,
    /// Legacy SSH key list, always sent empty.
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set once a delete has been accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Fields not modelled here.
    #[serde(flatten)]
    pub extra: Extra,
}

impl Cluster {
    /// Returns true once a delete has been accepted.
    #[must_use]
    pub const fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Cluster spec.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Control-plane version.
    #[serde(default)]
    pub version: String,
    /// Audit logging switch.
    #[serde(default)]
    pub audit_logging: AuditLogging,
    /// Cloud selection; immutable once created.
    #[serde(default)]
    pub cloud: ClusterCloud,
    /// Machine networks.
    #[serde(default)]
    pub machine_networks: Vec<Value>,
    /// Fields not modelled here.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Audit logging switch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AuditLogging {
    /// Whether audit logging is enabled.
    #[serde(default)]
    pub enabled: bool,
}

/// Cloud selection of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterCloud {
    /// Human-facing datacenter name.
    #[serde(default)]
    pub dc: String,
    /// `OpenStack` settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openstack: Option<OpenstackCloud>,
    /// Other providers, not modelled here.
    #[serde(flatten)]
    pub extra: Extra,
}

/// `OpenStack` cluster settings.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OpenstackCloud {
    /// `OpenStack` domain.
    #[serde(default)]
    pub domain: String,
    /// Tenant name.
    #[serde(default)]
    pub tenant: String,
    /// User name.
    #[serde(default)]
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
    /// External network used for floating IPs.
    #[serde(default)]
    pub floating_ip_pool: String,
    /// Fields not modelled here.
    #[serde(flatten)]
    pub extra: Extra,
}

impl std::fmt::Debug for OpenstackCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenstackCloud")
            .field("domain", &self.domain)
            .field("tenant", &self.tenant)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("floating_ip_pool", &self.floating_ip_pool)
            .finish_non_exhaustive()
    }
}

/// Observed cluster status.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterStatus {
    /// API server endpoint.
    #[serde(default)]
    pub url: String,
    /// Observed version.
    #[serde(default)]
    pub version: String,
}

/// Readiness indicators of the control-plane components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHealth {
    /// API server.
    #[serde(default)]
    pub apiserver: u8,
    /// Controller.
    #[serde(default)]
    pub controller: u8,
    /// etcd.
    #[serde(default)]
    pub etcd: u8,
    /// Machine controller.
    #[serde(default)]
    pub machine_controller: u8,
    /// Scheduler.
    #[serde(default)]
    pub scheduler: u8,
    /// Cloud provider infrastructure.
    #[serde(default)]
    pub cloud_provider_infrastructure: u8,
    /// User-cluster controller manager.
    #[serde(default)]
    pub user_cluster_controller_manager: u8,
}

impl ClusterHealth {
    /// Healthy when every component reports 1.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        (self.apiserver
            & self.controller
            & self.etcd
            & self.machine_controller
            & self.scheduler
            & self.cloud_provider_infrastructure
            & self.user_cluster_controller_manager)
            == 1
    }
}

/// A node deployment (node pool).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeDeployment {
    /// Node deployment identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Pool name.
    pub name: String,
    /// Desired spec.
    pub spec: NodeDeploymentSpec,
    /// Observed status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeDeploymentStatus>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Fields not modelled here.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Node deployment spec. Patches replace this document as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDeploymentSpec {
    /// Desired replicas.
    #[serde(default)]
    pub replicas: u32,
    /// Autoscale lower bound, 0 when disabled.
    #[serde(default)]
    pub min_replicas: u32,
    /// Autoscale upper bound, 0 when disabled.
    #[serde(default)]
    pub max_replicas: u32,
    /// Machine template.
    #[serde(default)]
    pub template: NodeTemplate,
    /// Fields not modelled here.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Machine template of a node deployment.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    /// Cloud settings.
    #[serde(default)]
    pub cloud: NodeCloud,
    /// Operating system settings, opaque.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub operating_system: Extra,
    /// Fields not modelled here.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Cloud settings of a machine template.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NodeCloud {
    /// `OpenStack` machine settings.
    #[serde(default)]
    pub openstack: NodeOpenstack,
    /// Fields not modelled here.
    #[serde(flatten)]
    pub extra: Extra,
}

/// `OpenStack` machine settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NodeOpenstack {
    /// Machine flavor.
    #[serde(default)]
    pub flavor: String,
    /// Machine image.
    #[serde(default)]
    pub image: String,
    /// Whether nodes get a floating IP.
    #[serde(rename = "useFloatingIP", default)]
    pub use_floating_ip: bool,
    /// Fields not modelled here.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Observed node deployment replica counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDeploymentStatus {
    /// Observed replicas.
    #[serde(default)]
    pub replicas: u32,
    /// Updated replicas.
    #[serde(default)]
    pub updated_replicas: u32,
    /// Ready replicas.
    #[serde(default)]
    pub ready_replicas: u32,
    /// Available replicas.
    #[serde(default)]
    pub available_replicas: u32,
}

/// Combined create request for a cluster and its first node pool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterRequest {
    /// Cluster to create.
    pub cluster: Cluster,
    /// First node pool.
    pub node_deployment: NodeDeployment,
}

/// Partial cluster update.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ClusterPatch {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New labels (cluster-local only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    /// Spec changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<ClusterSpecPatch>,
}

/// Spec part of a [`ClusterPatch`].
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpecPatch {
    /// New version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// New audit logging switch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_logging: Option<AuditLogging>,
}

/// Node pool patch; carries the whole spec.
#[derive(Debug, Clone, Serialize)]
pub struct NodeDeploymentPatch {
    /// Complete replacement spec.
    pub spec: NodeDeploymentSpec,
}

/// Request to align worker nodes with the control-plane version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpgradeNodesRequest {
    /// Version the nodes should run.
    pub version: String,
}

/// A project SSH key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SshKey {
    /// Key identifier.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Key name.
    pub name: String,
    /// Key material.
    pub spec: SshKeySpec,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set once a delete has been accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// SSH key material.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SshKeySpec {
    /// Public key in authorized-keys format.
    pub public_key: String,
    /// Fingerprint computed by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Identifies one cluster in cluster-scoped API paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLocator {
    /// Project identifier.
    pub project_id: String,
    /// Datacenter seed.
    pub seed: String,
    /// Cluster identifier.
    pub cluster_id: String,
}

impl ClusterLocator {
    /// Creates a locator.
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        seed: impl Into<String>,
        cluster_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            seed: seed.into(),
            cluster_id: cluster_id.into(),
        }
    }

    /// Path of the cluster collection this cluster lives in.
    #[must_use]
    pub fn collection_path(&self) -> String {
        clusters_path(&self.project_id, &self.seed)
    }

    /// Path of the cluster itself.
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.cluster_id)
    }

    /// Path of a sub-resource of the cluster.
    #[must_use]
    pub fn sub_path(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.path())
    }
}

/// Path of the cluster collection for a project and seed.
#[must_use]
pub fn clusters_path(project_id: &str, seed: &str) -> String {
    format!("/api/v1/projects/{project_id}/dc/{seed}/clusters")
}
