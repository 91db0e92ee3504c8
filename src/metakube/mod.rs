//! `MetaKube` API integration module.
//!
//! This module provides the HTTP transport, the wire types, the wait
//! primitive, the cluster lifecycle operations built on top of them, and the
//! project and SSH key endpoints managed outside of it.

mod client;
mod observer;
mod projects;
mod provisioner;
mod ssh_keys;
mod types;
mod wait;

pub use client::{MetaKubeClient, StatusClass};
pub use observer::{ClusterObserver, ObservedCluster, ObservedNodePool};
pub use projects::ProjectManager;
pub use provisioner::{check_label_collision, ClusterProvisioner, UpdateOutcome, UpgradeReport};
pub use ssh_keys::{same_public_key, SshKeyManager};
pub use types::{
    clusters_path, AuditLogging, Cluster, ClusterCloud, ClusterHealth, ClusterLocator,
    ClusterPatch, ClusterSpec, ClusterSpecPatch, ClusterStatus, ClusterUpgrade,
    CreateClusterRequest, Datacenter, DatacenterMetadata, DatacenterSpec, Extra, Image,
    NodeCloud, NodeDeployment, NodeDeploymentPatch, NodeDeploymentSpec, NodeDeploymentStatus,
    NodeOpenstack, NodeTemplate, OpenstackCloud, Project, ProjectRequest, SshKey, SshKeySpec, Tenant,
    UpgradeNodesRequest,
};
pub use wait::{ProbeErrors, Waiter};
