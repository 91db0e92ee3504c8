//! Cluster provisioner: the lifecycle orchestrator.
//!
//! Creation validates every remote precondition before the first write,
//! issues one combined create for the cluster and its first node pool,
//! assigns SSH keys and then blocks until the cluster is healthy and the
//! pool is listable. Updates apply change groups in a fixed order and stop
//! at the first failure; groups applied before it stay applied. Version
//! changes step through single-step upgrades until the requested prefix is
//! reached. Nothing is rolled back: the control plane is the source of
//! truth and the next read re-derives state from it.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map};
use tracing::{debug, error, info, warn};

use crate::config::{validate_autoscale, ClusterConfig, WaitConfig};
use crate::error::{ApiError, MetaKubeError, PreconditionError, ProvisionError, Result};
use crate::planner::{ChangeGroup, ClusterChanges};
use crate::reconciler::SshKeyReconciler;
use crate::version::{has_prefix, max_matching, Version};

use super::client::MetaKubeClient;
use super::types::{
    clusters_path, AuditLogging, Cluster, ClusterCloud, ClusterLocator, ClusterPatch, ClusterSpec,
    ClusterSpecPatch, CreateClusterRequest, NodeCloud, NodeDeployment, NodeDeploymentPatch,
    NodeDeploymentSpec, NodeOpenstack, NodeTemplate, OpenstackCloud,
};
use super::wait::{ProbeErrors, Waiter};

/// Cluster type sent on create.
const CLUSTER_TYPE: &str = "kubernetes";

/// External network used for floating IPs.
const FLOATING_IP_POOL: &str = "ext-net";

/// Outcome of an update: groups applied, and the group that failed.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Groups applied successfully, in order.
    pub applied: Vec<ChangeGroup>,
    /// The group that failed with its error; later groups were not tried.
    pub failure: Option<(ChangeGroup, MetaKubeError)>,
}

impl UpdateOutcome {
    /// Returns true if every requested group was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Converts into the applied groups or the failure's error.
    ///
    /// # Errors
    ///
    /// Returns the error of the failed group.
    pub fn into_result(self) -> Result<Vec<ChangeGroup>> {
        match self.failure {
            None => Ok(self.applied),
            Some((_, err)) => Err(err),
        }
    }
}

/// Summary of a version change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    /// Version before the upgrade.
    pub from: String,
    /// Single-step versions patched in, in order.
    pub hops: Vec<String>,
    /// Final control-plane version.
    pub to: String,
}

/// Provisioner for one cluster's lifecycle.
#[derive(Debug, Clone)]
pub struct ClusterProvisioner {
    client: MetaKubeClient,
    waiter: Waiter,
    waits: WaitConfig,
    ssh_keys: SshKeyReconciler,
}

impl ClusterProvisioner {
    /// Creates a new provisioner.
    #[must_use]
    pub fn new(client: MetaKubeClient, waits: &WaitConfig) -> Self {
        let waiter = Waiter::new(waits.interval(), client.cancellation().clone());
        Self {
            ssh_keys: SshKeyReconciler::new(client.clone()),
            client,
            waiter,
            waits: waits.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Preconditions
    // ------------------------------------------------------------------

    /// Resolves a human-facing datacenter name to its seed.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError::UnknownDatacenter`] if the datacenter
    /// does not exist or has no seed.
    pub async fn resolve_seed(&self, datacenter: &str) -> Result<String> {
        let seed = self
            .client
            .datacenter(datacenter)
            .await?
            .and_then(|dc| dc.seed().map(str::to_string));

        seed.ok_or_else(|| {
            MetaKubeError::Precondition(PreconditionError::UnknownDatacenter {
                name: datacenter.to_string(),
            })
        })
    }

    async fn check_tenant(&self, desired: &ClusterConfig) -> Result<()> {
        let tenants = self
            .client
            .openstack_tenants(&desired.datacenter, &desired.provider)
            .await?;
        if tenants.iter().any(|t| t.name == desired.provider.tenant) {
            return Ok(());
        }
        Err(MetaKubeError::Precondition(PreconditionError::UnknownTenant {
            tenant: desired.provider.tenant.clone(),
            datacenter: desired.datacenter.clone(),
            available: tenants.into_iter().map(|t| t.name).collect(),
        }))
    }

    async fn check_image(&self, desired: &ClusterConfig) -> Result<()> {
        let images = self
            .client
            .openstack_images(&desired.datacenter, &desired.provider)
            .await?;
        if images.iter().any(|i| i.name == desired.node_pool.image) {
            return Ok(());
        }
        Err(MetaKubeError::Precondition(PreconditionError::UnknownImage {
            image: desired.node_pool.image.clone(),
            datacenter: desired.datacenter.clone(),
            available: images.into_iter().map(|i| i.name).collect(),
        }))
    }

    async fn check_project_labels(&self, desired: &ClusterConfig) -> Result<()> {
        let project = self.client.project(&desired.project_id).await?;
        check_label_collision(&project.labels, &desired.labels)?;
        Ok(())
    }

    /// Resolves a version prefix against the globally available versions.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::VersionError`] when nothing matches.
    pub async fn resolve_version(&self, prefix: &str) -> Result<Version> {
        let candidates: Vec<String> = self
            .client
            .available_versions()
            .await?
            .into_iter()
            .map(|upgrade| upgrade.version)
            .collect();
        let version = max_matching(&candidates, prefix)?;
        debug!("Version prefix `{prefix}` resolves to {version}");
        Ok(version)
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Validates preconditions and issues the create call.
    ///
    /// Returns as soon as the control plane accepted the cluster; nothing
    /// is written when a precondition fails.
    ///
    /// # Errors
    ///
    /// Returns a precondition, version or API error.
    pub async fn submit(&self, desired: &ClusterConfig) -> Result<ClusterLocator> {
        info!("Creating cluster: {}", desired.name);

        let (min_replicas, max_replicas) = desired.node_pool.autoscale_bounds();
        validate_autoscale(desired.node_pool.replicas, min_replicas, max_replicas)?;

        let seed = self.resolve_seed(&desired.datacenter).await?;
        self.check_tenant(desired).await?;
        self.check_image(desired).await?;
        self.check_project_labels(desired).await?;
        let version = self.resolve_version(&desired.version).await?;

        let request = build_create_request(desired, &version);
        let cluster_id = match self
            .client
            .create_cluster(&desired.project_id, &seed, &request)
            .await
        {
            Ok(cluster) if !cluster.id.is_empty() => cluster.id,
            Ok(cluster) => {
                let reason = format!("created cluster `{}` has no id", cluster.name);
                self.find_created(desired, &seed, &reason).await?
            }
            // The control plane accepted the cluster but its answer is unusable.
            Err(MetaKubeError::Api(
                err @ (ApiError::InvalidResponse { .. } | ApiError::UnexpectedStatus { .. }),
            )) => self.find_created(desired, &seed, &err.to_string()).await?,
            Err(e) => return Err(e),
        };

        info!("Created cluster: {} (ID: {cluster_id}, version {version})", desired.name);
        Ok(ClusterLocator::new(&desired.project_id, seed, cluster_id))
    }

    /// Recovers the id of a cluster whose create response was unusable by
    /// looking it up by name.
    async fn find_created(&self, desired: &ClusterConfig, seed: &str, reason: &str) -> Result<String> {
        warn!(
            "Create of cluster {} in project {} returned an unusable response: {reason}",
            desired.name, desired.project_id
        );

        let ids: Vec<String> = self
            .client
            .clusters(&desired.project_id, seed)
            .await?
            .into_iter()
            .filter(|cluster| {
                cluster.name == desired.name && !cluster.is_deleting() && !cluster.id.is_empty()
            })
            .map(|cluster| cluster.id)
            .collect();

        match ids.as_slice() {
            [id] => {
                warn!("Recovered cluster {} (ID: {id}) by name", desired.name);
                Ok(id.clone())
            }
            _ => Err(MetaKubeError::Api(ApiError::InvalidResponse {
                path: clusters_path(&desired.project_id, seed),
                message: format!(
                    "{reason}; no single cluster named `{}` found, check project {} for an orphaned cluster",
                    desired.name, desired.project_id
                ),
            })),
        }
    }

    /// Assigns SSH keys and waits for the cluster and node pool.
    ///
    /// # Errors
    ///
    /// Returns an error on a failed assignment or a wait timeout; the
    /// partially provisioned cluster is left in place.
    pub async fn complete_creation(
        &self,
        locator: &ClusterLocator,
        desired: &ClusterConfig,
    ) -> Result<()> {
        self.ssh_keys
            .reconcile(locator, &BTreeMap::new(), &desired.ssh_keys)
            .await?;
        self.wait_healthy(locator).await?;
        self.wait_node_pool(locator, &desired.node_pool.name).await?;
        info!("Cluster {} is ready", locator.cluster_id);
        Ok(())
    }

    /// Creates a cluster and blocks until it is ready.
    ///
    /// # Errors
    ///
    /// Returns the first precondition, API or wait error.
    pub async fn create(&self, desired: &ClusterConfig) -> Result<ClusterLocator> {
        let locator = self.submit(desired).await?;
        self.complete_creation(&locator, desired).await?;
        Ok(locator)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Applies the changed groups in order, stopping at the first failure.
    pub async fn update(
        &self,
        locator: &ClusterLocator,
        desired: &ClusterConfig,
        changes: &ClusterChanges,
    ) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();

        for group in changes.groups() {
            info!("Updating {group} of cluster {}", locator.cluster_id);
            let result = match group {
                ChangeGroup::Identity => self.update_identity(locator, desired).await,
                ChangeGroup::NodePool => self.update_node_pool(locator, desired).await,
                ChangeGroup::Version => self
                    .update_version(locator, &desired.version)
                    .await
                    .map(|_| ()),
                ChangeGroup::SshKeys => self
                    .ssh_keys
                    .reconcile_cluster(locator, &desired.ssh_keys)
                    .await
                    .map(|_| ()),
            };

            match result {
                Ok(()) => outcome.applied.push(group),
                Err(e) => {
                    error!("Failed to update {group} of cluster {}: {e}", locator.cluster_id);
                    outcome.failure = Some((group, e));
                    break;
                }
            }
        }

        outcome
    }

    async fn update_identity(&self, locator: &ClusterLocator, desired: &ClusterConfig) -> Result<()> {
        self.check_project_labels(desired).await?;

        let patch = ClusterPatch {
            name: Some(desired.name.clone()),
            labels: Some(desired.labels.clone()),
            spec: Some(ClusterSpecPatch {
                version: None,
                audit_logging: Some(AuditLogging {
                    enabled: desired.audit_logging,
                }),
            }),
        };
        self.client.patch_cluster(locator, &patch).await?;
        Ok(())
    }

    async fn update_node_pool(&self, locator: &ClusterLocator, desired: &ClusterConfig) -> Result<()> {
        let pool = &desired.node_pool;
        let (min_replicas, max_replicas) = pool.autoscale_bounds();
        validate_autoscale(pool.replicas, min_replicas, max_replicas)?;
        self.check_image(desired).await?;

        let current = self.node_pool(locator, &pool.name).await?;

        // The patch replaces the whole spec, so start from what is there.
        let mut spec = current.spec;
        spec.replicas = pool.replicas;
        spec.min_replicas = min_replicas;
        spec.max_replicas = max_replicas;
        spec.template.cloud.openstack.flavor.clone_from(&pool.flavor);
        spec.template.cloud.openstack.image.clone_from(&pool.image);
        spec.template.cloud.openstack.use_floating_ip = pool.use_floating_ip;

        self.client
            .patch_node_deployment(locator, &current.id, &NodeDeploymentPatch { spec })
            .await?;
        Ok(())
    }

    /// Steps the cluster through single-step upgrades until its version
    /// carries `prefix`, then aligns the worker nodes.
    ///
    /// Returns `None` when the version already matches.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError::Downgrade`] when the target is older
    /// than the running version, [`ProvisionError::UpgradeStuck`] when no
    /// further hop is offered, or any API, version or wait error.
    pub async fn update_version(
        &self,
        locator: &ClusterLocator,
        prefix: &str,
    ) -> Result<Option<UpgradeReport>> {
        let cluster = self.client.get_required::<Cluster>(&locator.path()).await?;
        let from = cluster.spec.version;
        if has_prefix(&from, prefix) {
            debug!("Cluster {} already runs {from}", locator.cluster_id);
            return Ok(None);
        }

        let target = self.resolve_version(prefix).await?;
        let mut current: Version = from.parse()?;
        if current > target {
            return Err(MetaKubeError::Precondition(PreconditionError::Downgrade {
                current: from,
                target: target.to_string(),
            }));
        }

        info!("Upgrading cluster {} from {current} towards {target}", locator.cluster_id);
        let mut hops = Vec::new();
        let mut current_text = from.clone();

        while !has_prefix(&current_text, prefix) {
            let offered = self.client.cluster_upgrades(locator).await?;
            let offered: Vec<&str> = offered.iter().map(|u| u.version.as_str()).collect();
            let hop = next_hop(&offered, current, target, prefix)
                .ok_or_else(|| {
                    MetaKubeError::Provision(ProvisionError::UpgradeStuck {
                        version: current_text.clone(),
                    })
                })?;

            info!("Upgrading cluster {} to {hop}", locator.cluster_id);
            let patch = ClusterPatch {
                spec: Some(ClusterSpecPatch {
                    version: Some(hop.to_string()),
                    audit_logging: None,
                }),
                ..ClusterPatch::default()
            };
            let patched = self.client.patch_cluster(locator, &patch).await?;
            current_text = if patched.spec.version.is_empty() {
                hop.to_string()
            } else {
                patched.spec.version
            };
            current = current_text.parse()?;
            hops.push(current_text.clone());

            self.wait_healthy(locator).await?;
        }

        info!("Upgrading nodes of cluster {} to {current_text}", locator.cluster_id);
        self.client.upgrade_nodes(locator, &current_text).await?;

        Ok(Some(UpgradeReport {
            from,
            hops,
            to: current_text,
        }))
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Deletes the cluster and waits until it is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete call fails or the wait times out.
    pub async fn delete(&self, locator: &ClusterLocator) -> Result<()> {
        info!("Deleting cluster: {}", locator.cluster_id);
        self.client.delete_cluster(locator).await?;

        let client = &self.client;
        self.waiter
            .wait_until(
                "cluster deletion",
                self.waits.delete_ticks,
                ProbeErrors::Swallow,
                move || async move {
                    Ok(client
                        .cluster(locator)
                        .await?
                        .is_none_or(|cluster| cluster.is_deleting()))
                },
            )
            .await?;

        info!("Deleted cluster: {}", locator.cluster_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Waits and lookups
    // ------------------------------------------------------------------

    /// Blocks until every control-plane component reports ready.
    ///
    /// # Errors
    ///
    /// Returns a timeout or cancellation error.
    pub async fn wait_healthy(&self, locator: &ClusterLocator) -> Result<()> {
        let client = &self.client;
        self.waiter
            .wait_until(
                "cluster health",
                self.waits.cluster_ready_ticks,
                ProbeErrors::Swallow,
                move || async move { Ok(client.cluster_health(locator).await?.is_healthy()) },
            )
            .await
    }

    async fn wait_node_pool(&self, locator: &ClusterLocator, name: &str) -> Result<()> {
        let this = self;
        self.waiter
            .wait_until(
                "node pool creation",
                self.waits.node_pool_ticks,
                ProbeErrors::ReportOnTimeout,
                move || async move { this.node_pool(locator, name).await.map(|_| true) },
            )
            .await
    }

    /// Finds the node pool by name.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if no pool has that name.
    pub async fn node_pool(&self, locator: &ClusterLocator, name: &str) -> Result<NodeDeployment> {
        self.client
            .node_deployments(locator)
            .await?
            .into_iter()
            .find(|pool| pool.name == name)
            .ok_or_else(|| {
                MetaKubeError::Api(ApiError::NotFound {
                    path: format!("{} (node pool `{name}`)", locator.sub_path("nodedeployments")),
                })
            })
    }
}

/// Rejects cluster labels whose keys are also project labels.
///
/// # Errors
///
/// Returns [`PreconditionError::LabelCollision`] for the first collision.
pub fn check_label_collision(
    project_labels: &BTreeMap<String, String>,
    cluster_labels: &BTreeMap<String, String>,
) -> std::result::Result<(), PreconditionError> {
    match project_labels
        .keys()
        .find_map(|key| cluster_labels.get_key_value(key))
    {
        Some((key, value)) => Err(PreconditionError::LabelCollision {
            key: key.clone(),
            value: value.clone(),
        }),
        None => Ok(()),
    }
}

/// Picks the next single-step hop.
///
/// Hops past the target are skipped unless they still carry the prefix; a
/// hop that is not newer than `current` never counts.
fn next_hop(offered: &[&str], current: Version, target: Version, prefix: &str) -> Option<Version> {
    offered
        .iter()
        .filter_map(|candidate| {
            let version: Version = candidate.parse().ok()?;
            (version > current && (version <= target || has_prefix(candidate, prefix)))
                .then_some(version)
        })
        .max()
}

fn build_create_request(desired: &ClusterConfig, version: &Version) -> CreateClusterRequest {
    let (min_replicas, max_replicas) = desired.node_pool.autoscale_bounds();

    let cluster = Cluster {
        name: desired.name.clone(),
        labels: desired.labels.clone(),
        cluster_type: String::from(CLUSTER_TYPE),
        spec: ClusterSpec {
            version: version.to_string(),
            audit_logging: AuditLogging {
                enabled: desired.audit_logging,
            },
            cloud: ClusterCloud {
                dc: desired.datacenter.clone(),
                openstack: Some(OpenstackCloud {
                    domain: desired.provider.domain.clone(),
                    tenant: desired.provider.tenant.clone(),
                    username: desired.provider.username.clone(),
                    password: desired.provider.password.clone(),
                    floating_ip_pool: String::from(FLOATING_IP_POOL),
                    extra: Map::new(),
                }),
                extra: Map::new(),
            },
            machine_networks: Vec::new(),
            extra: Map::new(),
        },
        ..Cluster::default()
    };

    let mut operating_system = Map::new();
    operating_system.insert(
        String::from("ubuntu"),
        json!({ "distUpgradeOnBoot": false }),
    );

    let node_deployment = NodeDeployment {
        name: desired.node_pool.name.clone(),
        spec: NodeDeploymentSpec {
            replicas: desired.node_pool.replicas,
            min_replicas,
            max_replicas,
            template: NodeTemplate {
                cloud: NodeCloud {
                    openstack: NodeOpenstack {
                        flavor: desired.node_pool.flavor.clone(),
                        image: desired.node_pool.image.clone(),
                        use_floating_ip: desired.node_pool.use_floating_ip,
                        extra: Map::new(),
                    },
                    extra: Map::new(),
                },
                operating_system,
                extra: Map::new(),
            },
            extra: Map::new(),
        },
        ..NodeDeployment::default()
    };

    CreateClusterRequest {
        cluster,
        node_deployment,
    }
}
