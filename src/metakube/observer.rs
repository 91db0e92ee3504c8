//! Cluster observer for refreshing observed state.
//!
//! Reading never mutates anything. A cluster that is gone or whose delete
//! has been accepted is reported as absent.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;

use super::client::MetaKubeClient;
use super::types::{ClusterLocator, NodeDeployment, NodeDeploymentStatus};

/// Observed state of a cluster.
#[derive(Debug, Clone, Serialize)]
pub struct ObservedCluster {
    /// Where the cluster lives.
    pub locator: ClusterLocator,
    /// Display name.
    pub name: String,
    /// Human-facing datacenter name.
    pub datacenter: String,
    /// Observed control-plane version, as reported.
    pub version: String,
    /// API server endpoint.
    pub url: String,
    /// Cluster-local labels; project labels are subtracted.
    pub labels: BTreeMap<String, String>,
    /// Audit logging switch.
    pub audit_logging: bool,
    /// `OpenStack` tenant, when reported.
    pub tenant: Option<String>,
    /// `OpenStack` user name, when reported.
    pub username: Option<String>,
    /// The node pool looked up by name.
    pub node_pool: Option<ObservedNodePool>,
    /// Names of the SSH keys assigned to the cluster.
    pub ssh_keys: BTreeSet<String>,
}

/// Observed node pool.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ObservedNodePool {
    /// Node deployment identifier.
    pub id: String,
    /// Pool name.
    pub name: String,
    /// Desired replicas.
    pub replicas: u32,
    /// Autoscale lower bound.
    pub min_replicas: u32,
    /// Autoscale upper bound.
    pub max_replicas: u32,
    /// Machine flavor.
    pub flavor: String,
    /// Machine image.
    pub image: String,
    /// Whether nodes get a floating IP.
    pub use_floating_ip: bool,
    /// Replica counts reported by the control plane.
    pub status: NodeDeploymentStatus,
}

impl From<NodeDeployment> for ObservedNodePool {
    fn from(pool: NodeDeployment) -> Self {
        let openstack = pool.spec.template.cloud.openstack;
        Self {
            id: pool.id,
            name: pool.name,
            replicas: pool.spec.replicas,
            min_replicas: pool.spec.min_replicas,
            max_replicas: pool.spec.max_replicas,
            flavor: openstack.flavor,
            image: openstack.image,
            use_floating_ip: openstack.use_floating_ip,
            status: pool.status.unwrap_or_default(),
        }
    }
}

/// Observer for clusters.
#[derive(Debug, Clone)]
pub struct ClusterObserver {
    client: MetaKubeClient,
}

impl ClusterObserver {
    /// Creates a new observer.
    #[must_use]
    pub const fn new(client: MetaKubeClient) -> Self {
        Self { client }
    }

    /// Reads the full observed state of a cluster.
    ///
    /// Returns `None` when the cluster does not exist or is being deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if any API call fails.
    pub async fn read(
        &self,
        locator: &ClusterLocator,
        node_pool_name: &str,
    ) -> Result<Option<ObservedCluster>> {
        info!("Reading cluster {}", locator.cluster_id);

        let Some(cluster) = self.client.cluster(locator).await? else {
            debug!("Cluster {} not found", locator.cluster_id);
            return Ok(None);
        };
        if cluster.is_deleting() {
            debug!("Cluster {} is being deleted", locator.cluster_id);
            return Ok(None);
        }

        let node_pool = self
            .client
            .node_deployments(locator)
            .await?
            .into_iter()
            .find(|pool| pool.name == node_pool_name)
            .map(ObservedNodePool::from);

        let project = self.client.project(&locator.project_id).await?;
        let mut labels = cluster.labels;
        labels.retain(|key, _| !project.labels.contains_key(key));

        let ssh_keys = self
            .client
            .cluster_ssh_keys(locator)
            .await?
            .into_iter()
            .map(|key| key.name)
            .collect();

        let status = cluster.status.unwrap_or_default();
        let version = if cluster.spec.version.is_empty() {
            status.version
        } else {
            cluster.spec.version
        };
        let openstack = cluster.spec.cloud.openstack;

        Ok(Some(ObservedCluster {
            locator: locator.clone(),
            name: cluster.name,
            datacenter: cluster.spec.cloud.dc,
            version,
            url: status.url,
            labels,
            audit_logging: cluster.spec.audit_logging.enabled,
            tenant: openstack
                .as_ref()
                .map(|o| o.tenant.clone())
                .filter(|t| !t.is_empty()),
            username: openstack
                .map(|o| o.username)
                .filter(|u| !u.is_empty()),
            node_pool,
            ssh_keys,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CLUSTER: &str = "/api/v1/projects/prj/dc/seed/clusters/c1";

    fn observer(server: &MockServer) -> ClusterObserver {
        let config = ApiConfig {
            url: server.uri(),
            ..ApiConfig::default()
        };
        ClusterObserver::new(MetaKubeClient::new(&config, "token", CancellationToken::new()).unwrap())
    }

    async fn mount_get(server: &MockServer, at: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_read_assembles_observed_state() {
        let server = MockServer::start().await;
        mount_get(
            &server,
            CLUSTER,
            json!({
                "id": "c1",
                "name": "demo",
                "labels": {"team": "x", "env": "prod"},
                "spec": {
                    "version": "1.17.3",
                    "auditLogging": {"enabled": true},
                    "cloud": {"dc": "dbl1", "openstack": {"tenant": "t1", "username": "ops"}}
                },
                "status": {"url": "https://c1.example", "version": "1.17.3"}
            }),
        )
        .await;
        mount_get(
            &server,
            &format!("{CLUSTER}/nodedeployments"),
            json!([{
                "id": "nd1",
                "name": "workers",
                "spec": {
                    "replicas": 3,
                    "template": {"cloud": {"openstack": {"flavor": "m1.small", "image": "img", "useFloatingIP": true}}}
                },
                "status": {"replicas": 3, "readyReplicas": 2}
            }]),
        )
        .await;
        mount_get(&server, "/api/v1/projects/prj", json!({"id": "prj", "labels": {"team": "x"}})).await;
        mount_get(
            &server,
            &format!("{CLUSTER}/sshkeys"),
            json!([{"id": "ka", "name": "alice", "spec": {"publicKey": "ssh-rsa A"}}]),
        )
        .await;

        let observed = observer(&server)
            .read(&ClusterLocator::new("prj", "seed", "c1"), "workers")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(observed.name, "demo");
        assert_eq!(observed.datacenter, "dbl1");
        assert_eq!(observed.version, "1.17.3");
        assert_eq!(observed.url, "https://c1.example");
        assert!(observed.audit_logging);
        assert_eq!(
            observed.labels,
            BTreeMap::from([(String::from("env"), String::from("prod"))])
        );
        assert_eq!(observed.tenant.as_deref(), Some("t1"));
        let pool = observed.node_pool.unwrap();
        assert_eq!(pool.replicas, 3);
        assert_eq!(pool.status.ready_replicas, 2);
        assert!(observed.ssh_keys.contains("alice"));
    }

    #[tokio::test]
    async fn test_read_soft_deleted_is_absent() {
        let server = MockServer::start().await;
        mount_get(
            &server,
            CLUSTER,
            json!({
                "id": "c1",
                "name": "demo",
                "spec": {"version": "1.17.3"},
                "deletionTimestamp": "2020-03-03T04:06:52Z"
            }),
        )
        .await;

        let observed = observer(&server)
            .read(&ClusterLocator::new("prj", "seed", "c1"), "workers")
            .await
            .unwrap();
        assert!(observed.is_none());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(CLUSTER))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let observed = observer(&server)
            .read(&ClusterLocator::new("prj", "seed", "c1"), "workers")
            .await
            .unwrap();
        assert!(observed.is_none());
    }
}
