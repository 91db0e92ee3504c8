//! Change detection between observed and desired cluster state.
//!
//! Changes are grouped the way the control plane applies them: one cluster
//! patch for identity fields, one whole-spec patch for the node pool, a
//! stepped upgrade for the version, and assignment calls for SSH keys.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::config::ClusterConfig;
use crate::error::PlanError;
use crate::metakube::ObservedCluster;
use crate::version::has_prefix;

/// Field groups, in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeGroup {
    /// Name, labels, audit logging.
    Identity,
    /// Replicas, autoscale bounds, flavor, image, floating IP.
    NodePool,
    /// Control-plane version.
    Version,
    /// Assigned SSH keys.
    SshKeys,
}

impl fmt::Display for ChangeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Identity => "identity",
            Self::NodePool => "node pool",
            Self::Version => "version",
            Self::SshKeys => "ssh keys",
        };
        f.write_str(name)
    }
}

/// One changed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// Group the field belongs to.
    pub group: ChangeGroup,
    /// Field path.
    pub field: String,
    /// Observed value.
    pub from: String,
    /// Desired value.
    pub to: String,
}

impl FieldChange {
    /// Creates a field change.
    #[must_use]
    pub fn new(
        group: ChangeGroup,
        field: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self {
            group,
            field: field.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// All changes needed to move a cluster to its desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterChanges {
    /// Changed fields.
    pub fields: Vec<FieldChange>,
}

impl ClusterChanges {
    /// Diffs observed state against the desired cluster.
    #[must_use]
    pub fn between(observed: &ObservedCluster, desired: &ClusterConfig) -> Self {
        let mut fields = Vec::new();
        let mut push = |group, field: &str, from: String, to: String| {
            if from != to {
                fields.push(FieldChange::new(group, field, from, to));
            }
        };

        push(ChangeGroup::Identity, "name", observed.name.clone(), desired.name.clone());
        push(
            ChangeGroup::Identity,
            "labels",
            render_labels(&observed.labels),
            render_labels(&desired.labels),
        );
        push(
            ChangeGroup::Identity,
            "audit_logging",
            observed.audit_logging.to_string(),
            desired.audit_logging.to_string(),
        );

        let pool = &desired.node_pool;
        let (min_replicas, max_replicas) = pool.autoscale_bounds();
        if let Some(current) = &observed.node_pool {
            push(ChangeGroup::NodePool, "node_pool.replicas", current.replicas.to_string(), pool.replicas.to_string());
            push(
                ChangeGroup::NodePool,
                "node_pool.autoscale",
                render_bounds(current.min_replicas, current.max_replicas),
                render_bounds(min_replicas, max_replicas),
            );
            push(ChangeGroup::NodePool, "node_pool.flavor", current.flavor.clone(), pool.flavor.clone());
            push(ChangeGroup::NodePool, "node_pool.image", current.image.clone(), pool.image.clone());
            push(
                ChangeGroup::NodePool,
                "node_pool.use_floating_ip",
                current.use_floating_ip.to_string(),
                pool.use_floating_ip.to_string(),
            );
        } else {
            push(ChangeGroup::NodePool, "node_pool", String::from("<missing>"), pool.name.clone());
        }

        if !has_prefix(&observed.version, &desired.version) {
            push(ChangeGroup::Version, "version", observed.version.clone(), desired.version.clone());
        }

        push(
            ChangeGroup::SshKeys,
            "ssh_keys",
            render_set(&observed.ssh_keys),
            render_set(&desired.ssh_keys),
        );

        debug!("Computed {} field change(s)", fields.len());
        Self { fields }
    }

    /// Groups with at least one change, in application order.
    #[must_use]
    pub fn groups(&self) -> BTreeSet<ChangeGroup> {
        self.fields.iter().map(|change| change.group).collect()
    }

    /// Returns true if the group has changes.
    #[must_use]
    pub fn touches(&self, group: ChangeGroup) -> bool {
        self.fields.iter().any(|change| change.group == group)
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Rejects changes to fields that are fixed once the cluster exists.
///
/// # Errors
///
/// Returns [`PlanError::RequiresReplacement`] for the first immutable field
/// that differs.
pub fn check_immutable(applied: &ClusterConfig, desired: &ClusterConfig) -> Result<(), PlanError> {
    let pairs = [
        ("project_id", &applied.project_id, &desired.project_id),
        ("dc", &applied.datacenter, &desired.datacenter),
        ("provider.tenant", &applied.provider.tenant, &desired.provider.tenant),
        ("provider.username", &applied.provider.username, &desired.provider.username),
        ("node_pool.name", &applied.node_pool.name, &desired.node_pool.name),
    ];

    for (field, from, to) in pairs {
        if from != to {
            return Err(PlanError::RequiresReplacement {
                field: field.to_string(),
                from: from.clone(),
                to: to.clone(),
            });
        }
    }
    Ok(())
}

fn render_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn render_set(items: &BTreeSet<String>) -> String {
    items.iter().cloned().collect::<Vec<_>>().join(",")
}

fn render_bounds(min_replicas: u32, max_replicas: u32) -> String {
    if min_replicas == 0 && max_replicas == 0 {
        String::from("off")
    } else {
        format!("{min_replicas}..{max_replicas}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoscaleConfig, NodePoolConfig, ProviderConfig};
    use crate::metakube::{ClusterLocator, NodeDeploymentStatus, ObservedNodePool};

    fn desired() -> ClusterConfig {
        ClusterConfig {
            project_id: String::from("prj"),
            name: String::from("demo"),
            datacenter: String::from("dbl1"),
            version: String::from("1.17"),
            labels: BTreeMap::from([(String::from("env"), String::from("prod"))]),
            audit_logging: false,
            ssh_keys: BTreeSet::from([String::from("alice")]),
            provider: ProviderConfig {
                tenant: String::from("t1"),
                username: String::from("ops"),
                password: String::from("secret"),
                domain: String::from("Default"),
            },
            node_pool: NodePoolConfig {
                name: String::from("workers"),
                replicas: 3,
                autoscale: None,
                flavor: String::from("m1.small"),
                image: String::from("img"),
                use_floating_ip: true,
            },
        }
    }

    fn observed() -> ObservedCluster {
        ObservedCluster {
            locator: ClusterLocator::new("prj", "seed", "c1"),
            name: String::from("demo"),
            datacenter: String::from("dbl1"),
            version: String::from("1.17.3"),
            url: String::new(),
            labels: BTreeMap::from([(String::from("env"), String::from("prod"))]),
            audit_logging: false,
            tenant: Some(String::from("t1")),
            username: Some(String::from("ops")),
            node_pool: Some(ObservedNodePool {
                id: String::from("nd1"),
                name: String::from("workers"),
                replicas: 3,
                min_replicas: 0,
                max_replicas: 0,
                flavor: String::from("m1.small"),
                image: String::from("img"),
                use_floating_ip: true,
                status: NodeDeploymentStatus::default(),
            }),
            ssh_keys: BTreeSet::from([String::from("alice")]),
        }
    }

    #[test]
    fn test_no_changes() {
        let changes = ClusterChanges::between(&observed(), &desired());
        assert!(changes.is_empty(), "{changes:?}");
    }

    #[test]
    fn test_version_uses_prefix_semantics() {
        let mut want = desired();
        want.version = String::from("1.17.3");
        assert!(ClusterChanges::between(&observed(), &want).is_empty());

        want.version = String::from("1.18");
        let changes = ClusterChanges::between(&observed(), &want);
        assert_eq!(changes.groups(), BTreeSet::from([ChangeGroup::Version]));
    }

    #[test]
    fn test_groups_in_application_order() {
        let mut want = desired();
        want.ssh_keys.insert(String::from("bob"));
        want.labels.insert(String::from("tier"), String::from("gold"));
        want.node_pool.autoscale = Some(AutoscaleConfig {
            min_replicas: 1,
            max_replicas: 5,
        });

        let changes = ClusterChanges::between(&observed(), &want);
        let groups: Vec<ChangeGroup> = changes.groups().into_iter().collect();
        assert_eq!(
            groups,
            [ChangeGroup::Identity, ChangeGroup::NodePool, ChangeGroup::SshKeys]
        );
        assert!(changes.touches(ChangeGroup::NodePool));
        assert!(!changes.touches(ChangeGroup::Version));
    }

    #[test]
    fn test_missing_node_pool_is_a_change() {
        let mut current = observed();
        current.node_pool = None;
        let changes = ClusterChanges::between(&current, &desired());
        assert!(changes.touches(ChangeGroup::NodePool));
    }

    #[test]
    fn test_immutable_fields() {
        assert!(check_immutable(&desired(), &desired()).is_ok());

        let mut want = desired();
        want.datacenter = String::from("cbk1");
        let err = check_immutable(&desired(), &want).unwrap_err();
        assert!(matches!(err, PlanError::RequiresReplacement { ref field, .. } if field == "dc"));

        let mut want = desired();
        want.node_pool.name = String::from("other");
        assert!(check_immutable(&desired(), &want).is_err());

        let mut want = desired();
        want.name = String::from("renamed");
        want.provider.password = String::from("rotated");
        assert!(check_immutable(&desired(), &want).is_ok());
    }
}
