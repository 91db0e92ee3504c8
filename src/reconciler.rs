//! Reconciler for the SSH keys assigned to a cluster.
//!
//! Keys live at project scope; a cluster only holds assignments to them.
//! Reconciling compares the assigned name set with the desired name set and
//! issues the minimal assign and unassign calls. There is no rollback: each
//! call is idempotent, so a failed pass is simply repeated.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{MetaKubeError, PreconditionError, Result};
use crate::metakube::{ClusterLocator, MetaKubeClient, SshKey};

/// Minimal set of changes between assigned and desired keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SshKeyPlan {
    /// Names to assign; resolved against the project key list.
    pub assign: BTreeSet<String>,
    /// Names to unassign, with their already-known ids.
    pub unassign: BTreeMap<String, String>,
}

impl SshKeyPlan {
    /// Computes `desired - current` and `current - desired`.
    #[must_use]
    pub fn compute(current: &BTreeMap<String, String>, desired: &BTreeSet<String>) -> Self {
        let assign = desired
            .iter()
            .filter(|name| !current.contains_key(*name))
            .cloned()
            .collect();
        let unassign = current
            .iter()
            .filter(|(name, _)| !desired.contains(*name))
            .map(|(name, id)| (name.clone(), id.clone()))
            .collect();

        Self { assign, unassign }
    }

    /// Returns true if nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assign.is_empty() && self.unassign.is_empty()
    }
}

/// Applies SSH key plans to a cluster.
#[derive(Debug, Clone)]
pub struct SshKeyReconciler {
    client: MetaKubeClient,
}

impl SshKeyReconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(client: MetaKubeClient) -> Self {
        Self { client }
    }

    /// Reads the keys currently assigned to the cluster as name to id.
    ///
    /// # Errors
    ///
    /// Returns an error if the API call fails.
    pub async fn assigned(&self, locator: &ClusterLocator) -> Result<BTreeMap<String, String>> {
        let keys = self.client.cluster_ssh_keys(locator).await?;
        Ok(keys.into_iter().map(|key| (key.name, key.id)).collect())
    }

    /// Reconciles against the cluster's current assignments.
    ///
    /// # Errors
    ///
    /// Returns the first error; earlier calls stay applied.
    pub async fn reconcile_cluster(
        &self,
        locator: &ClusterLocator,
        desired: &BTreeSet<String>,
    ) -> Result<SshKeyPlan> {
        let current = self.assigned(locator).await?;
        self.reconcile(locator, &current, desired).await
    }

    /// Reconciles a known current assignment towards `desired`.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError::UnknownSshKey`] when a desired name is
    /// not a project key, or the first API error; earlier calls stay applied.
    pub async fn reconcile(
        &self,
        locator: &ClusterLocator,
        current: &BTreeMap<String, String>,
        desired: &BTreeSet<String>,
    ) -> Result<SshKeyPlan> {
        let plan = SshKeyPlan::compute(current, desired);
        if plan.is_empty() {
            debug!("SSH keys of cluster {} already match", locator.cluster_id);
            return Ok(plan);
        }

        if !plan.assign.is_empty() {
            let project_keys = self.client.project_ssh_keys(&locator.project_id).await?;
            for name in &plan.assign {
                let id = resolve_key_id(&project_keys, name)?;
                info!("Assigning SSH key {name} to cluster {}", locator.cluster_id);
                self.client.assign_ssh_key(locator, id).await?;
            }
        }

        for (name, id) in &plan.unassign {
            info!("Removing SSH key {name} from cluster {}", locator.cluster_id);
            self.client.unassign_ssh_key(locator, id).await?;
        }

        Ok(plan)
    }
}

fn resolve_key_id<'a>(keys: &'a [SshKey], name: &str) -> Result<&'a str> {
    keys.iter()
        .find(|key| key.name == name && key.deletion_timestamp.is_none())
        .map(|key| key.id.as_str())
        .ok_or_else(|| {
            MetaKubeError::Precondition(PreconditionError::UnknownSshKey {
                name: name.to_string(),
            })
        })
}
