//! Static validation of the manifest.
//!
//! Everything that can be checked without talking to the control plane is
//! checked here, once, before any operation starts. Remote preconditions
//! (datacenter, tenant, image, project labels) are checked by the
//! provisioner.

use crate::error::{ConfigError, MetaKubeError, Result};
use tracing::debug;

use super::spec::{ApiConfig, ClusterConfig, Manifest, NodePoolConfig, WaitConfig};

/// Validator for cluster manifests.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first validation error when any check fails.
    pub fn validate(&self, manifest: &Manifest) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_cluster(&manifest.cluster, &mut result);
        Self::validate_node_pool(&manifest.cluster.node_pool, &mut result);
        Self::validate_api(&manifest.api, &mut result);
        Self::validate_waits(&manifest.waits, &mut result);

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(MetaKubeError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_cluster(cluster: &ClusterConfig, result: &mut ValidationResult) {
        for (field, value) in [
            ("cluster.project_id", &cluster.project_id),
            ("cluster.name", &cluster.name),
            ("cluster.dc", &cluster.datacenter),
            ("cluster.provider.tenant", &cluster.provider.tenant),
            ("cluster.provider.domain", &cluster.provider.domain),
        ] {
            if value.trim().is_empty() {
                result.error(field, format!("{field} cannot be empty"));
            }
        }

        if cluster.provider.username.is_empty() {
            result.error(
                "cluster.provider.username",
                "Provider username is required (set it or METAKUBE_PROVIDER_USERNAME)",
            );
        }
        if cluster.provider.password.is_empty() {
            result.error(
                "cluster.provider.password",
                "Provider password is required (set it or METAKUBE_PROVIDER_PASSWORD)",
            );
        }

        if cluster.version.is_empty() {
            result
                .warnings
                .push(String::from("cluster.version: empty prefix selects the newest available version"));
        } else if !is_valid_version_prefix(&cluster.version) {
            result.error(
                "cluster.version",
                format!(
                    "Version prefix '{}' is invalid. Must be digits separated by dots, e.g. 1.17",
                    cluster.version
                ),
            );
        }

        for key in cluster.labels.keys() {
            if key.trim().is_empty() {
                result.error("cluster.labels", "Label keys cannot be empty");
            }
        }

        for key in &cluster.ssh_keys {
            if key.trim().is_empty() {
                result.error("cluster.ssh_keys", "SSH key names cannot be empty");
            }
        }
        if cluster.ssh_keys.is_empty() {
            result
                .warnings
                .push(String::from("cluster.ssh_keys: no SSH keys will be assigned to the nodes"));
        }
    }

    fn validate_node_pool(pool: &NodePoolConfig, result: &mut ValidationResult) {
        if !is_valid_name(&pool.name) {
            result.error(
                "cluster.node_pool.name",
                format!(
                    "Node pool name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    pool.name
                ),
            );
        }

        if pool.replicas == 0 {
            result.error("cluster.node_pool.replicas", "Replica count must be at least 1");
        }

        let (min_replicas, max_replicas) = pool.autoscale_bounds();
        if let Err(err) = validate_autoscale(pool.replicas, min_replicas, max_replicas) {
            result.error("cluster.node_pool.autoscale", err.to_string());
        }

        if pool.flavor.trim().is_empty() {
            result.error("cluster.node_pool.flavor", "Flavor cannot be empty");
        }
        if pool.image.trim().is_empty() {
            result.error("cluster.node_pool.image", "Image cannot be empty");
        }
    }

    fn validate_api(api: &ApiConfig, result: &mut ValidationResult) {
        if !(api.url.starts_with("http://") || api.url.starts_with("https://")) {
            result.error(
                "api.url",
                format!("API URL '{}' must start with http:// or https://", api.url),
            );
        }
        if api.conflict_attempts == 0 {
            result.error("api.conflict_attempts", "At least one attempt is required");
        }
        if api.timeout_secs == 0 {
            result.error("api.timeout_secs", "Request timeout must be positive");
        }
    }

    fn validate_waits(waits: &WaitConfig, result: &mut ValidationResult) {
        if waits.interval_ms == 0 {
            result.error("waits.interval_ms", "Wait interval must be positive");
        }
        for (field, ticks) in [
            ("waits.cluster_ready_ticks", waits.cluster_ready_ticks),
            ("waits.node_pool_ticks", waits.node_pool_ticks),
            ("waits.delete_ticks", waits.delete_ticks),
            ("waits.project_ticks", waits.project_ticks),
        ] {
            if ticks == 0 {
                result.error(field, format!("{field} must be at least 1"));
            }
        }
    }
}

/// Checks node pool autoscale bounds against the replica count.
///
/// Both bounds zero disables autoscaling. Otherwise `min <= max` and
/// `min <= replicas <= max` must hold.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidAutoscale`] naming the bounds.
pub fn validate_autoscale(
    replicas: u32,
    min_replicas: u32,
    max_replicas: u32,
) -> std::result::Result<(), ConfigError> {
    if min_replicas == 0 && max_replicas == 0 {
        return Ok(());
    }

    let reason = if min_replicas > max_replicas {
        "minimum is greater than maximum"
    } else if replicas < min_replicas || replicas > max_replicas {
        "replicas must lie within the bounds"
    } else {
        return Ok(());
    };

    Err(ConfigError::InvalidAutoscale {
        min_replicas,
        max_replicas,
        replicas,
        reason: reason.to_string(),
    })
}

fn is_valid_version_prefix(prefix: &str) -> bool {
    !prefix.starts_with('.')
        && !prefix.contains("..")
        && prefix.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    first.is_ascii_lowercase()
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

impl ValidationResult {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
