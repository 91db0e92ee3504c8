//! Output formatting for CLI commands.
//!
//! Every formatter returns a `String`; the binary decides where it goes.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{Manifest, ValidationResult};
use crate::metakube::{ClusterUpgrade, ObservedCluster, Project, SshKey};
use crate::planner::{ChangeGroup, ClusterChanges};
use crate::state::{ClusterState, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    format: OutputFormat,
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Current")]
    from: String,
    #[tabled(rename = "Desired")]
    to: String,
}

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Default")]
    default: String,
}

#[derive(Serialize)]
struct UpdateJson<'a> {
    applied: &'a [ChangeGroup],
    failed: Option<ChangeGroup>,
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct ValidationJson<'a> {
    valid: bool,
    cluster: &'a str,
    project_id: &'a str,
    warnings: &'a [String],
}

#[derive(Serialize)]
struct StateJson<'a> {
    location: &'a str,
    state: Option<&'a ClusterState>,
    lock: Option<&'a LockInfo>,
}

#[derive(Serialize)]
struct KeyJson<'a> {
    #[serde(flatten)]
    key: &'a SshKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    matches_local: Option<bool>,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true when machine-readable output was requested.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Formats the result of manifest validation.
    #[must_use]
    pub fn format_validation(
        &self,
        manifest: &Manifest,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        if self.is_json() {
            return to_json(&ValidationJson {
                valid: result.is_valid(),
                cluster: &manifest.cluster.name,
                project_id: &manifest.cluster.project_id,
                warnings: &result.warnings,
            });
        }

        let cluster = &manifest.cluster;
        let pool = &cluster.node_pool;
        let mut output = format!("{} Manifest is valid\n\n", "✓".green());
        let _ = writeln!(output, "   Cluster:   {} (project {})", cluster.name, cluster.project_id);
        let _ = writeln!(output, "   Datacenter: {}", cluster.datacenter);
        let _ = writeln!(output, "   Version:   {}", cluster.version);
        let _ = writeln!(
            output,
            "   Node pool: {} x{} ({}, {})",
            pool.name, pool.replicas, pool.flavor, pool.image
        );
        let _ = writeln!(output, "   SSH keys:  {}", cluster.ssh_keys.len());

        if show_warnings && !result.warnings.is_empty() {
            let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }
        output
    }

    /// Formats the changes an update would make.
    #[must_use]
    pub fn format_changes(&self, changes: &ClusterChanges) -> String {
        if self.is_json() {
            return to_json(changes);
        }
        if changes.is_empty() {
            return format!("{} Cluster matches the manifest.\n", "✓".green());
        }

        let rows: Vec<ChangeRow> = changes
            .fields
            .iter()
            .map(|change| ChangeRow {
                group: change.group.to_string(),
                field: change.field.clone(),
                from: truncate(&change.from, 40),
                to: truncate(&change.to, 40),
            })
            .collect();

        let mut output = String::from("\nPlanned changes:\n");
        output.push_str(&Table::new(rows).to_string());
        let groups: Vec<String> = changes.groups().iter().map(ToString::to_string).collect();
        let _ = write!(output, "\n\nGroups to update, in order: {}\n", groups.join(" -> ").yellow());
        output
    }

    /// Formats the outcome of an update.
    #[must_use]
    pub fn format_update(&self, applied: &[ChangeGroup], failure: Option<(ChangeGroup, &str)>) -> String {
        if self.is_json() {
            return to_json(&UpdateJson {
                applied,
                failed: failure.map(|(group, _)| group),
                error: failure.map(|(_, error)| error),
            });
        }

        let mut output = String::new();
        for group in applied {
            let _ = writeln!(output, "{} Updated {group}", "✓".green());
        }
        if let Some((group, error)) = failure {
            let _ = writeln!(output, "{} Failed to update {group}: {error}", "✗".red());
        }
        output
    }

    /// Formats the observed state of a cluster.
    #[must_use]
    pub fn format_status(&self, observed: Option<&ObservedCluster>) -> String {
        if self.is_json() {
            return to_json(&observed);
        }
        let Some(cluster) = observed else {
            return format!("{} Cluster does not exist.\n", "✗".red());
        };

        let mut output = format!("\nCluster: {} ({})\n\n", cluster.name.bold(), cluster.locator.cluster_id);
        let _ = writeln!(output, "   Project:    {}", cluster.locator.project_id);
        let _ = writeln!(output, "   Datacenter: {} (seed {})", cluster.datacenter, cluster.locator.seed);
        let _ = writeln!(output, "   Version:    {}", cluster.version);
        if !cluster.url.is_empty() {
            let _ = writeln!(output, "   Endpoint:   {}", cluster.url);
        }
        let _ = writeln!(output, "   Audit log:  {}", on_off(cluster.audit_logging));
        if !cluster.labels.is_empty() {
            let labels: Vec<String> = cluster.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let _ = writeln!(output, "   Labels:     {}", labels.join(", "));
        }
        if !cluster.ssh_keys.is_empty() {
            let keys: Vec<&str> = cluster.ssh_keys.iter().map(String::as_str).collect();
            let _ = writeln!(output, "   SSH keys:   {}", keys.join(", "));
        }

        match &cluster.node_pool {
            Some(pool) => {
                let ready = if pool.status.ready_replicas >= pool.replicas {
                    format!("{}/{} ready", pool.status.ready_replicas, pool.replicas).green()
                } else {
                    format!("{}/{} ready", pool.status.ready_replicas, pool.replicas).yellow()
                };
                let _ = writeln!(
                    output,
                    "\n   Node pool {}: {ready}, {} / {}",
                    pool.name, pool.flavor, pool.image
                );
                if pool.max_replicas > 0 {
                    let _ = writeln!(
                        output,
                        "   Autoscaling between {} and {}",
                        pool.min_replicas, pool.max_replicas
                    );
                }
            }
            None => {
                let _ = writeln!(output, "\n   {} Node pool not found", "⚠".yellow());
            }
        }
        output
    }

    /// Formats the available cluster versions.
    #[must_use]
    pub fn format_versions(&self, versions: &[ClusterUpgrade]) -> String {
        if self.is_json() {
            return to_json(&versions);
        }

        let rows: Vec<VersionRow> = versions
            .iter()
            .map(|v| VersionRow {
                version: v.version.clone(),
                default: if v.default { String::from("*") } else { String::new() },
            })
            .collect();
        let mut output = Table::new(rows).to_string();
        output.push('\n');
        output
    }

    /// Formats the recorded state and lock.
    #[must_use]
    pub fn format_state(&self, location: &str, state: Option<&ClusterState>, lock: Option<&LockInfo>) -> String {
        if self.is_json() {
            return to_json(&StateJson { location, state, lock });
        }

        let mut output = format!("\nState: {location}\n\n");
        match state {
            Some(state) => {
                let _ = writeln!(output, "   Cluster:      {} ({})", state.applied.name, state.cluster_id);
                let _ = writeln!(output, "   Project:      {}", state.project_id);
                let _ = writeln!(output, "   Datacenter:   {} (seed {})", state.datacenter, state.seed);
                let _ = writeln!(output, "   Node pool:    {}", state.node_pool);
                let _ = writeln!(output, "   Created:      {}", state.created_at.format("%Y-%m-%d %H:%M"));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated.format("%Y-%m-%d %H:%M"));

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history:");
                    for entry in state.history.iter().rev().take(5) {
                        let mark = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {mark} {} {} {}",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.changes.join(", ")
                        );
                    }
                }
            }
            None => output.push_str("   No cluster recorded.\n"),
        }

        if let Some(lock) = lock {
            let status = if lock.is_expired() {
                "expired".dimmed().to_string()
            } else {
                format!("{}s left", lock.remaining_secs()).yellow().to_string()
            };
            let _ = writeln!(
                output,
                "\n   Locked by {} for {} ({status})",
                lock.holder, lock.operation
            );
        }
        output
    }

    /// Formats a project.
    #[must_use]
    pub fn format_project(&self, project: &Project) -> String {
        if self.is_json() {
            return to_json(project);
        }

        let status = if project.is_active() {
            project.status.green()
        } else {
            project.status.yellow()
        };
        let mut output = format!("Project {} ({})
", project.name.bold(), project.id);
        let _ = writeln!(output, "   Status:  {status}");
        if let Some(created) = project.creation_timestamp {
            let _ = writeln!(output, "   Created: {}", created.format("%Y-%m-%d %H:%M"));
        }
        if !project.labels.is_empty() {
            let labels: Vec<String> = project.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let _ = writeln!(output, "   Labels:  {}", labels.join(", "));
        }
        output
    }

    /// Formats a project SSH key.
    #[must_use]
    pub fn format_key(&self, key: &SshKey, matches_local: Option<bool>) -> String {
        if self.is_json() {
            return to_json(&KeyJson { key, matches_local });
        }

        let mut output = format!("SSH key {} ({})\n", key.name.bold(), key.id);
        if let Some(fingerprint) = &key.spec.fingerprint {
            let _ = writeln!(output, "   Fingerprint: {fingerprint}");
        }
        let _ = writeln!(output, "   Public key:  {}", truncate(&key.spec.public_key, 60));
        match matches_local {
            Some(true) => {
                let _ = writeln!(output, "   {} Matches the local public key", "✓".green());
            }
            Some(false) => {
                let _ = writeln!(output, "   {} Differs from the local public key", "✗".red());
            }
            None => {}
        }
        output
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &format!("{} {message}", "✓".green()), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &format!("{} {message}", "⚠".yellow()), message)
    }

    fn message(&self, status: &str, text: &str, message: &str) -> String {
        if self.is_json() {
            to_json(&serde_json::json!({ "status": status, "message": message }))
        } else {
            text.to_string()
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

const fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
