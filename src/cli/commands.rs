//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Declarative provisioner for `MetaKube` clusters.
#[derive(Parser, Debug)]
#[command(name = "metakube")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the cluster manifest.
    #[arg(short, long, global = true, env = "METAKUBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the cluster manifest.
    Validate {
        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Create the cluster or bring it in line with the manifest.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the observed state of the cluster.
    Status,

    /// Delete the cluster.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// List cluster versions available for new clusters.
    Versions,

    /// Manage projects.
    Project {
        /// Project subcommand.
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Manage project SSH keys.
    Key {
        /// Key subcommand.
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Manage local state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// Project subcommands.
#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Create a project and wait until it is active.
    Create {
        /// Project name.
        name: String,

        /// Project label as `key=value`; repeatable.
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
    },

    /// Show a project.
    Show {
        /// Project id.
        id: String,
    },

    /// Rename a project or replace its labels.
    Update {
        /// Project id.
        id: String,

        /// New project name.
        #[arg(long)]
        name: Option<String>,

        /// Replacement label as `key=value`; repeatable.
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,

        /// Remove all labels.
        #[arg(long, conflicts_with = "labels")]
        clear_labels: bool,
    },

    /// Delete a project.
    Delete {
        /// Project id.
        id: String,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

/// Project SSH key subcommands.
#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// Upload a public key to the project.
    Create {
        /// Key name.
        name: String,

        /// File holding the public key.
        #[arg(long)]
        public_key_file: PathBuf,

        /// Project id; defaults to the manifest's project.
        #[arg(long)]
        project: Option<String>,
    },

    /// Show a project key.
    Show {
        /// Key id.
        id: String,

        /// Compare against this public key file.
        #[arg(long)]
        public_key_file: Option<PathBuf>,

        /// Project id; defaults to the manifest's project.
        #[arg(long)]
        project: Option<String>,
    },

    /// Delete a project key.
    Delete {
        /// Key id.
        id: String,

        /// Project id; defaults to the manifest's project.
        #[arg(long)]
        project: Option<String>,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the recorded state.
    Show,

    /// Remove the state lock.
    Unlock {
        /// Remove a lock that has not expired yet.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from(["metakube", "--output", "json", "apply", "--yes"]).unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Apply { yes: true }));
    }

    #[test]
    fn test_parse_key_create() {
        let cli = Cli::try_parse_from([
            "metakube",
            "key",
            "create",
            "alice",
            "--public-key-file",
            "id_rsa.pub",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Key {
                command: KeyCommands::Create { name, project, .. },
            } => {
                assert_eq!(name, "alice");
                assert!(project.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_project_labels() {
        let cli = Cli::try_parse_from([
            "metakube", "project", "create", "demo", "--label", "team=x", "--label", "env=a=b",
        ])
        .unwrap();
        match cli.command {
            Commands::Project {
                command: ProjectCommands::Create { name, labels },
            } => {
                assert_eq!(name, "demo");
                assert_eq!(
                    labels,
                    vec![
                        (String::from("team"), String::from("x")),
                        (String::from("env"), String::from("a=b")),
                    ]
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["metakube", "project", "create", "demo", "--label", "team"]).is_err());
        assert!(Cli::try_parse_from(["metakube", "project", "create", "demo", "--label", "=x"]).is_err());
    }

    #[test]
    fn test_project_update_label_flags_conflict() {
        assert!(Cli::try_parse_from([
            "metakube", "project", "update", "prj", "--label", "a=b", "--clear-labels",
        ])
        .is_err());
        let cli = Cli::try_parse_from(["metakube", "project", "update", "prj", "--clear-labels"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Project {
                command: ProjectCommands::Update { clear_labels: true, name: None, .. }
            }
        ));
    }

    #[test]
    fn test_unknown_output_format_rejected() {
        assert!(Cli::try_parse_from(["metakube", "--output", "yaml", "status"]).is_err());
    }
}
