//! CLI module for the `MetaKube` provisioner.
//!
//! This module provides the command-line interface for managing one
//! cluster from a manifest.

mod commands;
mod output;

pub use commands::{Cli, Commands, KeyCommands, OutputFormat, ProjectCommands, StateCommands};
pub use output::OutputFormatter;
