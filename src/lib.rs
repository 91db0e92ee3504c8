// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # MetaKube Provisioner
//!
//! Declarative lifecycle orchestration for `MetaKube` managed Kubernetes
//! clusters.
//!
//! ## Overview
//!
//! A single YAML manifest describes one cluster, its node pool and the SSH
//! keys assigned to it. The provisioner creates the cluster, waits for the
//! control plane to report healthy, steps it through single-step version
//! upgrades, reconciles its SSH keys and tears it down again.
//!
//! The control plane answers asynchronously: a create or patch returns at
//! once while provisioning continues in the background. Progress is
//! therefore observed through health polling, and conflicting writes are
//! retried a bounded number of times.
//!
//! ## Modules
//!
//! - [`config`]: Manifest parsing and validation
//! - [`metakube`]: API client, wait primitive and cluster lifecycle
//! - [`planner`]: Change detection between observed and desired state
//! - [`reconciler`]: SSH key assignment reconciliation
//! - [`version`]: Semantic version parsing and prefix matching
//! - [`state`]: Local state and locking
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! cluster:
//!   project_id: 3a5bc8e1
//!   name: staging
//!   dc: dbl1
//!   version: "1.17"
//!   labels:
//!     env: staging
//!   ssh_keys: [alice]
//!   provider:
//!     tenant: my-tenant
//!   node_pool:
//!     name: workers
//!     replicas: 3
//!     flavor: m1.small
//!     image: Ubuntu Bionic 18.04 (2020-03-02)
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod metakube;
pub mod planner;
pub mod reconciler;
pub mod state;
pub mod version;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, Manifest};
pub use error::{MetaKubeError, Result};
pub use metakube::{
    ClusterObserver, ClusterProvisioner, MetaKubeClient, ProjectManager, SshKeyManager,
};
pub use planner::{ChangeGroup, ClusterChanges};
pub use reconciler::{SshKeyPlan, SshKeyReconciler};
pub use state::{ClusterState, LocalStateStore, StateStore};
pub use version::Version;
