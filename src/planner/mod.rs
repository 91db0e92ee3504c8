//! Planning module for cluster updates.
//!
//! This module compares observed and desired cluster state and groups the
//! differences the way the provisioner applies them.

mod diff;

pub use diff::{check_immutable, ChangeGroup, ClusterChanges, FieldChange};
