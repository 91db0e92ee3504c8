//! State management module.
//!
//! This module records which cluster a manifest owns, what was last
//! applied to it, and serialises invocations with a lock.

mod local;
mod lock;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use store::{hold_lock, StateStore};
pub use types::{ClusterState, HistoryEntry, Operation, STATE_VERSION};
