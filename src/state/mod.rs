//! State management module for cairn.
//!
//! This module provides persistent state storage for tracking realised
//! resources, their physical ids and outputs, and the run history.

mod local;
mod lock;
mod memory;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use memory::MemoryStateStore;
pub use store::StateStore;
pub use types::{RunHistoryEntry, ResourceState, STATE_VERSION, StateSnapshot};
