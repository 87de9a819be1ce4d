//! Provider adapters.
//!
//! This module defines the interface the execution engine uses to create,
//! update and delete physical resources, plus a simulated backend.

mod adapter;
mod simulated;

#[cfg(test)]
pub use adapter::MockProvider;
pub use adapter::{Created, Provider};
pub use simulated::SimulatedProvider;
