//! Resource dependency graph.
//!
//! This module extracts references between resources, resolves them against
//! recorded state, and orders resources so that every dependency is
//! evaluated before the resources that need it.

mod builder;
mod resolver;

pub use builder::{GraphBuilder, ResourceGraph};
pub use resolver::{ReferenceResolver, ResolvedField};
