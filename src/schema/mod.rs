//! Resource schema registry.
//!
//! This module declares which resource kinds exist, the types of their
//! inputs and outputs, and which inputs force a replacement when changed.

mod catalog;
mod registry;

pub use catalog::builtin_schemas;
pub use registry::{FieldSpec, FieldType, ResourceSchema, SchemaRegistry};
