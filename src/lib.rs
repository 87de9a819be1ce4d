// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(dead_code)]                   // Unused code is flagged
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
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
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Cairn
//!
//! A declarative resource-graph composer: describe infrastructure resources
//! and how their inputs reference each other's outputs, and cairn validates
//! the graph, plans the changes against recorded state, and applies them in
//! dependency order.
//!
//! ## Overview
//!
//! - Resources are typed by a **kind** registered in the schema registry
//! - Inputs may reference another resource's output: `{ ref: vpc, output: vpc_id }`
//! - Plans create before they delete, and replacements are create-before-delete
//! - Execution runs independent actions on a bounded worker pool and
//!   persists state after every completed action
//!
//! ## Modules
//!
//! - [`config`]: Desired-state documents, parsing, validation and hashing
//! - [`schema`]: Resource kinds and their input/output schemas
//! - [`graph`]: Reference resolution and dependency ordering
//! - [`planner`]: Diffing, plan construction and execution
//! - [`provider`]: Provider interface and a simulated backend
//! - [`state`]: State snapshots and storage backends
//! - [`reconciler`]: End-to-end plan and apply
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack: web
//! deployment:
//!   region: eu-west-1
//! resources:
//!   - id: vpc
//!     kind: vpc
//!     inputs: { cidr: 10.0.0.0/16 }
//!   - id: alb-sg
//!     kind: security_group
//!     inputs:
//!       vpc_id: { ref: vpc, output: vpc_id }
//!       description: ALB security group
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod schema;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{DocumentParser, DocumentValidator, InputHasher, StackDocument};
pub use error::{CairnError, Result};
pub use graph::{GraphBuilder, ReferenceResolver, ResourceGraph};
pub use planner::{DiffEngine, ExecutionReport, Plan, PlanExecutor};
pub use provider::{Provider, SimulatedProvider};
pub use reconciler::{ApplyOutcome, Reconciler};
pub use schema::SchemaRegistry;
pub use state::{LocalStateStore, MemoryStateStore, StateSnapshot, StateStore};
