//! Planning and execution.
//!
//! This module compares the desired graph with the recorded snapshot,
//! turns the differences into an ordered plan, and executes that plan
//! against a provider.

mod diff;
mod executor;
mod plan;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, KNOWN_AFTER_APPLY, ResourceDiff};
pub use executor::{
    ActionReport, ActionStatus, ExecutionReport, PlanExecutor, RetryPolicy,
};
pub use plan::{ActionType, Plan, PlanAction, PlanSummary, ReplaceStep};
