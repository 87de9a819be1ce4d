//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationReport;
use crate::graph::ResourceGraph;
use crate::planner::{ActionStatus, ActionType, ExecutionReport, Plan, ReplaceStep};
use crate::schema::SchemaRegistry;
use crate::state::{LockInfo, StateSnapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "After")]
    after: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Execution result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Tries")]
    attempts: u32,
    #[tabled(rename = "Physical ID")]
    physical_id: String,
}

/// Graph row for table display.
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

/// Kind row for table display.
#[derive(Tabled)]
struct KindRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Required inputs")]
    required: String,
    #[tabled(rename = "Outputs")]
    outputs: String,
    #[tabled(rename = "Replaced on")]
    triggers: String,
}

/// State resource row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Physical ID")]
    physical_id: String,
    #[tabled(rename = "Superseded")]
    superseded: usize,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - {} resources are up to date.\n",
                "✓".green(),
                plan.actions.len()
            );
        }

        let mut output = String::new();
        let _ = write!(
            output,
            "\nPlan for stack '{}' (desired {})\n\n",
            plan.stack,
            short(&plan.desired_hash)
        );

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .filter(|a| detailed || a.action != ActionType::Noop)
            .map(|a| PlanActionRow {
                index: a.rank + 1,
                action: Self::format_action(a.action, a.step),
                resource: a.logical_id.clone(),
                kind: a.kind.clone(),
                after: a
                    .depends_on
                    .iter()
                    .map(|r| (r + 1).to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                reason: truncate(&a.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for action in plan.changes() {
                if !action.changed_fields.is_empty() {
                    let _ = writeln!(
                        output,
                        "   {}: {}",
                        action.logical_id,
                        action.changed_fields.join(", ")
                    );
                }
            }
        }

        let s = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete\n",
            s.create.to_string().green(),
            s.update.to_string().yellow(),
            s.replace.to_string().yellow(),
            s.delete.to_string().red()
        );
        output
    }

    /// Formats an execution report.
    #[must_use]
    pub fn format_report(&self, report: &ExecutionReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let rows: Vec<ResultRow> = report
                    .results
                    .iter()
                    .filter(|r| r.action != ActionType::Noop)
                    .map(|r| ResultRow {
                        index: r.rank + 1,
                        action: Self::format_action(r.action, r.step),
                        resource: r.logical_id.clone(),
                        status: Self::format_status(r.status),
                        attempts: r.attempts,
                        physical_id: r.physical_id.clone().unwrap_or_default(),
                    })
                    .collect();

                let mut output = String::new();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                for failed in report.results.iter().filter(|r| r.error.is_some()) {
                    let _ = writeln!(
                        output,
                        "   {} {}: {}",
                        "✗".red(),
                        failed.logical_id,
                        failed.error.as_deref().unwrap_or_default()
                    );
                }
                if let Some(e) = &report.state_error {
                    let _ = writeln!(output, "   {} state not saved: {e}", "⚠".yellow());
                }

                let headline = if report.success() {
                    format!("{} Apply complete", "✓".green())
                } else if report.cancelled {
                    format!("{} Apply cancelled", "⚠".yellow())
                } else {
                    format!("{} Apply incomplete", "✗".red())
                };
                let _ = writeln!(
                    output,
                    "\n{headline}: {} succeeded, {} failed, {} blocked, {} skipped",
                    report.succeeded, report.failed, report.blocked, report.skipped
                );
                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, report: &ValidationReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": true,
                "resources": report.resources,
                "warnings": report.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Document is valid ({} resources)\n",
                    "✓".green(),
                    report.resources
                );
                for warning in &report.warnings {
                    let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
                }
                output
            }
        }
    }

    /// Formats the dependency graph in evaluation order.
    #[must_use]
    pub fn format_graph(&self, graph: &ResourceGraph) -> String {
        let rows: Vec<GraphRow> = graph
            .evaluation_order()
            .enumerate()
            .map(|(i, r)| GraphRow {
                index: i + 1,
                resource: r.id.clone(),
                kind: r.kind.clone(),
                depends_on: graph
                    .dependencies_of(&r.id)
                    .into_iter()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect();

        match self.format {
            OutputFormat::Json => to_json(
                &rows
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "id": r.resource,
                            "kind": r.kind,
                            "depends_on": graph.dependencies_of(&r.resource),
                        })
                    })
                    .collect::<Vec<_>>(),
            ),
            OutputFormat::Text => format!("{}\n", Table::new(rows)),
        }
    }

    /// Formats the schema registry.
    #[must_use]
    pub fn format_kinds(&self, registry: &SchemaRegistry) -> String {
        match self.format {
            OutputFormat::Json => to_json(&registry.schemas().collect::<Vec<_>>()),
            OutputFormat::Text => {
                let rows: Vec<KindRow> = registry
                    .schemas()
                    .map(|s| KindRow {
                        kind: s.kind.clone(),
                        required: s
                            .inputs
                            .iter()
                            .filter(|(_, f)| f.required)
                            .map(|(n, _)| n.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                        outputs: s.outputs.keys().cloned().collect::<Vec<_>>().join(", "),
                        triggers: s
                            .replacement_triggers
                            .iter()
                            .cloned()
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a state snapshot.
    #[must_use]
    pub fn format_state(&self, snapshot: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => to_json(snapshot),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(output, "\nState: {}\n\n", snapshot.stack);
                let _ = writeln!(output, "   Version: {}", snapshot.version);
                let _ = writeln!(output, "   Desired hash: {}", short(&snapshot.desired_hash));
                let _ = writeln!(output, "   Last updated: {}", snapshot.last_updated);
                let _ = writeln!(output, "   Resources: {}\n", snapshot.resources.len());

                if !snapshot.resources.is_empty() {
                    let rows: Vec<StateRow> = snapshot
                        .resources
                        .iter()
                        .map(|(id, r)| StateRow {
                            resource: id.clone(),
                            kind: r.kind.clone(),
                            physical_id: r.physical_id.clone(),
                            superseded: r.superseded.len(),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !snapshot.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", snapshot.history.len());
                    for entry in snapshot.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.resources.join(", ")
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats the result of a forced unlock.
    #[must_use]
    pub fn format_unlock(&self, removed: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "removed": removed })),
            OutputFormat::Text => match removed {
                Some(lock) => format!(
                    "{} Removed lock held by {} since {}\n",
                    "✓".green(),
                    lock.holder,
                    lock.acquired_at.format("%Y-%m-%d %H:%M")
                ),
                None => String::from("State is not locked.\n"),
            },
        }
    }

    /// Formats an action with color.
    fn format_action(action: ActionType, step: Option<ReplaceStep>) -> String {
        match (action, step) {
            (ActionType::Create, _) => "+create".green().to_string(),
            (ActionType::Update, _) => "~update".yellow().to_string(),
            (ActionType::Replace, Some(ReplaceStep::CreateReplacement)) => {
                "+replace".yellow().to_string()
            }
            (ActionType::Replace, _) => "-replaced".red().to_string(),
            (ActionType::Delete, Some(ReplaceStep::DeleteReplaced)) => {
                "-superseded".red().to_string()
            }
            (ActionType::Delete, _) => "-delete".red().to_string(),
            (ActionType::Noop, _) => "noop".dimmed().to_string(),
        }
    }

    /// Formats an action status with color.
    fn format_status(status: ActionStatus) -> String {
        match status {
            ActionStatus::Succeeded => "succeeded".green().to_string(),
            ActionStatus::Failed => "failed".red().to_string(),
            ActionStatus::Blocked => "blocked".red().to_string(),
            ActionStatus::Skipped => "skipped".yellow().to_string(),
            ActionStatus::Pending | ActionStatus::InProgress => "pending".dimmed().to_string(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

/// Truncates a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
