//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cairn - declarative resource-graph planner and executor.
#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the ordered plan for a desired-state document.
    Plan {
        /// Desired-state document.
        desired: PathBuf,

        /// State file (need not exist yet).
        state: PathBuf,

        /// Show changed fields for every action.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Plan and execute, writing the updated state file.
    Apply {
        /// Desired-state document.
        desired: PathBuf,

        /// State file (created if missing).
        state: PathBuf,

        /// Number of concurrent workers.
        #[arg(long)]
        workers: Option<usize>,

        /// Attempts per action for transient failures.
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Reject every call for this kind (repeatable).
        #[arg(long = "fail-kind", value_name = "KIND")]
        fail_kinds: Vec<String>,

        /// Delay each provider call by this many milliseconds.
        #[arg(long)]
        latency_ms: Option<u64>,
    },

    /// Validate a desired-state document.
    Validate {
        /// Desired-state document.
        desired: PathBuf,
    },

    /// Show the evaluation order and dependencies.
    Graph {
        /// Desired-state document.
        desired: PathBuf,
    },

    /// List the built-in resource kinds.
    Kinds,

    /// Inspect or repair a state file.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show recorded resources and history.
    Show {
        /// State file.
        state: PathBuf,
    },

    /// Remove a stale lock.
    Unlock {
        /// State file.
        state: PathBuf,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
