//! CLI module for cairn.
//!
//! This module provides the command-line interface for planning and
//! applying resource graphs.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
