//! CLI module for kdo.
//!
//! This module provides the command-line interface for pushing devfile
//! components and inspecting them.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
