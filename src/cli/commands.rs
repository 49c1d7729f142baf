//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::backend::BackendKind;
use crate::reconciler::PushOptions;

/// kdo - push devfile components to Kubernetes or Docker.
#[derive(Parser, Debug)]
#[command(name = "kdo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project directory holding the sources and the devfile.
    #[arg(long, global = true, default_value = ".")]
    pub context: PathBuf,

    /// Path to the devfile; searched upwards from the context when unset.
    #[arg(long, global = true)]
    pub devfile: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Backend to push to, overriding the configuration.
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Kubernetes namespace, overriding the configuration.
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or update the component, sync sources and run the devfile commands.
    Push {
        /// Run build and run even when no file changed.
        #[arg(short, long)]
        force_build: bool,

        /// Build command id to use instead of the default.
        #[arg(long)]
        build_command: Option<String>,

        /// Run command id to use instead of the default.
        #[arg(long)]
        run_command: Option<String>,

        /// Component name to use instead of `metadata.name`.
        #[arg(long)]
        name: Option<String>,

        /// Provision and sync only.
        #[arg(long)]
        skip_run: bool,
    },

    /// Parse and validate the devfile.
    Validate,

    /// Compare the devfile with the running component.
    Status,

    /// Run a devfile command in the running component.
    Exec {
        /// Command id.
        command_id: String,
    },

    /// Run the default test command.
    Test {
        /// Test command id to use instead of the default.
        #[arg(long)]
        test_command: Option<String>,
    },

    /// Print the log of a container.
    Logs {
        /// Container alias; defaults to the run command's container.
        #[arg(long)]
        container: Option<String>,
    },

    /// Delete the component and its volumes.
    Delete {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
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

impl Commands {
    /// Push options carried by `push`; defaults for every other command.
    #[must_use]
    pub fn push_options(&self) -> PushOptions {
        match self {
            Self::Push {
                force_build,
                build_command,
                run_command,
                skip_run,
                ..
            } => PushOptions {
                force_build: *force_build,
                build_command: build_command.as_deref().map(str::to_lowercase),
                run_command: run_command.as_deref().map(str::to_lowercase),
                skip_run: *skip_run,
            },
            _ => PushOptions::default(),
        }
    }
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_flags() {
        let cli = Cli::try_parse_from([
            "kdo",
            "--backend",
            "docker",
            "push",
            "-f",
            "--run-command",
            "DevRun",
        ])
        .unwrap();

        assert_eq!(cli.backend, Some(BackendKind::Docker));
        let options = cli.command.push_options();
        assert!(options.force_build);
        assert_eq!(options.run_command.as_deref(), Some("devrun"));
        assert!(!options.skip_run);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kdo", "status", "--output", "json", "--context", "/tmp/app"])
            .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.context, PathBuf::from("/tmp/app"));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_exec_requires_id() {
        assert!(Cli::try_parse_from(["kdo", "exec"]).is_err());
    }
}
