//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::devfile::{ComponentKind, Devfile};
use crate::engine::DiffType;
use crate::error::KdoError;
use crate::reconciler::{DriftReport, PushReport};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Container drift row for table display.
#[derive(Tabled)]
struct DriftRow {
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Fields")]
    fields: String,
}

/// Component row for table display.
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Details")]
    details: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a push report.
    #[must_use]
    pub fn format_push(&self, report: &PushReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let mut output = String::new();
                for line in &report.progress {
                    let _ = writeln!(output, " {} {line}", "•".cyan());
                }
                if report.success() {
                    let _ = writeln!(
                        output,
                        "\n{} Pushed {} ({} copied, {} removed)",
                        "✓".green(),
                        report.component,
                        report.sync.copied,
                        report.sync.removed
                    );
                } else if let (Some(error), Some(stage)) = (&report.error, report.failed_at) {
                    let _ = writeln!(output, "\n{} Push failed while {stage}: {error}", "✗".red());
                    if let Some(hint) = report.hint {
                        let _ = writeln!(output, "   hint: {hint}");
                    }
                }
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!(
                        "{} No drift detected - component {} is converged.\n",
                        "✓".green(),
                        report.component
                    );
                }

                let mut output = if report.exists {
                    format!("{} Drift detected in {}:\n\n", "⚠".yellow(), report.component)
                } else {
                    format!(
                        "{} Component {} does not exist yet:\n\n",
                        "⚠".yellow(),
                        report.component
                    )
                };

                let rows: Vec<DriftRow> = report
                    .containers
                    .iter()
                    .map(|c| DriftRow {
                        container: c.alias.clone(),
                        change: Self::format_diff_type(c.diff_type),
                        fields: c
                            .details
                            .iter()
                            .map(|d| d.field)
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');

                if !report.missing_volumes.is_empty() {
                    let _ = writeln!(
                        output,
                        "\nMissing volumes: {}",
                        report.missing_volumes.join(", ")
                    );
                }
                if report.exists && !report.running {
                    let _ = writeln!(output, "\nComponent is not running.");
                }
                output
            }
        }
    }

    /// Formats the summary of a valid devfile.
    #[must_use]
    pub fn format_devfile(&self, devfile: &Devfile) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": true,
                "name": devfile.name,
                "schemaVersion": devfile.schema_version,
                "containers": devfile.containers().count(),
                "volumes": devfile.volumes().count(),
                "commands": devfile.commands.len(),
            })),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} Devfile is valid\n\n   Component: {}\n   Schema: {}\n\n",
                    "✓".green(),
                    devfile.name,
                    devfile.schema_version
                );

                let rows: Vec<ComponentRow> = devfile
                    .components
                    .iter()
                    .map(|c| match &c.kind {
                        ComponentKind::Container(container) => ComponentRow {
                            name: c.name.clone(),
                            kind: "container".to_string(),
                            details: Self::truncate(&container.image, 40),
                        },
                        ComponentKind::Volume(volume) => ComponentRow {
                            name: c.name.clone(),
                            kind: "volume".to_string(),
                            details: volume.size_or_default().to_string(),
                        },
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());

                let _ = writeln!(output, "\n\nCommands: {}", devfile.commands.len());
                for command in &devfile.commands {
                    let group = command
                        .group_kind()
                        .map_or_else(String::new, |kind| {
                            let default = if command.is_default() { ", default" } else { "" };
                            format!(" ({kind}{default})")
                        });
                    let _ = writeln!(output, "   - {}{group}", command.id);
                }
                output
            }
        }
    }

    /// Formats an error with its hint.
    #[must_use]
    pub fn format_error(&self, err: &KdoError) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": "error",
                "message": err.to_string(),
                "hint": err.hint(),
            })),
            OutputFormat::Text => {
                let mut output = format!("{} {err}\n", "✗".red());
                if let Some(hint) = err.hint() {
                    let _ = writeln!(output, "   hint: {hint}");
                }
                output
            }
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                to_json(&serde_json::json!({ "status": "success", "message": message }))
            }
            OutputFormat::Text => format!("{} {message}\n", "✓".green()),
        }
    }

    /// Formats command output text, such as container logs.
    #[must_use]
    pub fn text(&self, label: &str, content: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ label: content })),
            OutputFormat::Text => content.to_string(),
        }
    }

    /// Formats a diff type with color.
    fn format_diff_type(diff_type: DiffType) -> String {
        match diff_type {
            DiffType::Create => "+create".green().to_string(),
            DiffType::Update => "~update".yellow().to_string(),
            DiffType::Delete => "-delete".red().to_string(),
            DiffType::NoChange => "unchanged".dimmed().to_string(),
        }
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
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    let mut json = serde_json::to_string_pretty(value).unwrap_or_default();
    json.push('\n');
    json
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ContainerDiff, DiffDetail};

    fn drift() -> DriftReport {
        DriftReport {
            component: "nodejs".to_string(),
            exists: true,
            running: true,
            has_drift: true,
            containers: vec![ContainerDiff {
                alias: "runtime".to_string(),
                diff_type: DiffType::Update,
                details: vec![DiffDetail {
                    field: "image",
                    observed: Some("node:18".to_string()),
                    desired: Some("node:20".to_string()),
                }],
            }],
            missing_volumes: vec!["data".to_string()],
        }
    }

    #[test]
    fn test_drift_text_lists_fields_and_volumes() {
        colored::control::set_override(false);
        let output = OutputFormatter::new(OutputFormat::Text).format_drift(&drift());
        assert!(output.contains("runtime"));
        assert!(output.contains("image"));
        assert!(output.contains("Missing volumes: data"));
    }

    #[test]
    fn test_drift_json_is_parseable() {
        let output = OutputFormatter::new(OutputFormat::Json).format_drift(&drift());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["containers"][0]["diff_type"], "update");
        assert_eq!(value["has_drift"], true);
    }

    #[test]
    fn test_error_json_carries_hint() {
        let err = KdoError::timeout("component=nodejs", 10);
        let output = OutputFormatter::new(OutputFormat::Json).format_error(&err);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["status"], "error");
        assert!(value["hint"].as_str().unwrap().contains("capacity"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(OutputFormatter::truncate("héllo-wörld", 8), "héllo...");
        assert_eq!(OutputFormatter::truncate("short", 8), "short");
    }
}
