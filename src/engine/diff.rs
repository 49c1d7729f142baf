//! Drift detection between a desired component spec and what a backend reports.
//!
//! Env vars, mounts and ports are compared as sets, so reordering them in the
//! devfile never restarts anything. Images compare as exact strings.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

use crate::backend::{ComponentSpec, ContainerSpec, ObservedComponent, ObservedContainer};

/// Engine for computing drift between desired and observed components.
#[derive(Debug, Default)]
pub struct DiffEngine;

/// Type of difference detected for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    /// Container needs to be created.
    Create,
    /// Container exists but differs.
    Update,
    /// Container exists but is not declared anymore.
    Delete,
    /// Container matches.
    NoChange,
}

/// Detail about a differing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: &'static str,
    /// Observed value.
    pub observed: Option<String>,
    /// Desired value.
    pub desired: Option<String>,
}

/// Difference for a single container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerDiff {
    /// Container alias.
    pub alias: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Field-level details.
    pub details: Vec<DiffDetail>,
}

/// Drift of a whole component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComponentDiff {
    /// Per-container differences, desired containers first.
    pub containers: Vec<ContainerDiff>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the drift of every container of a component.
    #[must_use]
    pub fn compute_diff(
        &self,
        desired: &ComponentSpec,
        observed: &ObservedComponent,
    ) -> ComponentDiff {
        let mut containers = Vec::new();

        for spec in &desired.containers {
            let diff = match observed.containers.iter().find(|o| o.alias == spec.alias) {
                Some(current) => {
                    let details = Self::compare_container(spec, current);
                    let diff_type = if details.is_empty() {
                        DiffType::NoChange
                    } else {
                        DiffType::Update
                    };
                    ContainerDiff {
                        alias: spec.alias.clone(),
                        diff_type,
                        details,
                    }
                }
                None => ContainerDiff {
                    alias: spec.alias.clone(),
                    diff_type: DiffType::Create,
                    details: Vec::new(),
                },
            };
            debug!("Container {}: {}", diff.alias, diff.diff_type);
            containers.push(diff);
        }

        for current in &observed.containers {
            if desired.container(&current.alias).is_none() {
                debug!("Found undeclared container: {}", current.alias);
                containers.push(ContainerDiff {
                    alias: current.alias.clone(),
                    diff_type: DiffType::Delete,
                    details: Vec::new(),
                });
            }
        }

        ComponentDiff { containers }
    }

    /// Returns the fields in which a container differs.
    #[must_use]
    pub fn compare_container(desired: &ContainerSpec, observed: &ObservedContainer) -> Vec<DiffDetail> {
        let mut details = Vec::new();

        if desired.image != observed.image {
            details.push(DiffDetail {
                field: "image",
                observed: Some(observed.image.clone()),
                desired: Some(desired.image.clone()),
            });
        }

        let desired_env: BTreeSet<_> = desired.env.iter().collect();
        let observed_env: BTreeSet<_> = observed.env.iter().collect();
        if desired_env != observed_env {
            details.push(DiffDetail {
                field: "env",
                observed: Some(render(observed_env.iter().map(|e| format!("{}={}", e.name, e.value)))),
                desired: Some(render(desired_env.iter().map(|e| format!("{}={}", e.name, e.value)))),
            });
        }

        let desired_mounts: BTreeSet<_> = desired.mounts.iter().collect();
        let observed_mounts: BTreeSet<_> = observed.mounts.iter().collect();
        if desired_mounts != observed_mounts {
            details.push(DiffDetail {
                field: "mounts",
                observed: Some(render(observed_mounts.iter().map(|m| format!("{}:{}", m.volume, m.path)))),
                desired: Some(render(desired_mounts.iter().map(|m| format!("{}:{}", m.volume, m.path)))),
            });
        }

        let desired_ports: BTreeSet<_> = desired.ports.iter().collect();
        let observed_ports: BTreeSet<_> = observed.ports.iter().collect();
        if desired_ports != observed_ports {
            details.push(DiffDetail {
                field: "ports",
                observed: Some(render(observed_ports.iter().map(ToString::to_string))),
                desired: Some(render(desired_ports.iter().map(ToString::to_string))),
            });
        }

        details
    }
}

fn render(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join(",")
}

impl ComponentDiff {
    /// Returns true if anything must change.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.containers
            .iter()
            .any(|c| c.diff_type != DiffType::NoChange)
    }

    /// Returns the aliases of containers that must be recreated or removed.
    #[must_use]
    pub fn changed_aliases(&self) -> Vec<&str> {
        self.containers
            .iter()
            .filter(|c| c.diff_type != DiffType::NoChange)
            .map(|c| c.alias.as_str())
            .collect()
    }
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::NoChange => write!(f, "no change"),
        }
    }
}

impl fmt::Display for ContainerDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.alias, self.diff_type)?;
        for detail in &self.details {
            write!(
                f,
                "\n  {}: {} -> {}",
                detail.field,
                detail.observed.as_deref().unwrap_or("-"),
                detail.desired.as_deref().unwrap_or("-")
            )?;
        }
        Ok(())
    }
}
