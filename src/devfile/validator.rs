//! Static validation of a parsed devfile.
//!
//! Checks run class by class and stop at the first failing class. Within a
//! class, offenders are collected so one run reports all of them: dangling
//! mounts, duplicated names and ids, and unresolved event ids.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::error::{Result, ValidationError};

use super::spec::{CommandKind, Devfile, GroupKind};

/// Environment variable holding the project source path.
pub const ENV_PROJECT_SOURCE: &str = "PROJECT_SOURCE";

/// Environment variable holding the projects root path.
pub const ENV_PROJECTS_ROOT: &str = "PROJECTS_ROOT";

/// Environment variables injected by kdo that a manifest may not set.
pub const RESERVED_ENV_NAMES: &[&str] = &[ENV_PROJECT_SOURCE, ENV_PROJECTS_ROOT];

/// Binary quantity suffixes accepted in volume sizes.
const QUANTITY_SUFFIXES: &[&str] = &[
    "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "k", "K", "M", "G", "T", "P", "E", "",
];

/// Validator for devfiles.
#[derive(Debug, Default)]
pub struct DevfileValidator;

impl DevfileValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a devfile.
    ///
    /// # Errors
    ///
    /// Returns the first class of violation found.
    pub fn validate(&self, devfile: &Devfile) -> Result<()> {
        debug!("Validating devfile for component: {}", devfile.name);

        Self::validate_components(devfile)?;
        Self::validate_volumes(devfile)?;
        Self::validate_volume_mounts(devfile)?;
        Self::validate_reserved_env(devfile)?;
        Self::validate_command_types(devfile)?;
        Self::validate_exec_commands(devfile)?;
        Self::validate_composite_commands(devfile)?;
        Self::validate_events(devfile)?;
        Self::validate_defaults(devfile)?;

        debug!("Devfile is valid");
        Ok(())
    }

    fn validate_components(devfile: &Devfile) -> Result<()> {
        if devfile.components.is_empty() {
            return Err(ValidationError::NoComponents.into());
        }
        if devfile.containers().next().is_none() {
            return Err(ValidationError::NoContainerComponent.into());
        }
        let names = duplicates(devfile.containers().map(|(alias, _)| alias));
        if !names.is_empty() {
            return Err(ValidationError::DuplicateContainers { names }.into());
        }
        Ok(())
    }

    fn validate_volumes(devfile: &Devfile) -> Result<()> {
        let mut seen = HashSet::new();
        for (name, volume) in devfile.volumes() {
            if !seen.insert(name) {
                return Err(ValidationError::DuplicateVolume {
                    name: name.to_string(),
                }
                .into());
            }
            if let Some(size) = &volume.size {
                if !is_valid_quantity(size) {
                    return Err(ValidationError::InvalidVolumeSize {
                        name: name.to_string(),
                        size: size.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn validate_volume_mounts(devfile: &Devfile) -> Result<()> {
        let declared: HashSet<&str> = devfile.volumes().map(|(name, _)| name).collect();
        let missing: BTreeSet<&str> = devfile
            .containers()
            .flat_map(|(_, c)| c.volume_mounts.iter())
            .map(|m| m.name.as_str())
            .filter(|name| !declared.contains(name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingVolumeMounts {
                names: missing.into_iter().map(String::from).collect(),
            }
            .into())
        }
    }

    fn validate_reserved_env(devfile: &Devfile) -> Result<()> {
        let entries: Vec<String> = devfile
            .containers()
            .flat_map(|(alias, container)| {
                duplicates(container.env.iter().map(|e| e.name.as_str()))
                    .into_iter()
                    .map(move |name| format!("{alias}.{name}"))
            })
            .collect();
        if !entries.is_empty() {
            return Err(ValidationError::DuplicateEnv { entries }.into());
        }

        for (alias, container) in devfile.containers() {
            if let Some(env) = container
                .env
                .iter()
                .find(|e| RESERVED_ENV_NAMES.contains(&e.name.as_str()))
            {
                return Err(ValidationError::ReservedEnv {
                    name: env.name.clone(),
                    component: alias.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn validate_command_types(devfile: &Devfile) -> Result<()> {
        let ids = duplicates(devfile.commands.iter().map(|c| c.id.as_str()));
        if !ids.is_empty() {
            return Err(ValidationError::DuplicateCommands { ids }.into());
        }

        match devfile
            .commands
            .iter()
            .find(|c| matches!(c.kind, CommandKind::Unsupported(_)))
        {
            Some(command) => Err(ValidationError::InvalidCommandType {
                id: command.id.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn validate_exec_commands(devfile: &Devfile) -> Result<()> {
        for command in &devfile.commands {
            let Some(exec) = command.as_exec() else {
                continue;
            };
            if exec.component.is_empty() {
                return Err(ValidationError::MissingExecField {
                    id: command.id.clone(),
                    field: "component",
                }
                .into());
            }
            if exec.command_line.trim().is_empty() {
                return Err(ValidationError::MissingExecField {
                    id: command.id.clone(),
                    field: "commandLine",
                }
                .into());
            }
            if devfile.container(&exec.component).is_none() {
                return Err(ValidationError::ExecInvalidComponent {
                    id: command.id.clone(),
                    component: exec.component.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn validate_composite_commands(devfile: &Devfile) -> Result<()> {
        let graph: HashMap<&str, &[String]> = devfile
            .commands
            .iter()
            .map(|c| match &c.kind {
                CommandKind::Composite(composite) => (c.id.as_str(), composite.commands.as_slice()),
                _ => (c.id.as_str(), &[][..]),
            })
            .collect();

        for command in &devfile.commands {
            if !matches!(command.kind, CommandKind::Composite(_)) {
                continue;
            }
            if command.group_kind() == Some(GroupKind::Run) {
                return Err(ValidationError::CompositeRunKind {
                    id: command.id.clone(),
                }
                .into());
            }
            let mut path = vec![command.id.as_str()];
            check_composite(&command.id, &graph, &mut path)?;
        }
        Ok(())
    }

    fn validate_events(devfile: &Devfile) -> Result<()> {
        let events: Vec<(String, Vec<String>)> = devfile
            .events
            .all()
            .into_iter()
            .filter_map(|(event, ids)| {
                let invalid: Vec<String> = ids
                    .iter()
                    .filter(|id| devfile.command(id).is_none())
                    .cloned()
                    .collect();
                (!invalid.is_empty()).then(|| (event.to_string(), invalid))
            })
            .collect();

        if events.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::InvalidEvents { events }.into())
        }
    }

    fn validate_defaults(devfile: &Devfile) -> Result<()> {
        for kind in [GroupKind::Build, GroupKind::Run, GroupKind::Init, GroupKind::Test] {
            let defaults: Vec<String> = devfile
                .commands_in_group(kind)
                .filter(|c| c.is_default())
                .map(|c| c.id.clone())
                .collect();
            if defaults.len() > 1 {
                return Err(ValidationError::MultipleDefaults {
                    kind: kind.to_string(),
                    ids: defaults,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Returns every name that occurs more than once, sorted.
fn duplicates<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let repeated: BTreeSet<&str> = names.filter(|name| !seen.insert(*name)).collect();
    repeated.into_iter().map(String::from).collect()
}

/// Walks a composite's references depth-first.
///
/// `path` holds the open ancestors only, so a command reached twice through
/// different parents is fine while a command reached from itself is not.
fn check_composite<'a>(
    root: &str,
    graph: &HashMap<&'a str, &'a [String]>,
    path: &mut Vec<&'a str>,
) -> Result<()> {
    let Some(current) = path.last().copied() else {
        return Ok(());
    };
    let children = graph.get(current).copied().unwrap_or_default();

    for child in children {
        let Some((child_id, _)) = graph.get_key_value(child.as_str()) else {
            return Err(ValidationError::CompositeMissingCommand {
                id: current.to_string(),
                missing: child.clone(),
            }
            .into());
        };
        if path.contains(child_id) {
            let mut cycle: Vec<String> = path.iter().map(|s| (*s).to_string()).collect();
            cycle.push((*child_id).to_string());
            return Err(ValidationError::CompositeCycle {
                id: root.to_string(),
                path: cycle,
            }
            .into());
        }
        path.push(*child_id);
        check_composite(root, graph, path)?;
        path.pop();
    }
    Ok(())
}

/// Returns true if `value` parses as a Kubernetes-style quantity.
#[must_use]
pub fn is_valid_quantity(value: &str) -> bool {
    let value = value.trim();
    let digits_end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(digits_end);

    if number.is_empty() || number.starts_with('.') || number.matches('.').count() > 1 {
        return false;
    }
    if number.parse::<f64>().is_err() {
        return false;
    }
    QUANTITY_SUFFIXES.contains(&suffix)
}
