//! Version-agnostic manifest model.
//!
//! These types are what every schema version is translated into. They are
//! built once per load and never mutated afterwards; supervision bootstrapping
//! is applied to copies inside the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default size for volume components that do not declare one.
pub const DEFAULT_VOLUME_SIZE: &str = "1Gi";

/// A parsed devfile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Devfile {
    /// Schema version the manifest was written in.
    pub schema_version: String,
    /// Component name used to label backend resources.
    pub name: String,
    /// Container and volume components.
    pub components: Vec<Component>,
    /// Exec and composite commands.
    pub commands: Vec<Command>,
    /// Lifecycle event bindings.
    pub events: Events,
    /// Starter projects.
    pub projects: Vec<Project>,
}

/// A named component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Component {
    /// Alias, unique within the manifest.
    pub name: String,
    /// What the component describes.
    pub kind: ComponentKind,
}

/// Component variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ComponentKind {
    /// A container image.
    Container(Container),
    /// A persistent volume.
    Volume(Volume),
}

/// Container component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Image reference.
    pub image: String,
    /// Entrypoint override.
    #[serde(default)]
    pub command: Vec<String>,
    /// Entrypoint arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Ordered environment; names are unique.
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Memory limit as a quantity string.
    #[serde(default)]
    pub memory_limit: Option<String>,
    /// Whether the source tree syncs into this container.
    ///
    /// The v2 loader defaults an omitted `mountSources` to true, v1 to false.
    #[serde(default)]
    pub mount_sources: bool,
    /// Exposed endpoints.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Volume mounts.
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

/// An environment variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

impl EnvVar {
    /// Creates a new environment variable.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An exposed port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Endpoint name.
    pub name: String,
    /// Container port.
    pub target_port: u16,
}

/// A container path backed by a volume component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeMount {
    /// Volume component name.
    pub name: String,
    /// Mount path inside the container.
    pub path: String,
}

/// Volume component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Volume {
    /// Requested size as a quantity string.
    #[serde(default)]
    pub size: Option<String>,
}

impl Volume {
    /// Returns the requested size or the default.
    #[must_use]
    pub fn size_or_default(&self) -> &str {
        self.size.as_deref().unwrap_or(DEFAULT_VOLUME_SIZE)
    }
}

/// A devfile command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    /// Lower-cased identifier.
    pub id: String,
    /// Command variant.
    pub kind: CommandKind,
    /// Optional group membership.
    pub group: Option<Group>,
}

/// Command variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CommandKind {
    /// A single shell invocation.
    Exec(ExecCommand),
    /// An ordered list of other commands.
    Composite(CompositeCommand),
    /// Any other command type; rejected by validation.
    Unsupported(String),
}

/// Exec command body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecCommand {
    /// Container component alias.
    pub component: String,
    /// Shell command line.
    pub command_line: String,
    /// Working directory.
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Composite command body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CompositeCommand {
    /// Lower-cased sub-command ids, in execution order.
    pub commands: Vec<String>,
}

/// Command group membership.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Group kind.
    pub kind: GroupKind,
    /// Whether this is the default command of its kind.
    #[serde(default)]
    pub is_default: bool,
}

/// Command group kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// Build the project.
    Build,
    /// Run the application.
    Run,
    /// One-time initialization.
    Init,
    /// Run the tests.
    Test,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Run => write!(f, "run"),
            Self::Init => write!(f, "init"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Events {
    /// Before the component starts.
    #[serde(default)]
    pub pre_start: Vec<String>,
    /// After the component starts.
    #[serde(default)]
    pub post_start: Vec<String>,
    /// Before the component stops.
    #[serde(default)]
    pub pre_stop: Vec<String>,
    /// After the component stops.
    #[serde(default)]
    pub post_stop: Vec<String>,
}

impl Events {
    /// Returns every event list with its name.
    #[must_use]
    pub fn all(&self) -> [(&'static str, &[String]); 4] {
        [
            ("preStart", self.pre_start.as_slice()),
            ("postStart", self.post_start.as_slice()),
            ("preStop", self.pre_stop.as_slice()),
            ("postStop", self.post_stop.as_slice()),
        ]
    }
}

/// A starter project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project name.
    pub name: String,
    /// Git remote.
    #[serde(default)]
    pub git: Option<String>,
    /// Clone path relative to the projects root.
    #[serde(default)]
    pub clone_path: Option<String>,
}

impl Command {
    /// Returns the group kind, if any.
    #[must_use]
    pub fn group_kind(&self) -> Option<GroupKind> {
        self.group.map(|g| g.kind)
    }

    /// Returns true if this command is the default of its group.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.group.is_some_and(|g| g.is_default)
    }

    /// Returns the exec body, if this is an exec command.
    #[must_use]
    pub const fn as_exec(&self) -> Option<&ExecCommand> {
        match &self.kind {
            CommandKind::Exec(exec) => Some(exec),
            _ => None,
        }
    }
}

impl Devfile {
    /// Iterates over container components.
    pub fn containers(&self) -> impl Iterator<Item = (&str, &Container)> {
        self.components.iter().filter_map(|c| match &c.kind {
            ComponentKind::Container(container) => Some((c.name.as_str(), container)),
            ComponentKind::Volume(_) => None,
        })
    }

    /// Iterates over volume components.
    pub fn volumes(&self) -> impl Iterator<Item = (&str, &Volume)> {
        self.components.iter().filter_map(|c| match &c.kind {
            ComponentKind::Volume(volume) => Some((c.name.as_str(), volume)),
            ComponentKind::Container(_) => None,
        })
    }

    /// Looks up a container component by alias.
    #[must_use]
    pub fn container(&self, alias: &str) -> Option<&Container> {
        self.containers()
            .find(|(name, _)| *name == alias)
            .map(|(_, container)| container)
    }

    /// Looks up a command by id, ignoring case.
    #[must_use]
    pub fn command(&self, id: &str) -> Option<&Command> {
        let id = id.to_lowercase();
        self.commands.iter().find(|c| c.id == id)
    }

    /// Returns the commands of a group kind, in declaration order.
    pub fn commands_in_group(&self, kind: GroupKind) -> impl Iterator<Item = &Command> {
        self.commands
            .iter()
            .filter(move |c| c.group_kind() == Some(kind))
    }

    /// Returns the default command of a group kind.
    ///
    /// The command flagged `isDefault` wins; a group with a single member
    /// uses that member.
    #[must_use]
    pub fn default_command(&self, kind: GroupKind) -> Option<&Command> {
        let mut members = self.commands_in_group(kind).peekable();
        let first = members.peek().copied();
        let mut count = 0usize;
        let mut default = None;
        for command in members {
            count += 1;
            if command.is_default() && default.is_none() {
                default = Some(command);
            }
        }
        default.or(if count == 1 { first } else { None })
    }

    /// Returns the alias of the first container that mounts sources.
    #[must_use]
    pub fn source_container(&self) -> Option<&str> {
        self.containers()
            .find(|(_, c)| c.mount_sources)
            .map(|(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(id: &str, kind: GroupKind, is_default: bool) -> Command {
        Command {
            id: id.to_string(),
            kind: CommandKind::Exec(ExecCommand {
                component: "runtime".to_string(),
                command_line: "true".to_string(),
                working_dir: None,
            }),
            group: Some(Group { kind, is_default }),
        }
    }

    #[test]
    fn test_single_group_member_is_default() {
        let devfile = Devfile {
            commands: vec![exec("install", GroupKind::Build, false)],
            ..Devfile::default()
        };
        assert_eq!(
            devfile.default_command(GroupKind::Build).map(|c| c.id.as_str()),
            Some("install")
        );
        assert!(devfile.default_command(GroupKind::Run).is_none());
    }

    #[test]
    fn test_flagged_default_wins() {
        let devfile = Devfile {
            commands: vec![
                exec("debug", GroupKind::Run, false),
                exec("start", GroupKind::Run, true),
            ],
            ..Devfile::default()
        };
        assert_eq!(
            devfile.default_command(GroupKind::Run).map(|c| c.id.as_str()),
            Some("start")
        );
    }

    #[test]
    fn test_ambiguous_group_has_no_default() {
        let devfile = Devfile {
            commands: vec![
                exec("a", GroupKind::Run, false),
                exec("b", GroupKind::Run, false),
            ],
            ..Devfile::default()
        };
        assert!(devfile.default_command(GroupKind::Run).is_none());
    }

    #[test]
    fn test_command_lookup_ignores_case() {
        let devfile = Devfile {
            commands: vec![exec("devrun", GroupKind::Run, true)],
            ..Devfile::default()
        };
        assert!(devfile.command("DevRun").is_some());
    }
}
