//! Translation of `apiVersion: 1.x` devfiles into the common model.
//!
//! The older schema has no volume components and no command groups; volumes
//! are declared inline on containers and the build/run/init roles are carried
//! by well-known command names.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::error::{DevfileError, Result};

use super::parser::RawMetadata;
use super::spec::{
    Command, CommandKind, Component, ComponentKind, Container, Devfile, Endpoint, EnvVar, Events,
    ExecCommand, Group, GroupKind, Project, Volume, VolumeMount,
};

/// Command names that imply a default group membership.
const GROUP_BY_NAME: &[(&str, GroupKind)] = &[
    ("devbuild", GroupKind::Build),
    ("devrun", GroupKind::Run),
    ("devinit", GroupKind::Init),
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevfileV1 {
    api_version: String,
    #[serde(default)]
    metadata: RawMetadata,
    #[serde(default)]
    components: Vec<ComponentV1>,
    #[serde(default)]
    commands: Vec<CommandV1>,
    #[serde(default)]
    projects: Vec<ProjectV1>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentV1 {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    command: Vec<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Vec<EnvVar>,
    #[serde(default)]
    memory_limit: Option<String>,
    #[serde(default)]
    mount_sources: bool,
    #[serde(default)]
    endpoints: Vec<EndpointV1>,
    #[serde(default)]
    volumes: Vec<VolumeV1>,
}

#[derive(Debug, Deserialize)]
struct EndpointV1 {
    name: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeV1 {
    name: String,
    container_path: String,
}

#[derive(Debug, Deserialize)]
struct CommandV1 {
    name: String,
    #[serde(default)]
    actions: Vec<ActionV1>,
}

#[derive(Debug, Deserialize)]
struct ActionV1 {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    component: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    workdir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectV1 {
    name: String,
    #[serde(default)]
    source: Option<SourceV1>,
    #[serde(default, rename = "clonePath")]
    clone_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceV1 {
    #[serde(rename = "type")]
    kind: String,
    location: String,
}

/// Parses a 1.x devfile and translates it.
pub(super) fn parse(content: &str) -> Result<Devfile> {
    let raw: DevfileV1 = serde_yaml::from_str(content)
        .map_err(|e| DevfileError::parse(format!("YAML parse error: {e}")))?;

    let mut components = Vec::new();
    let mut volume_names = BTreeSet::new();
    for component in raw.components {
        if component.kind != "dockerimage" {
            continue;
        }
        let (Some(alias), Some(image)) = (component.alias, component.image) else {
            continue;
        };
        for volume in &component.volumes {
            volume_names.insert(volume.name.clone());
        }
        components.push(Component {
            name: alias,
            kind: ComponentKind::Container(Container {
                image,
                command: component.command,
                args: component.args,
                env: component.env,
                memory_limit: component.memory_limit,
                mount_sources: component.mount_sources,
                endpoints: component
                    .endpoints
                    .into_iter()
                    .map(|e| Endpoint {
                        name: e.name,
                        target_port: e.port,
                    })
                    .collect(),
                volume_mounts: component
                    .volumes
                    .into_iter()
                    .map(|v| VolumeMount {
                        name: v.name,
                        path: v.container_path,
                    })
                    .collect(),
            }),
        });
    }
    components.extend(volume_names.into_iter().map(|name| Component {
        name,
        kind: ComponentKind::Volume(Volume::default()),
    }));

    let commands = raw.commands.into_iter().map(translate_command).collect();

    let projects = raw
        .projects
        .into_iter()
        .filter_map(|p| {
            let source = p.source.filter(|s| s.kind == "git")?;
            Some(Project {
                name: p.name,
                git: Some(source.location),
                clone_path: p.clone_path,
            })
        })
        .collect();

    Ok(Devfile {
        schema_version: raw.api_version,
        name: raw.metadata.name.unwrap_or_default(),
        components,
        commands,
        events: Events::default(),
        projects,
    })
}

fn translate_command(command: CommandV1) -> Command {
    let id = command.name.to_lowercase();
    let group = GROUP_BY_NAME
        .iter()
        .find(|(name, _)| *name == id)
        .map(|(_, kind)| Group {
            kind: *kind,
            is_default: true,
        });

    let kind = match command.actions.into_iter().next() {
        Some(action) if action.kind == "exec" => CommandKind::Exec(ExecCommand {
            component: action.component,
            command_line: action.command,
            working_dir: action.workdir.filter(|w| !w.is_empty()),
        }),
        Some(action) => CommandKind::Unsupported(action.kind),
        None => CommandKind::Unsupported(String::from("empty")),
    };

    Command { id, kind, group }
}
