//! Desired component spec construction.
//!
//! Turns a validated devfile plus the volume bindings of this pass into the
//! backend-agnostic [`ComponentSpec`] that is created or compared for drift.

use tracing::debug;

use crate::backend::{ComponentSpec, ContainerSpec, MountSpec, SOURCE_MOUNT_PATH, component_labels};
use crate::devfile::{
    Container, Devfile, ENV_PROJECT_SOURCE, ENV_PROJECTS_ROOT, EnvVar, ExecCommand, GroupKind,
};
use crate::error::{InconsistentStateError, Result};
use crate::runner::supervisor;

use super::volumes::VolumeBindings;

/// Builder for the desired state of a component.
#[derive(Debug)]
pub struct SpecBuilder<'a> {
    devfile: &'a Devfile,
    bindings: &'a VolumeBindings,
    run_command: Option<&'a str>,
}

impl<'a> SpecBuilder<'a> {
    /// Creates a builder.
    #[must_use]
    pub const fn new(devfile: &'a Devfile, bindings: &'a VolumeBindings) -> Self {
        Self {
            devfile,
            bindings,
            run_command: None,
        }
    }

    /// Uses `id` instead of the default run command for supervision.
    #[must_use]
    pub const fn with_run_command(mut self, id: Option<&'a str>) -> Self {
        self.run_command = id;
        self
    }

    /// Resolves the exec command that runs under supervision, if any.
    fn run_exec(&self) -> Option<&'a ExecCommand> {
        let command = match self.run_command {
            Some(id) => self.devfile.command(id),
            None => self.devfile.default_command(GroupKind::Run),
        }?;
        command.as_exec()
    }

    /// Builds the component spec.
    ///
    /// # Errors
    ///
    /// Returns an inconsistency error if a mount has no bound volume.
    pub fn build(&self) -> Result<ComponentSpec> {
        let run = self.run_exec();
        let mut containers = Vec::new();

        for (alias, container) in self.devfile.containers() {
            let mut spec = self.container_spec(alias, container)?;
            if let Some(run) = run.filter(|r| r.component == alias) {
                debug!("Supervising run command in container {alias}");
                supervisor::inject(&mut spec, run);
            }
            containers.push(spec);
        }

        Ok(ComponentSpec {
            name: self.devfile.name.clone(),
            labels: component_labels(&self.devfile.name),
            containers,
        })
    }

    fn container_spec(&self, alias: &str, container: &Container) -> Result<ContainerSpec> {
        let mut env = container.env.clone();
        if container.mount_sources {
            env.push(EnvVar::new(ENV_PROJECTS_ROOT, SOURCE_MOUNT_PATH));
            env.push(EnvVar::new(ENV_PROJECT_SOURCE, SOURCE_MOUNT_PATH));
        }

        let mounts = container
            .volume_mounts
            .iter()
            .map(|mount| -> Result<MountSpec> {
                let handle = self.bindings.get(&mount.name).ok_or_else(|| {
                    InconsistentStateError::VolumeCardinality {
                        component: self.devfile.name.clone(),
                        observed: self.bindings.len(),
                        declared: self.devfile.volumes().count(),
                        unknown: vec![mount.name.clone()],
                    }
                })?;
                Ok(MountSpec {
                    volume: handle.name.clone(),
                    path: mount.path.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ContainerSpec {
            alias: alias.to_string(),
            image: container.image.clone(),
            command: container.command.clone(),
            args: container.args.clone(),
            env,
            ports: container.endpoints.iter().map(|e| e.target_port).collect(),
            mounts,
            memory_limit: container.memory_limit.clone(),
            mount_sources: container.mount_sources,
            supervised: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VolumeHandle;
    use crate::devfile::{
        Command, CommandKind, Component, ComponentKind, Endpoint, Group, Volume, VolumeMount,
    };
    use crate::runner::supervisor::{ENV_COMMAND_RUN, SUPERVISORD_BINARY};
    use std::collections::BTreeMap;

    fn container(image: &str, mounts: &[&str], mount_sources: bool) -> ComponentKind {
        ComponentKind::Container(Container {
            image: image.to_string(),
            mount_sources,
            endpoints: vec![Endpoint {
                name: "http".to_string(),
                target_port: 3000,
            }],
            volume_mounts: mounts
                .iter()
                .map(|m| VolumeMount {
                    name: (*m).to_string(),
                    path: format!("/mnt/{m}"),
                })
                .collect(),
            ..Container::default()
        })
    }

    fn devfile() -> Devfile {
        Devfile {
            name: "nodejs".to_string(),
            components: vec![
                Component {
                    name: "runtime".to_string(),
                    kind: container("node:18", &["shared"], true),
                },
                Component {
                    name: "tools".to_string(),
                    kind: container("busybox", &["shared"], false),
                },
                Component {
                    name: "shared".to_string(),
                    kind: ComponentKind::Volume(Volume::default()),
                },
            ],
            commands: vec![Command {
                id: "devrun".to_string(),
                kind: CommandKind::Exec(ExecCommand {
                    component: "runtime".to_string(),
                    command_line: "npm start".to_string(),
                    working_dir: None,
                }),
                group: Some(Group {
                    kind: GroupKind::Run,
                    is_default: true,
                }),
            }],
            ..Devfile::default()
        }
    }

    fn bindings() -> VolumeBindings {
        let mut handles = BTreeMap::new();
        handles.insert(
            "shared".to_string(),
            VolumeHandle {
                name: "nodejs-shared".to_string(),
                storage_name: "shared".to_string(),
                size: Some("1Gi".to_string()),
            },
        );
        VolumeBindings::from_handles(handles)
    }

    #[test]
    fn test_shared_volume_gets_one_backing_volume() {
        let d = devfile();
        let b = bindings();
        let spec = SpecBuilder::new(&d, &b).build().unwrap();

        let runtime = spec.container("runtime").unwrap();
        let tools = spec.container("tools").unwrap();
        assert_eq!(runtime.mounts[0].volume, "nodejs-shared");
        assert_eq!(runtime.mounts, tools.mounts);
    }

    #[test]
    fn test_source_env_is_injected_only_for_mount_sources() {
        let d = devfile();
        let b = bindings();
        let spec = SpecBuilder::new(&d, &b).build().unwrap();

        let runtime = spec.container("runtime").unwrap();
        assert!(runtime.env.contains(&EnvVar::new(ENV_PROJECTS_ROOT, SOURCE_MOUNT_PATH)));
        assert!(runtime.env.contains(&EnvVar::new(ENV_PROJECT_SOURCE, SOURCE_MOUNT_PATH)));

        let tools = spec.container("tools").unwrap();
        assert!(tools.env.is_empty());
        assert!(spec.needs_source_volume());
    }

    #[test]
    fn test_run_container_is_supervised() {
        let d = devfile();
        let b = bindings();
        let spec = SpecBuilder::new(&d, &b).build().unwrap();

        let runtime = spec.container("runtime").unwrap();
        assert!(runtime.supervised);
        assert_eq!(runtime.command, vec![SUPERVISORD_BINARY]);
        assert!(runtime.env.iter().any(|e| e.name == ENV_COMMAND_RUN));

        let tools = spec.container("tools").unwrap();
        assert!(!tools.supervised);
        assert!(tools.command.is_empty());
        assert_eq!(spec.labels.get("component").map(String::as_str), Some("nodejs"));
    }

    #[test]
    fn test_unknown_run_override_skips_supervision() {
        let d = devfile();
        let b = bindings();
        let spec = SpecBuilder::new(&d, &b)
            .with_run_command(Some("missing"))
            .build()
            .unwrap();
        assert!(!spec.needs_supervisor());
    }

    #[test]
    fn test_unbound_volume_is_an_error() {
        let d = devfile();
        let b = VolumeBindings::default();
        assert!(SpecBuilder::new(&d, &b).build().is_err());
    }
}
