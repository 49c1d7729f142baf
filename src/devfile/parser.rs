//! Devfile loader.
//!
//! Reads YAML from disk, detects the schema generation and produces the
//! common [`Devfile`] model.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{DevfileError, Result};

use super::spec::{
    Command, CommandKind, Component, ComponentKind, CompositeCommand, Container, Devfile, Endpoint,
    EnvVar, Events, ExecCommand, Group, Project, Volume, VolumeMount,
};
use super::v1;

/// Default devfile names to search for.
pub const DEFAULT_DEVFILE_NAMES: &[&str] = &["devfile.yaml", ".devfile.yaml", "devfile.yml"];

/// Devfile parser.
#[derive(Debug, Default)]
pub struct DevfileParser {
    /// Component name that replaces `metadata.name`.
    name_override: Option<String>,
}

/// Top-level keys used to pick the schema generation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionProbe {
    #[serde(default)]
    schema_version: Option<String>,
    #[serde(default)]
    api_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RawMetadata {
    #[serde(default)]
    pub(super) name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDevfile {
    schema_version: String,
    #[serde(default)]
    metadata: RawMetadata,
    #[serde(default)]
    components: Vec<RawComponent>,
    #[serde(default)]
    commands: Vec<RawCommand>,
    #[serde(default)]
    events: Events,
    #[serde(default)]
    projects: Vec<RawProject>,
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    name: String,
    #[serde(default)]
    container: Option<RawContainer>,
    #[serde(default)]
    volume: Option<Volume>,
    #[serde(flatten)]
    other: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContainer {
    image: String,
    #[serde(default)]
    command: Vec<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Vec<EnvVar>,
    #[serde(default)]
    memory_limit: Option<String>,
    #[serde(default)]
    mount_sources: Option<bool>,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
    #[serde(default)]
    volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    id: String,
    #[serde(default)]
    exec: Option<RawExec>,
    #[serde(default)]
    composite: Option<RawComposite>,
    #[serde(flatten)]
    other: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExec {
    #[serde(default)]
    component: String,
    #[serde(default)]
    command_line: String,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    group: Option<Group>,
}

#[derive(Debug, Deserialize)]
struct RawComposite {
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default)]
    group: Option<Group>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProject {
    name: String,
    #[serde(default)]
    git: Option<RawGit>,
    #[serde(default)]
    clone_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGit {
    #[serde(default)]
    remotes: BTreeMap<String, String>,
}

impl DevfileParser {
    /// Creates a new devfile parser.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            name_override: None,
        }
    }

    /// Overrides the component name taken from the manifest metadata.
    #[must_use]
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name_override = name;
        self
    }

    /// Loads a devfile from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Devfile> {
        let path = path.as_ref();
        info!("Loading devfile from: {}", path.display());

        if !path.exists() {
            return Err(DevfileError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| DevfileError::parse(format!("Failed to read {}: {e}", path.display())))?;

        let fallback = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned());
        let mut devfile = self.parse_yaml(&content)?;
        if devfile.name.is_empty() {
            devfile.name = fallback.unwrap_or_default();
        }
        Ok(devfile)
    }

    /// Parses a devfile from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or the schema is unknown.
    pub fn parse_yaml(&self, content: &str) -> Result<Devfile> {
        let probe: VersionProbe = serde_yaml::from_str(content)
            .map_err(|e| DevfileError::parse(format!("YAML parse error: {e}")))?;

        let mut devfile = match (probe.schema_version, probe.api_version) {
            (Some(version), _) if version.starts_with("2.") => {
                debug!("Parsing devfile schema {version}");
                parse_v2(content)?
            }
            (None, Some(version)) if version.starts_with("1.") => {
                debug!("Translating devfile apiVersion {version}");
                v1::parse(content)?
            }
            (Some(version), _) | (None, Some(version)) => {
                return Err(DevfileError::UnsupportedVersion { version }.into());
            }
            (None, None) => {
                return Err(DevfileError::parse("missing schemaVersion").into());
            }
        };

        if let Some(name) = &self.name_override {
            devfile.name.clone_from(name);
        }
        Ok(devfile)
    }
}

fn parse_v2(content: &str) -> Result<Devfile> {
    let raw: RawDevfile = serde_yaml::from_str(content)
        .map_err(|e| DevfileError::parse(format!("YAML parse error: {e}")))?;

    let components = raw
        .components
        .into_iter()
        .filter_map(|component| {
            let kind = match (component.container, component.volume) {
                (Some(c), _) => ComponentKind::Container(Container {
                    image: c.image,
                    command: c.command,
                    args: c.args,
                    env: c.env,
                    memory_limit: c.memory_limit,
                    mount_sources: c.mount_sources.unwrap_or(true),
                    endpoints: c.endpoints,
                    volume_mounts: c.volume_mounts,
                }),
                (None, Some(v)) => ComponentKind::Volume(v),
                (None, None) => {
                    let kinds: Vec<&str> = component.other.keys().map(String::as_str).collect();
                    warn!(
                        "Skipping component {} of unsupported type: {}",
                        component.name,
                        kinds.join(", ")
                    );
                    return None;
                }
            };
            Some(Component {
                name: component.name,
                kind,
            })
        })
        .collect();

    let commands = raw
        .commands
        .into_iter()
        .map(|command| {
            let id = command.id.to_lowercase();
            match (command.exec, command.composite) {
                (Some(exec), _) => Command {
                    id,
                    kind: CommandKind::Exec(ExecCommand {
                        component: exec.component,
                        command_line: exec.command_line,
                        working_dir: exec.working_dir.filter(|w| !w.is_empty()),
                    }),
                    group: exec.group,
                },
                (None, Some(composite)) => Command {
                    id,
                    kind: CommandKind::Composite(CompositeCommand {
                        commands: composite
                            .commands
                            .iter()
                            .map(|c| c.to_lowercase())
                            .collect(),
                    }),
                    group: composite.group,
                },
                (None, None) => {
                    let kind = command
                        .other
                        .keys()
                        .next()
                        .cloned()
                        .unwrap_or_else(|| String::from("unknown"));
                    Command {
                        id,
                        kind: CommandKind::Unsupported(kind),
                        group: None,
                    }
                }
            }
        })
        .collect();

    let projects = raw
        .projects
        .into_iter()
        .map(|p| Project {
            name: p.name,
            git: p.git.and_then(|g| {
                g.remotes
                    .get("origin")
                    .cloned()
                    .or_else(|| g.remotes.into_values().next())
            }),
            clone_path: p.clone_path,
        })
        .collect();

    Ok(Devfile {
        schema_version: raw.schema_version,
        name: raw.metadata.name.unwrap_or_default(),
        components,
        commands,
        events: lowercase_events(raw.events),
        projects,
    })
}

/// Normalizes event ids the same way command ids are.
fn lowercase_events(events: Events) -> Events {
    let lower = |ids: Vec<String>| -> Vec<String> {
        ids.into_iter().map(|id| id.to_lowercase()).collect()
    };
    Events {
        pre_start: lower(events.pre_start),
        post_start: lower(events.post_start),
        pre_stop: lower(events.pre_stop),
        post_stop: lower(events.post_stop),
    }
}

/// Finds a devfile in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no devfile is found.
pub fn find_devfile(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_DEVFILE_NAMES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found devfile: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(DevfileError::NotFound {
        path: start.join(DEFAULT_DEVFILE_NAMES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devfile::spec::GroupKind;
    use crate::error::KdoError;

    const NODEJS: &str = r#"
schemaVersion: 2.0.0
metadata:
  name: nodejs
components:
  - name: runtime
    container:
      image: registry.access.redhat.com/ubi8/nodejs-12:1-36
      memoryLimit: 1024Mi
      endpoints:
        - name: http-3000
          targetPort: 3000
      volumeMounts:
        - name: data
          path: /data
  - name: data
    volume:
      size: 2Gi
  - name: k8s-thing
    kubernetes:
      uri: deploy.yaml
commands:
  - id: DevBuild
    exec:
      component: runtime
      commandLine: npm install
      workingDir: ${PROJECTS_ROOT}
      group:
        kind: build
        isDefault: true
  - id: devrun
    exec:
      component: runtime
      commandLine: npm start
      group:
        kind: run
        isDefault: true
  - id: buildall
    composite:
      commands: [DevBuild]
  - id: deploy
    apply:
      component: k8s-thing
events:
  postStart: [DevBuild]
projects:
  - name: nodejs-starter
    git:
      remotes:
        origin: https://github.com/odo-devfiles/nodejs-ex.git
"#;

    #[test]
    fn test_parse_v2() {
        let devfile = DevfileParser::new().parse_yaml(NODEJS).unwrap();
        assert_eq!(devfile.name, "nodejs");
        assert_eq!(devfile.components.len(), 2);
        assert_eq!(devfile.containers().count(), 1);
        assert_eq!(devfile.volumes().count(), 1);

        let runtime = devfile.container("runtime").unwrap();
        assert!(runtime.mount_sources);
        assert_eq!(runtime.endpoints[0].target_port, 3000);

        let build = devfile.command("devbuild").unwrap();
        assert_eq!(build.group_kind(), Some(GroupKind::Build));
        assert!(build.is_default());

        match &devfile.command("buildall").unwrap().kind {
            CommandKind::Composite(c) => assert_eq!(c.commands, vec!["devbuild"]),
            other => panic!("unexpected kind: {other:?}"),
        }
        assert!(matches!(
            devfile.command("deploy").unwrap().kind,
            CommandKind::Unsupported(ref kind) if kind == "apply"
        ));
        assert_eq!(devfile.events.post_start, vec!["devbuild"]);
        assert_eq!(
            devfile.projects[0].git.as_deref(),
            Some("https://github.com/odo-devfiles/nodejs-ex.git")
        );
    }

    #[test]
    fn test_mount_sources_defaults_to_true() {
        let yaml = r#"
schemaVersion: 2.0.0
metadata:
  name: pair
components:
  - name: runtime
    container:
      image: node:18
  - name: sidecar
    container:
      image: redis:7
      mountSources: false
"#;
        let devfile = DevfileParser::new().parse_yaml(yaml).unwrap();
        assert!(devfile.container("runtime").unwrap().mount_sources);
        assert!(!devfile.container("sidecar").unwrap().mount_sources);
        assert_eq!(devfile.source_container(), Some("runtime"));
    }

    #[test]
    fn test_name_override() {
        let devfile = DevfileParser::new()
            .with_name(Some("web".to_string()))
            .parse_yaml(NODEJS)
            .unwrap();
        assert_eq!(devfile.name, "web");
    }

    #[test]
    fn test_unsupported_version() {
        let result = DevfileParser::new().parse_yaml("schemaVersion: 3.1.0\n");
        assert!(matches!(
            result,
            Err(KdoError::Devfile(DevfileError::UnsupportedVersion { .. }))
        ));
    }

    #[test]
    fn test_find_devfile_in_parent() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("devfile.yaml"), NODEJS).unwrap();
        let nested = dir.path().join("src").join("lib");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_devfile(&nested).unwrap();
        assert_eq!(found, dir.path().join("devfile.yaml"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = DevfileParser::new().load_file(dir.path().join("devfile.yaml"));
        assert!(matches!(
            result,
            Err(KdoError::Devfile(DevfileError::NotFound { .. }))
        ));
    }
}
