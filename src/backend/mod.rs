//! Backend adapters.
//!
//! The engine, the command runner and the file syncer only ever talk to the
//! [`Backend`] trait. Two implementations exist: a Docker Engine client for
//! local containers and a `kubectl` driver for clusters.

pub mod docker;
pub mod kube;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::devfile::EnvVar;
use crate::error::Result;

pub use docker::DockerBackend;
pub use kube::KubeBackend;

/// Label carrying the component name.
pub const LABEL_COMPONENT: &str = "component";

/// Label carrying the volume component name.
pub const LABEL_STORAGE_NAME: &str = "storage-name";

/// Label carrying the container alias.
pub const LABEL_ALIAS: &str = "alias";

/// Label distinguishing engine-managed volumes.
pub const LABEL_TYPE: &str = "type";

/// Where the source tree is synced to inside containers.
pub const SOURCE_MOUNT_PATH: &str = "/projects";

/// Label set used to correlate backend resources with manifest entities.
pub type Labels = BTreeMap<String, String>;

/// Labels for component-level resources.
#[must_use]
pub fn component_labels(component: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert(LABEL_COMPONENT.to_string(), component.to_string());
    labels
}

/// Labels for a volume resource of a component.
#[must_use]
pub fn volume_labels(component: &str, volume: &str) -> Labels {
    let mut labels = component_labels(component);
    labels.insert(LABEL_STORAGE_NAME.to_string(), volume.to_string());
    labels
}

/// Renders labels as a `key=value,key=value` selector.
#[must_use]
pub fn selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Available backend implementations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Kubernetes cluster via `kubectl`.
    #[default]
    Kubernetes,
    /// Local Docker Engine.
    Docker,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kubernetes => write!(f, "kubernetes"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

/// Desired state of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentSpec {
    /// Component name.
    pub name: String,
    /// Labels applied to every resource of the component.
    pub labels: Labels,
    /// Containers, in manifest order.
    pub containers: Vec<ContainerSpec>,
}

impl ComponentSpec {
    /// Looks up a container by alias.
    #[must_use]
    pub fn container(&self, alias: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.alias == alias)
    }

    /// Returns true if any container needs the supervisord volume.
    #[must_use]
    pub fn needs_supervisor(&self) -> bool {
        self.containers.iter().any(|c| c.supervised)
    }

    /// Returns true if any container receives the source tree.
    #[must_use]
    pub fn needs_source_volume(&self) -> bool {
        self.containers.iter().any(|c| c.mount_sources)
    }
}

/// Desired state of one container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ContainerSpec {
    /// Container alias.
    pub alias: String,
    /// Image reference.
    pub image: String,
    /// Entrypoint.
    pub command: Vec<String>,
    /// Entrypoint arguments.
    pub args: Vec<String>,
    /// Full environment, injected variables included.
    pub env: Vec<EnvVar>,
    /// Container ports.
    pub ports: Vec<u16>,
    /// Persistent volume mounts.
    pub mounts: Vec<MountSpec>,
    /// Memory limit as a quantity string.
    pub memory_limit: Option<String>,
    /// Whether the source volume is mounted at [`SOURCE_MOUNT_PATH`].
    pub mount_sources: bool,
    /// Whether the supervisord volume is mounted.
    pub supervised: bool,
}

/// A volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MountSpec {
    /// Backing resource name (claim or volume name).
    pub volume: String,
    /// Mount path.
    pub path: String,
}

/// A persistent volume as seen by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeHandle {
    /// Backing resource name.
    pub name: String,
    /// Volume component it belongs to, from the storage label.
    pub storage_name: String,
    /// Size, when the backend reports one.
    pub size: Option<String>,
}

/// A running (or at least existing) component instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ComponentHandle {
    /// Component name.
    pub component: String,
    /// Pod name or, for Docker, the first container id.
    pub id: String,
    /// Container alias to backend container identifier.
    pub containers: BTreeMap<String, String>,
}

impl ComponentHandle {
    /// Returns true if the handle knows a container with `alias`.
    #[must_use]
    pub fn has_container(&self, alias: &str) -> bool {
        self.containers.contains_key(alias)
    }
}

/// Observed state of a component.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ObservedComponent {
    /// Handle to the instance.
    pub handle: ComponentHandle,
    /// Whether every container is running.
    pub running: bool,
    /// Per-container state.
    pub containers: Vec<ObservedContainer>,
}

/// Observed state of one container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ObservedContainer {
    /// Container alias.
    pub alias: String,
    /// Image reference.
    pub image: String,
    /// Environment set by kdo.
    pub env: Vec<EnvVar>,
    /// Container ports.
    pub ports: Vec<u16>,
    /// Persistent volume mounts.
    pub mounts: Vec<MountSpec>,
}

/// A command to run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Container alias.
    pub container: String,
    /// Argument vector.
    pub command: Vec<String>,
}

impl ExecRequest {
    /// Wraps a shell command line in `/bin/sh -c`.
    #[must_use]
    pub fn shell(container: &str, command_line: &str, working_dir: Option<&str>) -> Self {
        let line = match working_dir {
            Some(dir) => format!("cd {dir} && {command_line}"),
            None => command_line.to_string(),
        };
        Self {
            container: container.to_string(),
            command: vec!["/bin/sh".to_string(), "-c".to_string(), line],
        }
    }

    /// Runs an argument vector as is.
    #[must_use]
    pub fn args(container: &str, command: &[&str]) -> Self {
        Self {
            container: container.to_string(),
            command: command.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Captured result of an exec.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    /// Exit code.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl ExecOutput {
    /// Returns true if the process exited with zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capabilities a container platform provides to kdo.
///
/// Every method either succeeds or returns an error tagged with the
/// operation and resource. Implementations never touch the local filesystem.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which platform this is.
    fn kind(&self) -> BackendKind;

    /// Returns true if resources labeled with `component` exist.
    async fn exists(&self, component: &str) -> Result<bool>;

    /// Fetches the current state of a component.
    async fn observe(&self, component: &str) -> Result<Option<ObservedComponent>>;

    /// Creates the component or replaces the parts of it that differ.
    async fn create_or_update(&self, spec: &ComponentSpec) -> Result<ComponentHandle>;

    /// Returns the volume matching `labels`, creating it if none exists.
    ///
    /// More than one match is an inconsistency error.
    async fn ensure_volume(&self, name: &str, size: &str, labels: &Labels)
    -> Result<VolumeHandle>;

    /// Lists the persistent volumes of a component.
    async fn list_volumes(&self, component: &str) -> Result<Vec<VolumeHandle>>;

    /// Runs a command in a container of the component.
    async fn exec(&self, handle: &ComponentHandle, request: &ExecRequest) -> Result<ExecOutput>;

    /// Waits until an instance matching `selector` runs, up to `timeout`.
    async fn watch_until_running(
        &self,
        selector: &Labels,
        timeout: Duration,
    ) -> Result<ComponentHandle>;

    /// Extracts a tar archive into `remote_path` of a container.
    async fn copy_to_remote(
        &self,
        handle: &ComponentHandle,
        container: &str,
        archive: Vec<u8>,
        remote_path: &str,
    ) -> Result<()>;

    /// Returns the log of a container.
    async fn logs(&self, handle: &ComponentHandle, container: &str) -> Result<String>;

    /// Deletes every resource of a component, volumes included.
    async fn delete(&self, component: &str) -> Result<()>;
}
