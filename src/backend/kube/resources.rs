//! Kubernetes manifests and the subset of API objects kdo reads back.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;

use crate::backend::{ComponentSpec, ContainerSpec, Labels, MountSpec, ObservedContainer, SOURCE_MOUNT_PATH};
use crate::devfile::EnvVar;
use crate::runner::supervisor::{self, SUPERVISORD_MOUNT_PATH};

/// Pod volume backing the project source.
pub const PROJECTS_VOLUME: &str = "kdo-projects";

/// Pod volume holding the supervisord binaries.
pub const SUPERVISORD_VOLUME: &str = "kdo-supervisord-shared-data";

/// Name of the init container that copies supervisord.
pub const BOOTSTRAP_CONTAINER: &str = "copy-supervisord";

/// `kind: List` style response.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectList<T> {
    /// Items.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Object metadata.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Object name.
    pub name: String,
    /// Labels.
    #[serde(default)]
    pub labels: Labels,
    /// Set once deletion started.
    #[serde(default)]
    pub deletion_timestamp: Option<String>,
}

/// A Deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec.
    pub spec: DeploymentSpec,
}

/// Deployment spec.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentSpec {
    /// Pod template.
    pub template: PodTemplate,
}

/// Pod template of a Deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct PodTemplate {
    /// Pod spec.
    pub spec: PodSpec,
}

/// A Pod.
#[derive(Debug, Clone, Deserialize)]
pub struct Pod {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec.
    pub spec: PodSpec,
    /// Status.
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    /// Returns true if the pod runs and is not being deleted.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status.phase == "Running" && self.metadata.deletion_timestamp.is_none()
    }
}

/// Pod status.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodStatus {
    /// Lifecycle phase.
    #[serde(default)]
    pub phase: String,
}

/// Pod spec.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodSpec {
    /// Containers.
    #[serde(default)]
    pub containers: Vec<Container>,
    /// Volumes.
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

/// A container of a pod spec.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name, the devfile alias.
    pub name: String,
    /// Image.
    #[serde(default)]
    pub image: String,
    /// Environment.
    #[serde(default)]
    pub env: Vec<EnvEntry>,
    /// Ports.
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    /// Volume mounts.
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

/// An env entry.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvEntry {
    /// Name.
    pub name: String,
    /// Literal value.
    #[serde(default)]
    pub value: String,
}

/// A container port.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port number.
    pub container_port: u16,
}

/// A volume mount.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Pod volume name.
    pub name: String,
    /// Mount path.
    pub mount_path: String,
}

/// A pod volume.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Pod volume name.
    pub name: String,
    /// Claim reference, for PVC backed volumes.
    #[serde(default)]
    pub persistent_volume_claim: Option<ClaimRef>,
}

/// Claim reference of a pod volume.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRef {
    /// Claim name.
    pub claim_name: String,
}

/// A `PersistentVolumeClaim`.
#[derive(Debug, Clone, Deserialize)]
pub struct Claim {
    /// Metadata.
    pub metadata: Metadata,
    /// Spec.
    #[serde(default)]
    pub spec: Value,
}

impl Claim {
    /// Requested storage, if any.
    #[must_use]
    pub fn size(&self) -> Option<String> {
        self.spec
            .pointer("/resources/requests/storage")
            .and_then(Value::as_str)
            .map(String::from)
    }
}

impl PodSpec {
    /// Converts the containers to their observed form.
    ///
    /// Only PVC backed mounts are reported; the project and supervisord
    /// volumes are implementation details.
    #[must_use]
    pub fn observed(&self) -> Vec<ObservedContainer> {
        self.containers
            .iter()
            .map(|c| ObservedContainer {
                alias: c.name.clone(),
                image: c.image.clone(),
                env: c.env.iter().map(|e| EnvVar::new(&e.name, &e.value)).collect(),
                ports: c.ports.iter().map(|p| p.container_port).collect(),
                mounts: c
                    .volume_mounts
                    .iter()
                    .filter_map(|m| {
                        let volume = self.volumes.iter().find(|v| v.name == m.name)?;
                        let claim = volume.persistent_volume_claim.as_ref()?;
                        Some(MountSpec {
                            volume: claim.claim_name.clone(),
                            path: m.mount_path.clone(),
                        })
                    })
                    .collect(),
            })
            .collect()
    }
}

/// Builds the Deployment for a component.
#[must_use]
pub fn deployment(spec: &ComponentSpec, bootstrap_image: &str) -> Value {
    let claims: BTreeSet<&str> = spec
        .containers
        .iter()
        .flat_map(|c| c.mounts.iter().map(|m| m.volume.as_str()))
        .collect();

    let mut volumes: Vec<Value> = claims
        .iter()
        .map(|claim| json!({ "name": claim, "persistentVolumeClaim": { "claimName": claim } }))
        .collect();
    if spec.needs_source_volume() {
        volumes.push(json!({ "name": PROJECTS_VOLUME, "emptyDir": {} }));
    }

    let mut init_containers = Vec::new();
    if spec.needs_supervisor() {
        volumes.push(json!({ "name": SUPERVISORD_VOLUME, "emptyDir": {} }));
        init_containers.push(json!({
            "name": BOOTSTRAP_CONTAINER,
            "image": bootstrap_image,
            "command": supervisor::bootstrap_command(),
            "volumeMounts": [{ "name": SUPERVISORD_VOLUME, "mountPath": SUPERVISORD_MOUNT_PATH }],
        }));
    }

    let containers: Vec<Value> = spec.containers.iter().map(container).collect();

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": spec.name, "labels": spec.labels },
        "spec": {
            "replicas": 1,
            "strategy": { "type": "Recreate" },
            "selector": { "matchLabels": spec.labels },
            "template": {
                "metadata": { "labels": spec.labels },
                "spec": {
                    "initContainers": init_containers,
                    "containers": containers,
                    "volumes": volumes,
                },
            },
        },
    })
}

fn container(c: &ContainerSpec) -> Value {
    let mut mounts: Vec<Value> = c
        .mounts
        .iter()
        .map(|m| json!({ "name": m.volume, "mountPath": m.path }))
        .collect();
    if c.mount_sources {
        mounts.push(json!({ "name": PROJECTS_VOLUME, "mountPath": SOURCE_MOUNT_PATH }));
    }
    if c.supervised {
        mounts.push(json!({ "name": SUPERVISORD_VOLUME, "mountPath": SUPERVISORD_MOUNT_PATH }));
    }

    let mut value = json!({
        "name": c.alias,
        "image": c.image,
        "env": c.env.iter().map(|e| json!({ "name": e.name, "value": e.value })).collect::<Vec<_>>(),
        "ports": c.ports.iter().map(|p| json!({ "containerPort": p })).collect::<Vec<_>>(),
        "volumeMounts": mounts,
    });
    if !c.command.is_empty() {
        value["command"] = json!(c.command);
    }
    if !c.args.is_empty() {
        value["args"] = json!(c.args);
    }
    if let Some(memory) = &c.memory_limit {
        value["resources"] = json!({ "limits": { "memory": memory } });
    }
    value
}

/// Builds the Service exposing every declared container port, if any.
///
/// The Service is named after the component and selects its pod by the
/// component labels, so endpoints survive pod restarts.
#[must_use]
pub fn service(spec: &ComponentSpec) -> Option<Value> {
    let ports: BTreeSet<u16> = spec
        .containers
        .iter()
        .flat_map(|c| c.ports.iter().copied())
        .collect();
    if ports.is_empty() {
        return None;
    }

    let ports: Vec<Value> = ports
        .iter()
        .map(|port| json!({ "name": format!("port-{port}"), "port": port, "targetPort": port, "protocol": "TCP" }))
        .collect();
    Some(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": spec.name, "labels": spec.labels },
        "spec": {
            "selector": spec.labels,
            "ports": ports,
        },
    }))
}

/// Builds a `PersistentVolumeClaim`.
#[must_use]
pub fn claim(name: &str, size: &str, labels: &Labels) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": name, "labels": labels },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "resources": { "requests": { "storage": size } },
        },
    })
}
