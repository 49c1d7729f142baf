//! Docker Engine backend.
//!
//! Every container of a component is a separate Docker container labeled
//! with the component name and its alias. Volumes are named Docker volumes.
//! Containers cannot be updated in place, so a drifted container is removed
//! and created again while the others keep running.

mod client;
mod types;

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::devfile::EnvVar;
use crate::engine::DiffEngine;
use crate::error::{BackendError, InconsistentStateError, KdoError, Result};
use crate::runner::supervisor::{self, DEFAULT_BOOTSTRAP_IMAGE, SUPERVISORD_MOUNT_PATH};

use super::{
    Backend, BackendKind, ComponentHandle, ComponentSpec, ContainerSpec, ExecOutput, ExecRequest,
    LABEL_ALIAS, LABEL_COMPONENT, LABEL_STORAGE_NAME, LABEL_TYPE, Labels, MountSpec,
    ObservedComponent, ObservedContainer, SOURCE_MOUNT_PATH, VolumeHandle, component_labels,
    selector,
};

pub use client::{DEFAULT_DOCKER_HOST, DockerClient};
use types::{ContainerInspect, ContainerSummary, CreateContainerRequest, CreateHostConfig, Mount, PortBinding, memory_bytes};

/// Label listing the env var names kdo set on a container.
pub const LABEL_MANAGED_ENV: &str = "managed-env";

/// Poll interval while waiting for containers to run.
const POLL_INTERVAL_MS: u64 = 500;

/// Docker Engine implementation of [`Backend`].
#[derive(Debug, Clone)]
pub struct DockerBackend {
    client: DockerClient,
    bootstrap_image: String,
}

impl DockerBackend {
    /// Creates a backend talking to `host`.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a TCP or HTTP address.
    pub fn new(host: &str) -> Result<Self> {
        Ok(Self {
            client: DockerClient::new(host)?,
            bootstrap_image: DEFAULT_BOOTSTRAP_IMAGE.to_string(),
        })
    }

    /// Uses another image to populate the supervisord volume.
    #[must_use]
    pub fn with_bootstrap_image(mut self, image: impl Into<String>) -> Self {
        self.bootstrap_image = image.into();
        self
    }

    fn typed_labels(component: &str, kind: &str) -> Labels {
        let mut labels = component_labels(component);
        labels.insert(LABEL_TYPE.to_string(), kind.to_string());
        labels
    }

    async fn containers(&self, component: &str) -> Result<BTreeMap<String, ContainerSummary>> {
        let mut by_alias = BTreeMap::new();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for container in self.client.list_containers(&component_labels(component)).await? {
            let Some(alias) = container.labels.get(LABEL_ALIAS).cloned() else {
                continue;
            };
            *counts.entry(alias.clone()).or_default() += 1;
            by_alias.insert(alias, container);
        }
        if let Some((alias, count)) = counts.into_iter().find(|(_, count)| *count > 1) {
            return Err(InconsistentStateError::DuplicateComponents {
                component: format!("{component}/{alias}"),
                count,
            }
            .into());
        }
        Ok(by_alias)
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if !self.client.image_exists(image).await? {
            info!("Pulling image {image}");
            self.client.pull_image(image).await?;
        }
        Ok(())
    }

    /// Ensures the internal volume of `kind` and reports whether it was created.
    async fn ensure_internal_volume(&self, component: &str, kind: &str) -> Result<(String, bool)> {
        let labels = Self::typed_labels(component, kind);
        let existing = self.client.list_volumes(&labels, &[]).await?;
        if let Some(volume) = existing.into_iter().next() {
            return Ok((volume.name, false));
        }
        let name = format!("{component}-{kind}");
        self.client.create_volume(&name, &labels).await?;
        Ok((name, true))
    }

    /// Copies supervisord into a fresh volume with a one-off container.
    async fn bootstrap_supervisor(&self, component: &str, volume: &str) -> Result<()> {
        info!("Populating supervisord volume {volume}");
        self.ensure_image(&self.bootstrap_image).await?;
        let body = CreateContainerRequest {
            image: self.bootstrap_image.clone(),
            entrypoint: Some(supervisor::bootstrap_command()),
            host_config: CreateHostConfig {
                mounts: vec![Mount::volume(volume, SUPERVISORD_MOUNT_PATH)],
                ..CreateHostConfig::default()
            },
            ..CreateContainerRequest::default()
        };
        let name = format!("{component}-supervisord-init");
        let id = self.client.create_container(&name, &body).await?;
        self.client.start_container(&id).await?;
        let status = self.client.wait_container(&id).await?;
        self.client.remove_container(&id).await?;
        if status != 0 {
            return Err(BackendError::new(
                "bootstrap",
                volume,
                format!("copy exited with {status}"),
            )
            .into());
        }
        Ok(())
    }

    fn create_request(
        spec: &ComponentSpec,
        container: &ContainerSpec,
        source_volume: Option<&str>,
        supervisor_volume: Option<&str>,
    ) -> CreateContainerRequest {
        let mut labels = component_labels(&spec.name);
        labels.insert(LABEL_ALIAS.to_string(), container.alias.clone());
        let managed: Vec<&str> = container.env.iter().map(|e| e.name.as_str()).collect();
        labels.insert(LABEL_MANAGED_ENV.to_string(), managed.join(","));

        let mut mounts: Vec<Mount> = container
            .mounts
            .iter()
            .map(|m| Mount::volume(&m.volume, &m.path))
            .collect();
        if let Some(volume) = source_volume.filter(|_| container.mount_sources) {
            mounts.push(Mount::volume(volume, SOURCE_MOUNT_PATH));
        }
        if let Some(volume) = supervisor_volume.filter(|_| container.supervised) {
            mounts.push(Mount::volume(volume, SUPERVISORD_MOUNT_PATH));
        }

        let ports: Vec<String> = container.ports.iter().map(|p| format!("{p}/tcp")).collect();
        CreateContainerRequest {
            image: container.image.clone(),
            entrypoint: (!container.command.is_empty()).then(|| container.command.clone()),
            cmd: (!container.args.is_empty()).then(|| container.args.clone()),
            env: container
                .env
                .iter()
                .map(|e| format!("{}={}", e.name, e.value))
                .collect(),
            labels,
            exposed_ports: ports
                .iter()
                .map(|p| (p.clone(), serde_json::json!({})))
                .collect(),
            host_config: CreateHostConfig {
                mounts,
                port_bindings: ports
                    .into_iter()
                    .map(|p| (p, vec![PortBinding::default()]))
                    .collect(),
                memory: container.memory_limit.as_deref().and_then(memory_bytes),
            },
        }
    }

    async fn create_container(
        &self,
        spec: &ComponentSpec,
        container: &ContainerSpec,
        source_volume: Option<&str>,
        supervisor_volume: Option<&str>,
    ) -> Result<String> {
        self.ensure_image(&container.image).await?;
        let body = Self::create_request(spec, container, source_volume, supervisor_volume);
        let name = format!("{}-{}", spec.name, container.alias);
        let id = self.client.create_container(&name, &body).await?;
        self.client.start_container(&id).await?;
        info!("Started container {name}");
        Ok(id)
    }

    /// Reads the part of an inspected container that kdo manages.
    fn observed(alias: &str, inspect: &ContainerInspect) -> ObservedContainer {
        let labels = inspect.config.labels.clone().unwrap_or_default();
        let managed: BTreeSet<&str> = labels
            .get(LABEL_MANAGED_ENV)
            .map(|names| names.split(',').filter(|n| !n.is_empty()).collect())
            .unwrap_or_default();

        let env = inspect
            .config
            .env
            .iter()
            .flatten()
            .filter_map(|entry| entry.split_once('='))
            .filter(|(name, _)| managed.contains(name))
            .map(|(name, value)| EnvVar::new(name, value))
            .collect();

        let ports = inspect
            .host_config
            .port_bindings
            .iter()
            .flat_map(BTreeMap::keys)
            .filter_map(|key| key.split('/').next()?.parse().ok())
            .collect();

        let mounts = inspect
            .mounts
            .iter()
            .filter(|m| m.kind == "volume")
            .filter(|m| {
                m.destination != SOURCE_MOUNT_PATH
                    && !m.destination.starts_with(SUPERVISORD_MOUNT_PATH.trim_end_matches('/'))
            })
            .filter_map(|m| {
                Some(MountSpec {
                    volume: m.name.clone()?,
                    path: m.destination.clone(),
                })
            })
            .collect();

        ObservedContainer {
            alias: alias.to_string(),
            image: inspect.config.image.clone(),
            env,
            ports,
            mounts,
        }
    }

    fn handle(component: &str, ids: BTreeMap<String, String>) -> ComponentHandle {
        ComponentHandle {
            component: component.to_string(),
            id: ids.values().next().cloned().unwrap_or_default(),
            containers: ids,
        }
    }

    fn container_id<'h>(handle: &'h ComponentHandle, alias: &str) -> Result<&'h str> {
        handle
            .containers
            .get(alias)
            .map(String::as_str)
            .ok_or_else(|| BackendError::new("exec", alias, "no such container in component").into())
    }
}

#[async_trait]
impl Backend for DockerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    async fn exists(&self, component: &str) -> Result<bool> {
        Ok(!self.containers(component).await?.is_empty())
    }

    async fn observe(&self, component: &str) -> Result<Option<ObservedComponent>> {
        let containers = self.containers(component).await?;
        if containers.is_empty() {
            return Ok(None);
        }

        let mut observed = Vec::new();
        let mut ids = BTreeMap::new();
        let mut running = true;
        for (alias, summary) in &containers {
            let inspect = self.client.inspect_container(&summary.id).await?;
            running &= inspect.state.running;
            observed.push(Self::observed(alias, &inspect));
            ids.insert(alias.clone(), inspect.id);
        }

        Ok(Some(ObservedComponent {
            handle: Self::handle(component, ids),
            running,
            containers: observed,
        }))
    }

    async fn create_or_update(&self, spec: &ComponentSpec) -> Result<ComponentHandle> {
        let mut existing = self.containers(&spec.name).await?;

        let source_volume = if spec.needs_source_volume() {
            Some(self.ensure_internal_volume(&spec.name, "projects").await?.0)
        } else {
            None
        };
        let supervisor_volume = if spec.needs_supervisor() {
            let (name, created) = self.ensure_internal_volume(&spec.name, "supervisord").await?;
            if created {
                self.bootstrap_supervisor(&spec.name, &name).await?;
            }
            Some(name)
        } else {
            None
        };

        let mut ids = BTreeMap::new();
        for container in &spec.containers {
            let current = existing.remove(&container.alias);
            let id = match current {
                Some(summary) => {
                    let inspect = self.client.inspect_container(&summary.id).await?;
                    let drift = DiffEngine::compare_container(
                        container,
                        &Self::observed(&container.alias, &inspect),
                    );
                    if drift.is_empty() {
                        if !summary.is_running() {
                            self.client.start_container(&summary.id).await?;
                        }
                        summary.id
                    } else {
                        let fields: Vec<&str> = drift.iter().map(|d| d.field).collect();
                        info!(
                            "Recreating container {} ({} changed)",
                            container.alias,
                            fields.join(", ")
                        );
                        self.client.remove_container(&summary.id).await?;
                        self.create_container(
                            spec,
                            container,
                            source_volume.as_deref(),
                            supervisor_volume.as_deref(),
                        )
                        .await?
                    }
                }
                None => {
                    self.create_container(
                        spec,
                        container,
                        source_volume.as_deref(),
                        supervisor_volume.as_deref(),
                    )
                    .await?
                }
            };
            ids.insert(container.alias.clone(), id);
        }

        for (alias, leftover) in existing {
            warn!("Removing undeclared container {alias}");
            self.client.remove_container(&leftover.id).await?;
        }

        Ok(Self::handle(&spec.name, ids))
    }

    async fn ensure_volume(&self, name: &str, size: &str, labels: &Labels) -> Result<VolumeHandle> {
        let storage_name = labels.get(LABEL_STORAGE_NAME).cloned().unwrap_or_default();
        let existing = self.client.list_volumes(labels, &[]).await?;
        match existing.as_slice() {
            [] => {
                debug!("Creating volume {name} (size {size} is not enforced by Docker)");
                let created = self.client.create_volume(name, labels).await?;
                Ok(VolumeHandle {
                    name: created.name,
                    storage_name,
                    size: None,
                })
            }
            [volume] => Ok(VolumeHandle {
                name: volume.name.clone(),
                storage_name,
                size: None,
            }),
            many => Err(InconsistentStateError::DuplicateVolumes {
                component: labels.get(LABEL_COMPONENT).cloned().unwrap_or_default(),
                volume: storage_name,
                count: many.len(),
            }
            .into()),
        }
    }

    async fn list_volumes(&self, component: &str) -> Result<Vec<VolumeHandle>> {
        let volumes = self
            .client
            .list_volumes(&component_labels(component), &[LABEL_STORAGE_NAME])
            .await?;
        Ok(volumes
            .into_iter()
            .map(|v| VolumeHandle {
                storage_name: v
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(LABEL_STORAGE_NAME).cloned())
                    .unwrap_or_default(),
                name: v.name,
                size: None,
            })
            .collect())
    }

    async fn exec(&self, handle: &ComponentHandle, request: &ExecRequest) -> Result<ExecOutput> {
        let id = Self::container_id(handle, &request.container)?;
        debug!("Exec in {}: {}", request.container, request.command.join(" "));
        self.client.exec(id, &request.command).await
    }

    async fn watch_until_running(
        &self,
        labels: &Labels,
        timeout: Duration,
    ) -> Result<ComponentHandle> {
        let component = labels.get(LABEL_COMPONENT).cloned().unwrap_or_default();
        let deadline = Instant::now() + timeout;

        loop {
            let containers = self.client.list_containers(labels).await?;
            let ids: BTreeMap<String, String> = containers
                .iter()
                .filter_map(|c| Some((c.labels.get(LABEL_ALIAS)?.clone(), c.id.clone())))
                .collect();
            if !ids.is_empty() && containers.iter().all(ContainerSummary::is_running) {
                return Ok(Self::handle(&component, ids));
            }
            if Instant::now() >= deadline {
                return Err(KdoError::timeout(selector(labels), timeout.as_secs()));
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
    }

    async fn copy_to_remote(
        &self,
        handle: &ComponentHandle,
        container: &str,
        archive: Vec<u8>,
        remote_path: &str,
    ) -> Result<()> {
        let id = Self::container_id(handle, container)?;
        self.client.put_archive(id, remote_path, archive).await
    }

    async fn logs(&self, handle: &ComponentHandle, container: &str) -> Result<String> {
        let id = Self::container_id(handle, container)?;
        self.client.logs(id).await
    }

    async fn delete(&self, component: &str) -> Result<()> {
        for container in self.client.list_containers(&component_labels(component)).await? {
            self.client.remove_container(&container.id).await?;
        }
        for volume in self.client.list_volumes(&component_labels(component), &[]).await? {
            self.client.remove_volume(&volume.name).await?;
        }
        info!("Deleted component {component}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::volume_labels;
    use types::{InspectConfig, InspectHostConfig, InspectState, MountPoint};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec() -> ComponentSpec {
        ComponentSpec {
            name: "nodejs".to_string(),
            labels: component_labels("nodejs"),
            containers: vec![ContainerSpec {
                alias: "runtime".to_string(),
                image: "node:18".to_string(),
                env: vec![EnvVar::new("PROJECTS_ROOT", "/projects")],
                ports: vec![3000],
                mounts: vec![MountSpec {
                    volume: "nodejs-data".to_string(),
                    path: "/data".to_string(),
                }],
                memory_limit: Some("512Mi".to_string()),
                mount_sources: true,
                ..ContainerSpec::default()
            }],
        }
    }

    #[test]
    fn test_create_request_mounts_and_labels() {
        let spec = spec();
        let body = DockerBackend::create_request(&spec, &spec.containers[0], Some("nodejs-projects"), None);

        assert_eq!(body.labels.get(LABEL_ALIAS).map(String::as_str), Some("runtime"));
        assert_eq!(body.labels.get(LABEL_MANAGED_ENV).map(String::as_str), Some("PROJECTS_ROOT"));
        assert_eq!(body.env, vec!["PROJECTS_ROOT=/projects"]);
        assert_eq!(body.host_config.mounts.len(), 2);
        assert_eq!(body.host_config.mounts[1].target, SOURCE_MOUNT_PATH);
        assert!(body.exposed_ports.contains_key("3000/tcp"));
        assert_eq!(body.host_config.memory, Some(512 * 1024 * 1024));
        assert!(body.entrypoint.is_none());
    }

    #[test]
    fn test_observed_ignores_image_env_and_internal_mounts() {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MANAGED_ENV.to_string(), "PROJECTS_ROOT".to_string());
        let mut bindings = BTreeMap::new();
        bindings.insert("3000/tcp".to_string(), Some(vec![PortBinding::default()]));
        let inspect = ContainerInspect {
            id: "c1".to_string(),
            config: InspectConfig {
                image: "node:18".to_string(),
                env: Some(vec![
                    "PATH=/usr/bin".to_string(),
                    "PROJECTS_ROOT=/projects".to_string(),
                ]),
                labels: Some(labels),
            },
            host_config: InspectHostConfig {
                port_bindings: Some(bindings),
            },
            state: InspectState { running: true },
            mounts: vec![
                MountPoint {
                    kind: "volume".to_string(),
                    name: Some("nodejs-data".to_string()),
                    destination: "/data".to_string(),
                },
                MountPoint {
                    kind: "volume".to_string(),
                    name: Some("nodejs-projects".to_string()),
                    destination: SOURCE_MOUNT_PATH.to_string(),
                },
                MountPoint {
                    kind: "volume".to_string(),
                    name: Some("nodejs-supervisord".to_string()),
                    destination: "/opt/odo".to_string(),
                },
            ],
        };

        let observed = DockerBackend::observed("runtime", &inspect);
        let spec = spec();
        assert!(DiffEngine::compare_container(&spec.containers[0], &observed).is_empty());
    }

    #[tokio::test]
    async fn test_ensure_volume_reuses_single_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/volumes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Volumes": [{"Name": "nodejs-data", "Labels": {"component": "nodejs", "storage-name": "data"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/volumes/create"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let backend = DockerBackend::new(&server.uri()).unwrap();
        let handle = backend
            .ensure_volume("nodejs-data", "1Gi", &volume_labels("nodejs", "data"))
            .await
            .unwrap();
        assert_eq!(handle.name, "nodejs-data");
        assert_eq!(handle.storage_name, "data");
    }

    #[tokio::test]
    async fn test_ensure_volume_rejects_duplicates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/volumes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Volumes": [{"Name": "a"}, {"Name": "b"}]
            })))
            .mount(&server)
            .await;

        let backend = DockerBackend::new(&server.uri()).unwrap();
        let result = backend
            .ensure_volume("nodejs-data", "1Gi", &volume_labels("nodejs", "data"))
            .await;
        assert!(matches!(
            result,
            Err(KdoError::InconsistentState(InconsistentStateError::DuplicateVolumes { count: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn test_watch_times_out_without_containers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/containers/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let backend = DockerBackend::new(&server.uri()).unwrap();
        let result = backend
            .watch_until_running(&component_labels("nodejs"), Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(KdoError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_observe_absent_component() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/containers/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let backend = DockerBackend::new(&server.uri()).unwrap();
        assert!(backend.observe("nodejs").await.unwrap().is_none());
        assert!(!backend.exists("nodejs").await.unwrap());
    }
}
