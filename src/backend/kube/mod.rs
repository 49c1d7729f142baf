//! Kubernetes backend driven through `kubectl`.
//!
//! A component is one Deployment with one container per devfile container,
//! a `PersistentVolumeClaim` per volume component, and a Service named after
//! the component when any container declares ports. `kubectl apply` leaves
//! the running pod alone when the template is unchanged.

mod kubectl;
mod resources;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{BackendError, InconsistentStateError, KdoError, Result};
use crate::runner::supervisor::DEFAULT_BOOTSTRAP_IMAGE;

use super::{
    Backend, BackendKind, ComponentHandle, ComponentSpec, ExecOutput, ExecRequest, LABEL_COMPONENT,
    LABEL_STORAGE_NAME, Labels, ObservedComponent, VolumeHandle, component_labels, selector,
};

pub use kubectl::Kubectl;
use resources::{Claim, Deployment, ObjectList, Pod, claim, deployment, service};

/// Default `kubectl` binary.
pub const DEFAULT_KUBECTL: &str = "kubectl";

/// Poll interval while waiting for a pod.
const POLL_INTERVAL_MS: u64 = 1000;

/// Kubernetes implementation of [`Backend`].
#[derive(Debug, Clone)]
pub struct KubeBackend {
    kubectl: Kubectl,
    bootstrap_image: String,
}

impl KubeBackend {
    /// Creates a backend driving `kubectl`.
    #[must_use]
    pub fn new(kubectl: Kubectl) -> Self {
        Self {
            kubectl,
            bootstrap_image: DEFAULT_BOOTSTRAP_IMAGE.to_string(),
        }
    }

    /// Uses another image for the supervisord init container.
    #[must_use]
    pub fn with_bootstrap_image(mut self, image: impl Into<String>) -> Self {
        self.bootstrap_image = image.into();
        self
    }

    async fn deployments(&self, component: &str) -> Result<Vec<Deployment>> {
        let selector = selector(&component_labels(component));
        let list: ObjectList<Deployment> = self
            .kubectl
            .get_json("list", "deployments", &["get", "deployments", "-l", selector.as_str(), "-o", "json"])
            .await?;
        if list.items.len() > 1 {
            return Err(InconsistentStateError::DuplicateComponents {
                component: component.to_string(),
                count: list.items.len(),
            }
            .into());
        }
        Ok(list.items)
    }

    async fn pods(&self, selector: &str) -> Result<Vec<Pod>> {
        let list: ObjectList<Pod> = self
            .kubectl
            .get_json("list", "pods", &["get", "pods", "-l", selector, "-o", "json"])
            .await?;
        Ok(list.items)
    }

    async fn claims(&self, selector: &str) -> Result<Vec<Claim>> {
        let list: ObjectList<Claim> = self
            .kubectl
            .get_json("list", "pvc", &["get", "pvc", "-l", selector, "-o", "json"])
            .await?;
        Ok(list.items)
    }

    async fn apply(&self, resource: &str, manifest: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(manifest)
            .map_err(|e| BackendError::new("apply", resource, e.to_string()))?;
        self.kubectl
            .run("apply", resource, &["apply", "-f", "-"], Some(body))
            .await?;
        Ok(())
    }

    fn pod_handle(component: &str, pod: &Pod) -> ComponentHandle {
        ComponentHandle {
            component: component.to_string(),
            id: pod.metadata.name.clone(),
            containers: pod
                .spec
                .containers
                .iter()
                .map(|c| (c.name.clone(), c.name.clone()))
                .collect(),
        }
    }

    fn container<'h>(handle: &'h ComponentHandle, alias: &str, operation: &str) -> Result<&'h str> {
        handle
            .containers
            .get(alias)
            .map(String::as_str)
            .ok_or_else(|| BackendError::new(operation, alias, "no such container in component").into())
    }
}

#[async_trait]
impl Backend for KubeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Kubernetes
    }

    async fn exists(&self, component: &str) -> Result<bool> {
        Ok(!self.deployments(component).await?.is_empty())
    }

    async fn observe(&self, component: &str) -> Result<Option<ObservedComponent>> {
        let Some(deployment) = self.deployments(component).await?.into_iter().next() else {
            return Ok(None);
        };
        let pods = self.pods(&selector(&component_labels(component))).await?;
        let running = pods.iter().find(|p| p.is_running());

        let handle = match running {
            Some(pod) => Self::pod_handle(component, pod),
            None => ComponentHandle {
                component: component.to_string(),
                id: deployment.metadata.name.clone(),
                containers: BTreeMap::new(),
            },
        };

        Ok(Some(ObservedComponent {
            handle,
            running: running.is_some(),
            containers: deployment.spec.template.spec.observed(),
        }))
    }

    async fn create_or_update(&self, spec: &ComponentSpec) -> Result<ComponentHandle> {
        let manifest = deployment(spec, &self.bootstrap_image);
        self.apply(&format!("deployment/{}", spec.name), &manifest)
            .await?;
        info!("Applied deployment {}", spec.name);

        match service(spec) {
            Some(manifest) => {
                self.apply(&format!("service/{}", spec.name), &manifest)
                    .await?;
                debug!("Applied service {}", spec.name);
            }
            None => {
                self.kubectl
                    .run(
                        "delete",
                        &format!("service/{}", spec.name),
                        &["delete", "service", spec.name.as_str(), "--ignore-not-found"],
                        None,
                    )
                    .await?;
            }
        }
        Ok(ComponentHandle {
            component: spec.name.clone(),
            id: spec.name.clone(),
            containers: spec
                .containers
                .iter()
                .map(|c| (c.alias.clone(), c.alias.clone()))
                .collect(),
        })
    }

    async fn ensure_volume(&self, name: &str, size: &str, labels: &Labels) -> Result<VolumeHandle> {
        let storage_name = labels.get(LABEL_STORAGE_NAME).cloned().unwrap_or_default();
        let existing = self.claims(&selector(labels)).await?;
        match existing.as_slice() {
            [] => {
                debug!("Creating claim {name} ({size})");
                self.apply(&format!("pvc/{name}"), &claim(name, size, labels))
                    .await?;
                Ok(VolumeHandle {
                    name: name.to_string(),
                    storage_name,
                    size: Some(size.to_string()),
                })
            }
            [found] => Ok(VolumeHandle {
                name: found.metadata.name.clone(),
                storage_name,
                size: found.size(),
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
        let selector = format!("{},{LABEL_STORAGE_NAME}", selector(&component_labels(component)));
        let claims = self.claims(&selector).await?;
        Ok(claims
            .iter()
            .map(|c| VolumeHandle {
                name: c.metadata.name.clone(),
                storage_name: c
                    .metadata
                    .labels
                    .get(LABEL_STORAGE_NAME)
                    .cloned()
                    .unwrap_or_default(),
                size: c.size(),
            })
            .collect())
    }

    async fn exec(&self, handle: &ComponentHandle, request: &ExecRequest) -> Result<ExecOutput> {
        let container = Self::container(handle, &request.container, "exec")?;
        let mut args = vec!["exec", handle.id.as_str(), "-c", container, "--"];
        args.extend(request.command.iter().map(String::as_str));
        debug!("Exec in {container}: {}", request.command.join(" "));
        self.kubectl
            .output("exec", &format!("{}/{container}", handle.id), &args, None)
            .await
    }

    async fn watch_until_running(
        &self,
        labels: &Labels,
        timeout: Duration,
    ) -> Result<ComponentHandle> {
        let component = labels.get(LABEL_COMPONENT).cloned().unwrap_or_default();
        let selector = selector(labels);
        let deadline = Instant::now() + timeout;

        // A pod of the previous template can still be Running right after an
        // apply, so the rollout has to finish before any pod is trusted.
        if !component.is_empty() {
            let deployment = format!("deployment/{component}");
            let limit = format!("--timeout={}s", timeout.as_secs().max(1));
            info!("Waiting for rollout of {deployment}");
            let status = self
                .kubectl
                .output(
                    "rollout",
                    &deployment,
                    &["rollout", "status", deployment.as_str(), limit.as_str()],
                    None,
                )
                .await?;
            if !status.success() {
                debug!("Rollout of {deployment} did not finish: {}", status.stderr.trim());
                return Err(KdoError::timeout(selector, timeout.as_secs()));
            }
        }

        info!("Waiting for a running pod matching {selector}");
        loop {
            let pods = self.pods(&selector).await?;
            if let Some(pod) = pods.iter().find(|p| p.is_running()) {
                debug!("Pod {} is running", pod.metadata.name);
                return Ok(Self::pod_handle(&component, pod));
            }
            if Instant::now() >= deadline {
                return Err(KdoError::timeout(selector, timeout.as_secs()));
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
        let container = Self::container(handle, container, "copy")?;
        let args = [
            "exec", "-i", handle.id.as_str(), "-c", container, "--", "tar", "xf", "-", "-C",
            remote_path,
        ];
        self.kubectl
            .run("copy", &format!("{}/{container}:{remote_path}", handle.id), &args, Some(archive))
            .await?;
        Ok(())
    }

    async fn logs(&self, handle: &ComponentHandle, container: &str) -> Result<String> {
        let container = Self::container(handle, container, "logs")?;
        self.kubectl
            .run("logs", &handle.id, &["logs", handle.id.as_str(), "-c", container], None)
            .await
    }

    async fn delete(&self, component: &str) -> Result<()> {
        let selector = selector(&component_labels(component));
        self.kubectl
            .run(
                "delete",
                component,
                &["delete", "deployment,service,pvc", "-l", selector.as_str(), "--ignore-not-found"],
                None,
            )
            .await?;
        info!("Deleted component {component}");
        Ok(())
    }
}
