//! In-memory backend that records every call.
//!
//! Used by the engine and reconciler tests to assert which mutating calls a
//! push made without a container platform.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{BackendError, InconsistentStateError, KdoError, Result};

use super::{
    Backend, BackendKind, ComponentHandle, ComponentSpec, ExecOutput, ExecRequest, LABEL_COMPONENT,
    LABEL_STORAGE_NAME, Labels, ObservedComponent, ObservedContainer, VolumeHandle, selector,
};

#[derive(Debug, Default)]
struct State {
    components: BTreeMap<String, ComponentSpec>,
    volumes: BTreeMap<String, (Labels, String)>,
    execs: Vec<ExecRequest>,
    copies: Vec<(String, String, usize)>,
    mutations: usize,
    failing: Vec<String>,
    stopped: bool,
}

/// Recording backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Creates an empty backend where everything runs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Makes every exec whose command line contains `pattern` exit with 1.
    pub fn fail_exec_containing(&self, pattern: &str) {
        self.state().failing.push(pattern.to_string());
    }

    /// Makes `watch_until_running` time out.
    pub fn never_run(&self) {
        self.state().stopped = true;
    }

    /// Adds a volume as if a previous run had created it.
    pub fn insert_volume(&self, name: &str, labels: &Labels) {
        self.state()
            .volumes
            .insert(name.to_string(), (labels.clone(), "1Gi".to_string()));
    }

    /// Names of the existing volumes.
    #[must_use]
    pub fn volumes(&self) -> Vec<String> {
        self.state().volumes.keys().cloned().collect()
    }

    /// Number of calls that changed state.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.state().mutations
    }

    /// Resets the mutation counter.
    pub fn reset_mutations(&self) {
        self.state().mutations = 0;
    }

    /// Every exec request, in order.
    #[must_use]
    pub fn execs(&self) -> Vec<ExecRequest> {
        self.state().execs.clone()
    }

    /// Exec requests flattened to space-joined command lines.
    #[must_use]
    pub fn exec_lines(&self) -> Vec<String> {
        self.state()
            .execs
            .iter()
            .map(|e| e.command.join(" "))
            .collect()
    }

    /// `(container, remote path, archive size)` of every copy.
    #[must_use]
    pub fn copies(&self) -> Vec<(String, String, usize)> {
        self.state().copies.clone()
    }

    /// The spec the component was last created or updated with.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<ComponentSpec> {
        self.state().components.get(name).cloned()
    }

    fn handle_for(spec: &ComponentSpec) -> ComponentHandle {
        ComponentHandle {
            component: spec.name.clone(),
            id: format!("{}-0", spec.name),
            containers: spec
                .containers
                .iter()
                .map(|c| (c.alias.clone(), format!("{}-{}", spec.name, c.alias)))
                .collect(),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    async fn exists(&self, component: &str) -> Result<bool> {
        Ok(self.state().components.contains_key(component))
    }

    async fn observe(&self, component: &str) -> Result<Option<ObservedComponent>> {
        let state = self.state();
        Ok(state.components.get(component).map(|spec| ObservedComponent {
            handle: Self::handle_for(spec),
            running: !state.stopped,
            containers: spec
                .containers
                .iter()
                .map(|c| ObservedContainer {
                    alias: c.alias.clone(),
                    image: c.image.clone(),
                    env: c.env.clone(),
                    ports: c.ports.clone(),
                    mounts: c.mounts.clone(),
                })
                .collect(),
        }))
    }

    async fn create_or_update(&self, spec: &ComponentSpec) -> Result<ComponentHandle> {
        let mut state = self.state();
        state.mutations += 1;
        state.components.insert(spec.name.clone(), spec.clone());
        Ok(Self::handle_for(spec))
    }

    async fn ensure_volume(&self, name: &str, size: &str, labels: &Labels) -> Result<VolumeHandle> {
        let mut state = self.state();
        let matching: Vec<(String, Labels, String)> = state
            .volumes
            .iter()
            .filter(|(_, (l, _))| l == labels)
            .map(|(n, (l, s))| (n.clone(), l.clone(), s.clone()))
            .collect();

        let storage_name = labels.get(LABEL_STORAGE_NAME).cloned().unwrap_or_default();
        match matching.as_slice() {
            [] => {
                state.mutations += 1;
                state
                    .volumes
                    .insert(name.to_string(), (labels.clone(), size.to_string()));
                Ok(VolumeHandle {
                    name: name.to_string(),
                    storage_name,
                    size: Some(size.to_string()),
                })
            }
            [(existing, _, existing_size)] => Ok(VolumeHandle {
                name: existing.clone(),
                storage_name,
                size: Some(existing_size.clone()),
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
        Ok(self
            .state()
            .volumes
            .iter()
            .filter(|(_, (labels, _))| {
                labels.get(LABEL_COMPONENT).map(String::as_str) == Some(component)
            })
            .map(|(name, (labels, size))| VolumeHandle {
                name: name.clone(),
                storage_name: labels.get(LABEL_STORAGE_NAME).cloned().unwrap_or_default(),
                size: Some(size.clone()),
            })
            .collect())
    }

    async fn exec(&self, handle: &ComponentHandle, request: &ExecRequest) -> Result<ExecOutput> {
        if !handle.has_container(&request.container) {
            return Err(BackendError::new("exec", &request.container, "no such container").into());
        }
        let mut state = self.state();
        state.execs.push(request.clone());
        let line = request.command.join(" ");
        let failed = state.failing.iter().any(|p| line.contains(p.as_str()));
        Ok(ExecOutput {
            exit_code: i64::from(failed),
            stdout: String::new(),
            stderr: if failed { format!("{line}: failed") } else { String::new() },
        })
    }

    async fn watch_until_running(
        &self,
        labels: &Labels,
        timeout: Duration,
    ) -> Result<ComponentHandle> {
        let state = self.state();
        let component = labels.get(LABEL_COMPONENT).map(String::as_str).unwrap_or_default();
        match state.components.get(component) {
            Some(spec) if !state.stopped => Ok(Self::handle_for(spec)),
            _ => Err(KdoError::timeout(selector(labels), timeout.as_secs())),
        }
    }

    async fn copy_to_remote(
        &self,
        _handle: &ComponentHandle,
        container: &str,
        archive: Vec<u8>,
        remote_path: &str,
    ) -> Result<()> {
        let mut state = self.state();
        state.mutations += 1;
        state
            .copies
            .push((container.to_string(), remote_path.to_string(), archive.len()));
        Ok(())
    }

    async fn logs(&self, _handle: &ComponentHandle, container: &str) -> Result<String> {
        Ok(format!("{container} log\n"))
    }

    async fn delete(&self, component: &str) -> Result<()> {
        let mut state = self.state();
        state.mutations += 1;
        state.components.remove(component);
        state.volumes.retain(|_, (labels, _)| {
            labels.get(LABEL_COMPONENT).map(String::as_str) != Some(component)
        });
        Ok(())
    }
}
