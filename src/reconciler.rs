//! Push pipeline.
//!
//! One push walks `Inspecting → Provisioning → Syncing → Executing` and ends
//! in `Done` or `Failed`. Stages run strictly in order; the first error stops
//! the pipeline and nothing is retried. Re-running the push is the retry.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backend::{
    Backend, ComponentHandle, SOURCE_MOUNT_PATH, VolumeHandle, component_labels,
};
use crate::devfile::{Command, Devfile, GroupKind};
use crate::engine::{ContainerDiff, DiffEngine, DiffType, SpecBuilder, VolumeBindings, backing_name};
use crate::error::{InconsistentStateError, KdoError, Result};
use crate::runner::CommandRunner;
use crate::state::StateStore;
use crate::sync::{FileSyncer, SyncOutcome};

/// Default bound for waiting on a running instance.
pub const DEFAULT_WATCH_TIMEOUT_SECS: u64 = 10;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Reading backend state and ensuring volumes.
    Inspecting,
    /// Creating or updating the component.
    Provisioning,
    /// Pushing local files.
    Syncing,
    /// Running lifecycle commands.
    Executing,
    /// Finished successfully.
    Done,
    /// Stopped on an error.
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inspecting => write!(f, "inspecting"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Syncing => write!(f, "syncing"),
            Self::Executing => write!(f, "executing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Options of one push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOptions {
    /// Run build and run even when no file changed; also forces a full sync.
    pub force_build: bool,
    /// Build command id replacing the default.
    pub build_command: Option<String>,
    /// Run command id replacing the default.
    pub run_command: Option<String>,
    /// Stop after syncing.
    pub skip_run: bool,
}

/// Structured result of a push.
#[derive(Debug, Serialize)]
pub struct PushReport {
    /// Component name.
    pub component: String,
    /// Final stage, `Done` or `Failed`.
    pub stage: Stage,
    /// Stage that failed, if any.
    pub failed_at: Option<Stage>,
    /// Human readable progress lines, in order.
    pub progress: Vec<String>,
    /// Whether the component was created by this push.
    pub created: bool,
    /// Whether drift caused an update.
    pub updated: bool,
    /// File sync result.
    pub sync: SyncOutcome,
    /// Error message when the push failed.
    pub error: Option<String>,
    /// Suggestion attached to the error.
    pub hint: Option<&'static str>,
}

impl PushReport {
    fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            stage: Stage::Inspecting,
            failed_at: None,
            progress: Vec::new(),
            created: false,
            updated: false,
            sync: SyncOutcome::default(),
            error: None,
            hint: None,
        }
    }

    /// Returns true if the push completed.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.stage, Stage::Done)
    }

    fn enter(&mut self, stage: Stage) {
        debug!("Entering stage {stage}");
        self.stage = stage;
    }

    fn note(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!("{line}");
        self.progress.push(line);
    }

    fn fail(&mut self, err: &KdoError) {
        error!("Push of {} failed while {}: {err}", self.component, self.stage);
        self.failed_at = Some(self.stage);
        self.stage = Stage::Failed;
        self.error = Some(err.to_string());
        self.hint = err.hint();
    }
}

/// Commands of one push, resolved during inspection.
struct PushCommands<'a> {
    init: Option<&'a Command>,
    build: Option<&'a Command>,
    run: Option<&'a Command>,
}

/// Drives pushes of one devfile against one backend.
pub struct Reconciler<'a> {
    /// Backend adapter.
    backend: &'a dyn Backend,
    /// Sync State and lock store.
    store: &'a dyn StateStore,
    /// Validated devfile.
    devfile: &'a Devfile,
    /// Local source root.
    context: &'a Path,
    /// Drift engine.
    diff_engine: DiffEngine,
    /// Bound for `watch_until_running`.
    watch_timeout: Duration,
}

impl<'a> Reconciler<'a> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(
        backend: &'a dyn Backend,
        store: &'a dyn StateStore,
        devfile: &'a Devfile,
        context: &'a Path,
    ) -> Self {
        Self {
            backend,
            store,
            devfile,
            context,
            diff_engine: DiffEngine::new(),
            watch_timeout: Duration::from_secs(DEFAULT_WATCH_TIMEOUT_SECS),
        }
    }

    /// Sets the bound for waiting on a running instance.
    #[must_use]
    pub const fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = timeout;
        self
    }

    /// Pushes the devfile and the source tree.
    ///
    /// Failures are recorded in the report rather than returned, together
    /// with the stage that failed and every progress line produced so far.
    pub async fn push(&self, options: &PushOptions) -> PushReport {
        let component = self.devfile.name.as_str();
        let mut report = PushReport::new(component);
        info!("Pushing component {component} to {}", self.backend.kind());

        let lock = match self.store.acquire_lock(component).await {
            Ok(lock) => lock,
            Err(err) => {
                report.fail(&err);
                return report;
            }
        };

        let result = self.run_pipeline(options, &mut report).await;

        if let Err(err) = self.store.release_lock(&lock).await {
            warn!("Failed to release push lock: {err}");
        }

        match result {
            Ok(()) => report.enter(Stage::Done),
            Err(err) => report.fail(&err),
        }
        report
    }

    async fn run_pipeline(&self, options: &PushOptions, report: &mut PushReport) -> Result<()> {
        let component = self.devfile.name.as_str();

        report.enter(Stage::Inspecting);
        let mut runner = CommandRunner::new(self.backend, self.devfile);
        let commands = self.resolve_commands(&runner, options)?;
        let observed = self.backend.observe(component).await?;
        let bindings = VolumeBindings::ensure(self.backend, self.devfile).await?;
        let desired = SpecBuilder::new(self.devfile, &bindings)
            .with_run_command(commands.run.map(|c| c.id.as_str()))
            .build()?;

        report.enter(Stage::Provisioning);
        match &observed {
            None => {
                report.note(format!("Creating component {component}"));
                self.backend.create_or_update(&desired).await?;
                report.created = true;
            }
            Some(current) => {
                let diff = self.diff_engine.compute_diff(&desired, current);
                if diff.has_drift() {
                    report.note(format!(
                        "Updating component {component}: {}",
                        diff.changed_aliases().join(", ")
                    ));
                    self.backend.create_or_update(&desired).await?;
                    report.updated = true;
                } else {
                    debug!("Component {component} matches the devfile");
                }
            }
        }
        let handle = self
            .backend
            .watch_until_running(&component_labels(component), self.watch_timeout)
            .await?;

        report.enter(Stage::Syncing);
        let container = self.devfile.source_container().ok_or_else(|| {
            InconsistentStateError::NoSourceContainer {
                component: component.to_string(),
            }
        })?;
        let force_full = options.force_build || report.created || report.updated;
        report.sync = FileSyncer::new(self.backend, self.store, component)
            .sync(self.context, SOURCE_MOUNT_PATH, &handle, container, force_full)
            .await?;

        if !report.sync.changed && !force_full {
            report.note("No file changes detected, skipping build");
            return Ok(());
        }

        report.enter(Stage::Executing);
        let result = self
            .run_commands(&mut runner, &commands, &handle, report.created)
            .await;
        report.progress.extend(runner.into_progress());
        if let Err(err) = result {
            // The synced tree was never built; the next push must start over.
            if let Err(clear) = self.store.clear_index().await {
                warn!("Failed to reset Sync State after a failed command: {clear}");
            }
            return Err(err);
        }

        report.note("Changes successfully pushed to component");
        Ok(())
    }

    /// Looks up every command this push will run before the backend is touched.
    fn resolve_commands(
        &self,
        runner: &CommandRunner<'a>,
        options: &PushOptions,
    ) -> Result<PushCommands<'a>> {
        for id in &self.devfile.events.post_start {
            runner.resolve_id(id)?;
        }
        let init = match self.devfile.default_command(GroupKind::Init) {
            Some(_) => Some(runner.resolve(GroupKind::Init, None)?),
            None => None,
        };
        let build = match options.build_command.as_deref() {
            Some(id) => Some(runner.resolve(GroupKind::Build, Some(id))?),
            None if self.devfile.default_command(GroupKind::Build).is_some() => {
                Some(runner.resolve(GroupKind::Build, None)?)
            }
            None => None,
        };
        let run = if options.skip_run {
            None
        } else {
            Some(runner.resolve(GroupKind::Run, options.run_command.as_deref())?)
        };
        Ok(PushCommands { init, build, run })
    }

    async fn run_commands(
        &self,
        runner: &mut CommandRunner<'a>,
        commands: &PushCommands<'a>,
        handle: &ComponentHandle,
        created: bool,
    ) -> Result<()> {
        if created {
            runner
                .run_events(&self.devfile.events.post_start, handle)
                .await?;
            if let Some(init) = commands.init {
                runner.run_resolved(GroupKind::Init, init, handle).await?;
            }
        }

        match commands.build {
            Some(build) => runner.run_resolved(GroupKind::Build, build, handle).await?,
            None => debug!("No build command in devfile"),
        }

        match commands.run {
            Some(run) => runner.run_resolved(GroupKind::Run, run, handle).await,
            None => {
                debug!("Skipping run command");
                Ok(())
            }
        }
    }

    /// Deletes the component, its volumes and the Sync State.
    ///
    /// The preStop events run first while the component is still running.
    /// Returns false if the backend had no such component.
    ///
    /// # Errors
    ///
    /// Returns the first failing preStop command, or the backend and state
    /// errors of the deletion. Nothing is deleted if a preStop command fails.
    pub async fn delete(&self) -> Result<bool> {
        let component = self.devfile.name.as_str();
        let Some(observed) = self.backend.observe(component).await? else {
            self.store.clear_index().await?;
            return Ok(false);
        };

        let pre_stop = &self.devfile.events.pre_stop;
        if observed.running && !pre_stop.is_empty() {
            info!("Running preStop events of {component}");
            let mut runner = CommandRunner::new(self.backend, self.devfile);
            runner.run_events(pre_stop, &observed.handle).await?;
        }

        self.backend.delete(component).await?;
        self.store.clear_index().await?;
        info!("Deleted component {component}");
        Ok(true)
    }

    /// Compares the devfile with the backend without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried or the devfile
    /// cannot be turned into a component spec.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        let component = self.devfile.name.as_str();
        info!("Checking for drift in {component}");

        let existing = self.backend.list_volumes(component).await?;
        let mut missing_volumes = Vec::new();
        let handles = self
            .devfile
            .volumes()
            .map(|(name, volume)| {
                let handle = existing
                    .iter()
                    .find(|v| v.storage_name == name)
                    .cloned()
                    .unwrap_or_else(|| {
                        missing_volumes.push(name.to_string());
                        VolumeHandle {
                            name: backing_name(component, name),
                            storage_name: name.to_string(),
                            size: Some(volume.size_or_default().to_string()),
                        }
                    });
                (name.to_string(), handle)
            })
            .collect();
        let bindings = VolumeBindings::from_handles(handles);
        let desired = SpecBuilder::new(self.devfile, &bindings).build()?;

        let Some(observed) = self.backend.observe(component).await? else {
            return Ok(DriftReport {
                component: component.to_string(),
                exists: false,
                running: false,
                has_drift: true,
                containers: desired
                    .containers
                    .iter()
                    .map(|c| ContainerDiff {
                        alias: c.alias.clone(),
                        diff_type: DiffType::Create,
                        details: Vec::new(),
                    })
                    .collect(),
                missing_volumes,
            });
        };

        let diff = self.diff_engine.compute_diff(&desired, &observed);
        Ok(DriftReport {
            component: component.to_string(),
            exists: true,
            running: observed.running,
            has_drift: diff.has_drift() || !missing_volumes.is_empty(),
            containers: diff.containers,
            missing_volumes,
        })
    }
}

/// Report of drift detection.
#[derive(Debug, Serialize)]
pub struct DriftReport {
    /// Component name.
    pub component: String,
    /// Whether the component exists on the backend.
    pub exists: bool,
    /// Whether it is running.
    pub running: bool,
    /// Whether a push would change anything.
    pub has_drift: bool,
    /// Per-container differences.
    pub containers: Vec<ContainerDiff>,
    /// Declared volumes with no backing volume yet.
    pub missing_volumes: Vec<String>,
}

impl DriftReport {
    /// Returns true if the component matches the devfile.
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.exists {
            return write!(f, "Component {} does not exist", self.component);
        }
        if !self.has_drift {
            return write!(f, "No drift detected - component {} is converged", self.component);
        }
        writeln!(f, "Drift detected in {}:", self.component)?;
        for container in self.containers.iter().filter(|c| c.diff_type != DiffType::NoChange) {
            writeln!(f, "  - {container}")?;
        }
        for volume in &self.missing_volumes {
            writeln!(f, "  - volume {volume} (missing)")?;
        }
        Ok(())
    }
}

impl fmt::Display for PushReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.progress {
            writeln!(f, "{line}")?;
        }
        match (&self.error, self.failed_at) {
            (Some(error), Some(stage)) => write!(f, "Push failed while {stage}: {error}"),
            _ => write!(f, "Push of {} finished", self.component),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::devfile::{
        Command, CommandKind, Component, ComponentKind, Container, Events, ExecCommand, Group,
        Volume, VolumeMount,
    };
    use crate::state::LocalStateStore;
    use tempfile::TempDir;

    fn exec(id: &str, line: &str, group: Option<GroupKind>) -> Command {
        Command {
            id: id.to_string(),
            kind: CommandKind::Exec(ExecCommand {
                component: "runtime".to_string(),
                command_line: line.to_string(),
                working_dir: None,
            }),
            group: group.map(|kind| Group {
                kind,
                is_default: true,
            }),
        }
    }

    fn devfile(commands: Vec<Command>) -> Devfile {
        Devfile {
            schema_version: "2.0.0".to_string(),
            name: "nodejs".to_string(),
            components: vec![
                Component {
                    name: "runtime".to_string(),
                    kind: ComponentKind::Container(Container {
                        image: "node:18".to_string(),
                        mount_sources: true,
                        volume_mounts: vec![VolumeMount {
                            name: "data".to_string(),
                            path: "/data".to_string(),
                        }],
                        ..Container::default()
                    }),
                },
                Component {
                    name: "data".to_string(),
                    kind: ComponentKind::Volume(Volume::default()),
                },
            ],
            commands,
            events: Events {
                post_start: vec!["setup".to_string()],
                ..Events::default()
            },
            ..Devfile::default()
        }
    }

    fn full_devfile() -> Devfile {
        devfile(vec![
            exec("setup", "echo setup", None),
            exec("install", "npm install", Some(GroupKind::Build)),
            exec("start", "npm start", Some(GroupKind::Run)),
        ])
    }

    fn context() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_first_push_creates_syncs_and_runs_in_order() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = full_devfile();

        let report = Reconciler::new(&backend, &store, &devfile, dir.path())
            .push(&PushOptions::default())
            .await;

        assert!(report.success(), "{report}");
        assert!(report.created);
        assert_eq!(report.sync.copied, 1);
        assert_eq!(
            backend.exec_lines(),
            vec![
                "/bin/sh -c echo setup",
                "/bin/sh -c npm install",
                "/opt/odo/bin/supervisord ctl stop devrun",
                "/opt/odo/bin/supervisord ctl start devrun",
            ]
        );
        assert_eq!(
            report.progress.last().map(String::as_str),
            Some("Changes successfully pushed to component")
        );
        assert_eq!(backend.volumes(), vec!["nodejs-data"]);
    }

    #[tokio::test]
    async fn test_second_push_without_changes_mutates_nothing() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = full_devfile();
        let reconciler = Reconciler::new(&backend, &store, &devfile, dir.path());

        assert!(reconciler.push(&PushOptions::default()).await.success());
        backend.reset_mutations();
        let execs_before = backend.execs().len();

        let report = reconciler.push(&PushOptions::default()).await;
        assert!(report.success(), "{report}");
        assert_eq!(backend.mutations(), 0);
        assert_eq!(backend.execs().len(), execs_before);
        assert!(!report.created && !report.updated);
        assert!(
            report
                .progress
                .contains(&"No file changes detected, skipping build".to_string())
        );
    }

    #[tokio::test]
    async fn test_changed_file_rebuilds_without_recreating() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = full_devfile();
        let reconciler = Reconciler::new(&backend, &store, &devfile, dir.path());

        assert!(reconciler.push(&PushOptions::default()).await.success());
        backend.reset_mutations();
        std::fs::write(dir.path().join("index.js"), "console.log(1)").unwrap();

        let report = reconciler.push(&PushOptions::default()).await;
        assert!(report.success(), "{report}");
        assert!(!report.created && !report.updated);
        assert_eq!(backend.mutations(), 1);
        assert_eq!(backend.copies().last().map(|c| c.1.as_str()), Some("/projects"));
        let lines = backend.exec_lines();
        assert_eq!(lines.iter().filter(|l| l.ends_with("echo setup")).count(), 1);
        assert_eq!(
            lines.last().map(String::as_str),
            Some("/opt/odo/bin/supervisord ctl start devrun")
        );
    }

    #[tokio::test]
    async fn test_image_change_updates_component() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = full_devfile();
        assert!(
            Reconciler::new(&backend, &store, &devfile, dir.path())
                .push(&PushOptions::default())
                .await
                .success()
        );

        let mut changed = full_devfile();
        if let ComponentKind::Container(c) = &mut changed.components[0].kind {
            c.image = "node:20".to_string();
        }
        let report = Reconciler::new(&backend, &store, &changed, dir.path())
            .push(&PushOptions::default())
            .await;

        assert!(report.success(), "{report}");
        assert!(report.updated);
        assert_eq!(backend.component("nodejs").unwrap().containers[0].image, "node:20");
        assert!(report.sync.changed);
    }

    #[tokio::test]
    async fn test_watch_timeout_fails_provisioning() {
        let dir = context();
        let backend = MemoryBackend::new();
        backend.never_run();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = full_devfile();

        let report = Reconciler::new(&backend, &store, &devfile, dir.path())
            .with_watch_timeout(Duration::from_secs(3))
            .push(&PushOptions::default())
            .await;

        assert_eq!(report.stage, Stage::Failed);
        assert_eq!(report.failed_at, Some(Stage::Provisioning));
        assert!(report.error.as_deref().unwrap().contains("Timed out after 3s"));
        assert!(report.hint.unwrap().contains("capacity"));
        assert!(backend.copies().is_empty());
    }

    #[tokio::test]
    async fn test_missing_run_command_fails() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = devfile(vec![
            exec("setup", "echo setup", None),
            exec("install", "npm install", Some(GroupKind::Build)),
        ]);

        let report = Reconciler::new(&backend, &store, &devfile, dir.path())
            .push(&PushOptions::default())
            .await;

        assert_eq!(report.failed_at, Some(Stage::Inspecting));
        assert!(
            report
                .error
                .as_deref()
                .unwrap()
                .contains("the command type \"run\" is not found")
        );
        assert_eq!(backend.mutations(), 0);
        assert!(backend.copies().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_build_override_fails_before_provisioning() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = full_devfile();
        let reconciler = Reconciler::new(&backend, &store, &devfile, dir.path());

        let options = PushOptions {
            build_command: Some("buildgarbage".to_string()),
            ..PushOptions::default()
        };
        let report = reconciler.push(&options).await;
        assert_eq!(report.failed_at, Some(Stage::Inspecting));
        assert!(report.error.as_deref().unwrap().contains("buildgarbage"));
        assert_eq!(backend.mutations(), 0);
        assert!(backend.component("nodejs").is_none());

        let report = reconciler.push(&PushOptions::default()).await;
        assert!(report.success(), "{report}");
        assert!(report.created);
        let lines = backend.exec_lines();
        assert!(lines.contains(&"/bin/sh -c npm install".to_string()));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("/opt/odo/bin/supervisord ctl start devrun")
        );
    }

    #[tokio::test]
    async fn test_skip_run_and_failing_build() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = full_devfile();
        let reconciler = Reconciler::new(&backend, &store, &devfile, dir.path());

        let options = PushOptions {
            skip_run: true,
            ..PushOptions::default()
        };
        assert!(reconciler.push(&options).await.success());
        assert!(!backend.exec_lines().iter().any(|l| l.contains("supervisord")));

        backend.fail_exec_containing("npm install");
        let options = PushOptions {
            force_build: true,
            ..PushOptions::default()
        };
        let report = reconciler.push(&options).await;
        assert_eq!(report.failed_at, Some(Stage::Executing));
        assert!(report.error.as_deref().unwrap().contains("install"));

        // Nothing changed locally, yet the failed build is attempted again.
        let runs_before = backend.exec_lines().len();
        let report = reconciler.push(&PushOptions::default()).await;
        assert_eq!(report.failed_at, Some(Stage::Executing));
        assert!(report.sync.changed);
        assert!(
            backend.exec_lines()[runs_before..]
                .iter()
                .any(|l| l.ends_with("npm install"))
        );
    }

    #[tokio::test]
    async fn test_push_without_source_container_is_inconsistent() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let mut devfile = full_devfile();
        if let ComponentKind::Container(c) = &mut devfile.components[0].kind {
            c.mount_sources = false;
        }

        let report = Reconciler::new(&backend, &store, &devfile, dir.path())
            .push(&PushOptions::default())
            .await;
        assert_eq!(report.failed_at, Some(Stage::Syncing));
        assert!(report.error.as_deref().unwrap().contains("mountSources"));
    }

    fn devfile_with_pre_stop() -> Devfile {
        let mut devfile = full_devfile();
        devfile.commands.push(exec("flush", "echo flush", None));
        devfile.events.pre_stop = vec!["flush".to_string()];
        devfile
    }

    #[tokio::test]
    async fn test_delete_runs_pre_stop_then_removes_everything() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = devfile_with_pre_stop();
        let reconciler = Reconciler::new(&backend, &store, &devfile, dir.path());
        assert!(reconciler.push(&PushOptions::default()).await.success());
        assert!(!backend.exec_lines().iter().any(|l| l.ends_with("echo flush")));

        assert!(reconciler.delete().await.unwrap());
        assert_eq!(
            backend.exec_lines().last().map(String::as_str),
            Some("/bin/sh -c echo flush")
        );
        assert!(backend.component("nodejs").is_none());
        assert!(backend.volumes().is_empty());
        assert!(store.load_index("nodejs").await.unwrap().is_none());

        assert!(!reconciler.delete().await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_pre_stop_keeps_component() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = devfile_with_pre_stop();
        let reconciler = Reconciler::new(&backend, &store, &devfile, dir.path());
        assert!(reconciler.push(&PushOptions::default()).await.success());

        backend.fail_exec_containing("echo flush");
        assert!(reconciler.delete().await.is_err());
        assert!(backend.component("nodejs").is_some());
        assert_eq!(backend.volumes(), vec!["nodejs-data"]);
    }

    #[tokio::test]
    async fn test_check_drift_reads_only() {
        let dir = context();
        let backend = MemoryBackend::new();
        let store = LocalStateStore::for_context(dir.path());
        let devfile = full_devfile();
        let reconciler = Reconciler::new(&backend, &store, &devfile, dir.path());

        let before = reconciler.check_drift().await.unwrap();
        assert!(!before.exists);
        assert!(before.has_drift);
        assert_eq!(before.missing_volumes, vec!["data"]);
        assert_eq!(backend.mutations(), 0);

        assert!(reconciler.push(&PushOptions::default()).await.success());
        let after = reconciler.check_drift().await.unwrap();
        assert!(after.exists && after.running);
        assert!(after.is_converged(), "{after}");
    }
}
