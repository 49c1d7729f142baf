//! Lifecycle command execution.
//!
//! Composite commands are expanded depth-first, left to right, into a flat
//! list of exec leaves before anything runs. Each leaf remembers the chain of
//! composites it came from so a failure can be reported against every level.

use tracing::{debug, info, warn};

use crate::backend::{Backend, ComponentHandle, ExecRequest};
use crate::devfile::{Command, CommandKind, Devfile, ExecCommand, GroupKind};
use crate::error::{CommandError, Result, ValidationError};

use super::supervisor;

/// An exec command reached through zero or more composites.
#[derive(Debug)]
struct Leaf<'a> {
    id: &'a str,
    exec: &'a ExecCommand,
    chain: Vec<&'a str>,
}

/// Runs devfile commands against a running component.
pub struct CommandRunner<'a> {
    backend: &'a dyn Backend,
    devfile: &'a Devfile,
    progress: Vec<String>,
}

impl<'a> CommandRunner<'a> {
    /// Creates a runner.
    #[must_use]
    pub const fn new(backend: &'a dyn Backend, devfile: &'a Devfile) -> Self {
        Self {
            backend,
            devfile,
            progress: Vec::new(),
        }
    }

    /// Progress lines produced so far.
    #[must_use]
    pub fn progress(&self) -> &[String] {
        &self.progress
    }

    /// Consumes the runner, returning its progress lines.
    #[must_use]
    pub fn into_progress(self) -> Vec<String> {
        self.progress
    }

    /// Runs the command `id` as a one-shot execution.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] if the id does not resolve, the command is
    /// not runnable, or any leaf fails.
    pub async fn run(&mut self, id: &str, handle: &ComponentHandle) -> Result<()> {
        let command = self.resolve_id(id)?;
        self.execute(command, handle, false).await
    }

    /// Runs the default command of a group, or `override_id` if given.
    ///
    /// The run group restarts its command under supervisord instead of
    /// executing it directly.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::DefaultNotFound`] if the group has no default
    /// and no override is given, and the errors of [`Self::run`] otherwise.
    pub async fn run_group(
        &mut self,
        kind: GroupKind,
        override_id: Option<&str>,
        handle: &ComponentHandle,
    ) -> Result<()> {
        let command = self.resolve(kind, override_id)?;
        self.run_resolved(kind, command, handle).await
    }

    /// Resolves the command a group would run without executing anything.
    ///
    /// The command is expanded exactly as [`Self::run_group`] expands it, so
    /// unknown ids and unsupported kinds fail here.
    ///
    /// # Errors
    ///
    /// Same resolution errors as [`Self::run_group`].
    pub fn resolve(&self, kind: GroupKind, override_id: Option<&str>) -> Result<&'a Command> {
        match override_id {
            Some(id) => self.resolve_id(id),
            None => {
                let command = self.devfile.default_command(kind).ok_or_else(|| {
                    CommandError::DefaultNotFound {
                        kind: kind.to_string(),
                    }
                })?;
                self.expand(command, &mut Vec::new(), &mut Vec::new())?;
                Ok(command)
            }
        }
    }

    /// Resolves the command `id` without executing anything.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::NotFound`] or the expansion error of the command.
    pub fn resolve_id(&self, id: &str) -> Result<&'a Command> {
        let command = self
            .devfile
            .command(id)
            .ok_or_else(|| CommandError::NotFound { id: id.to_string() })?;
        self.expand(command, &mut Vec::new(), &mut Vec::new())?;
        Ok(command)
    }

    /// Runs a command obtained from [`Self::resolve`] as part of group `kind`.
    ///
    /// # Errors
    ///
    /// Returns the first failing leaf's error.
    pub async fn run_resolved(
        &mut self,
        kind: GroupKind,
        command: &'a Command,
        handle: &ComponentHandle,
    ) -> Result<()> {
        self.execute(command, handle, kind == GroupKind::Run).await
    }

    /// Runs event commands in declared order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing command and returns its error.
    pub async fn run_events(&mut self, ids: &[String], handle: &ComponentHandle) -> Result<()> {
        for id in ids {
            self.run(id, handle).await?;
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        command: &'a Command,
        handle: &ComponentHandle,
        supervised: bool,
    ) -> Result<()> {
        let mut leaves = Vec::new();
        self.expand(command, &mut Vec::new(), &mut leaves)?;

        for leaf in leaves {
            let line = format!("Executing {} command \"{}\"", leaf.id, leaf.exec.command_line);
            info!("{line}");
            self.progress.push(line);

            let result = if supervised && leaf.chain.is_empty() {
                self.restart(leaf.id, leaf.exec, handle).await
            } else {
                self.exec_leaf(leaf.id, leaf.exec, handle).await
            };
            if let Err(err) = result {
                return Err(wrap(&leaf.chain, leaf.id, err).into());
            }
        }
        Ok(())
    }

    fn expand(
        &self,
        command: &'a Command,
        chain: &mut Vec<&'a str>,
        leaves: &mut Vec<Leaf<'a>>,
    ) -> Result<()> {
        match &command.kind {
            CommandKind::Exec(exec) => {
                leaves.push(Leaf {
                    id: &command.id,
                    exec,
                    chain: chain.clone(),
                });
                Ok(())
            }
            CommandKind::Composite(composite) => {
                if chain.contains(&command.id.as_str()) {
                    let mut path: Vec<String> = chain.iter().map(ToString::to_string).collect();
                    path.push(command.id.clone());
                    return Err(ValidationError::CompositeCycle {
                        id: command.id.clone(),
                        path,
                    }
                    .into());
                }
                chain.push(&command.id);
                for child_id in &composite.commands {
                    let Some(child) = self.devfile.command(child_id) else {
                        let err = CommandError::NotFound {
                            id: child_id.clone(),
                        };
                        return Err(wrap(chain, child_id, err).into());
                    };
                    self.expand(child, chain, leaves)?;
                }
                chain.pop();
                Ok(())
            }
            CommandKind::Unsupported(kind) => {
                debug!("Command {} has unsupported kind {kind}", command.id);
                let err = CommandError::InvalidType {
                    id: command.id.clone(),
                };
                Err(wrap(chain, &command.id, err).into())
            }
        }
    }

    async fn exec_leaf(
        &self,
        id: &str,
        exec: &ExecCommand,
        handle: &ComponentHandle,
    ) -> std::result::Result<(), CommandError> {
        self.check_component(id, exec, handle)?;
        let request = ExecRequest::shell(
            &exec.component,
            &exec.command_line,
            exec.working_dir.as_deref(),
        );
        self.dispatch(id, &exec.component, handle, &request).await
    }

    async fn restart(
        &self,
        id: &str,
        exec: &ExecCommand,
        handle: &ComponentHandle,
    ) -> std::result::Result<(), CommandError> {
        self.check_component(id, exec, handle)?;
        let stop = supervisor::ctl(&exec.component, "stop");
        if let Err(err) = self.dispatch(id, &exec.component, handle, &stop).await {
            debug!("Ignoring stop failure of {id}: {err}");
        }
        let start = supervisor::ctl(&exec.component, "start");
        self.dispatch(id, &exec.component, handle, &start).await
    }

    fn check_component(
        &self,
        id: &str,
        exec: &ExecCommand,
        handle: &ComponentHandle,
    ) -> std::result::Result<(), CommandError> {
        if handle.has_container(&exec.component) {
            Ok(())
        } else {
            Err(CommandError::ComponentMismatch {
                id: id.to_string(),
                component: exec.component.clone(),
            })
        }
    }

    async fn dispatch(
        &self,
        id: &str,
        component: &str,
        handle: &ComponentHandle,
        request: &ExecRequest,
    ) -> std::result::Result<(), CommandError> {
        let failed = |message: String| CommandError::ExecutionFailed {
            id: id.to_string(),
            component: component.to_string(),
            message,
        };

        let output = self
            .backend
            .exec(handle, request)
            .await
            .map_err(|e| failed(e.to_string()))?;

        if output.success() {
            Ok(())
        } else {
            warn!("Command {id} exited with {}", output.exit_code);
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                format!("exit code {}", output.exit_code)
            } else {
                format!("exit code {}: {stderr}", output.exit_code)
            };
            Err(failed(message))
        }
    }
}

/// Wraps a leaf error once per enclosing composite, innermost first.
fn wrap(chain: &[&str], failed: &str, err: CommandError) -> CommandError {
    let mut failed = failed.to_string();
    let mut err = err;
    for composite in chain.iter().rev() {
        err = CommandError::CompositeFailed {
            composite: (*composite).to_string(),
            failed,
            source: Box::new(err),
        };
        failed = (*composite).to_string();
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ExecOutput, MockBackend};
    use crate::devfile::{CompositeCommand, Group};
    use crate::error::KdoError;
    use std::sync::{Arc, Mutex};

    fn exec(id: &str, component: &str, line: &str, group: Option<GroupKind>) -> Command {
        Command {
            id: id.to_string(),
            kind: CommandKind::Exec(ExecCommand {
                component: component.to_string(),
                command_line: line.to_string(),
                working_dir: Some("/projects".to_string()),
            }),
            group: group.map(|kind| Group {
                kind,
                is_default: true,
            }),
        }
    }

    fn composite(id: &str, children: &[&str]) -> Command {
        Command {
            id: id.to_string(),
            kind: CommandKind::Composite(CompositeCommand {
                commands: children.iter().map(ToString::to_string).collect(),
            }),
            group: None,
        }
    }

    fn devfile(commands: Vec<Command>) -> Devfile {
        Devfile {
            name: "nodejs".to_string(),
            commands,
            ..Devfile::default()
        }
    }

    fn handle() -> ComponentHandle {
        let mut handle = ComponentHandle {
            component: "nodejs".to_string(),
            id: "nodejs-0".to_string(),
            ..ComponentHandle::default()
        };
        handle
            .containers
            .insert("runtime".to_string(), "c1".to_string());
        handle
    }

    fn recording_backend(failing: Option<&'static str>) -> (MockBackend, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let mut backend = MockBackend::new();
        backend.expect_exec().returning(move |_, request| {
            let line = request.command.join(" ");
            recorded.lock().unwrap().push(line.clone());
            let exit_code = i64::from(failing.is_some_and(|f| line.contains(f)));
            Ok(ExecOutput {
                exit_code,
                stdout: String::new(),
                stderr: "boom".to_string(),
            })
        });
        (backend, calls)
    }

    #[tokio::test]
    async fn test_composite_runs_depth_first() {
        let d = devfile(vec![
            exec("install", "runtime", "npm install", None),
            exec("lint", "runtime", "npm run lint", None),
            exec("compile", "runtime", "npm run build", None),
            composite("check", &["install", "lint"]),
            composite("all", &["check", "compile"]),
        ]);
        let (backend, calls) = recording_backend(None);
        let mut runner = CommandRunner::new(&backend, &d);

        runner.run("all", &handle()).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].ends_with("npm install"));
        assert!(calls[1].ends_with("npm run lint"));
        assert!(calls[2].ends_with("npm run build"));
        assert_eq!(runner.progress().len(), 3);
    }

    #[tokio::test]
    async fn test_composite_fails_fast_and_names_the_failing_command() {
        let d = devfile(vec![
            exec("install", "runtime", "npm install", None),
            exec("lint", "runtime", "npm run lint", None),
            exec("compile", "runtime", "npm run build", None),
            composite("check", &["install", "lint"]),
            composite("all", &["check", "compile"]),
        ]);
        let (backend, calls) = recording_backend(Some("lint"));
        let mut runner = CommandRunner::new(&backend, &d);

        let err = runner.run("all", &handle()).await.unwrap_err();

        assert_eq!(calls.lock().unwrap().len(), 2);
        match err {
            KdoError::Command(
                ref outer @ CommandError::CompositeFailed {
                    ref composite,
                    ref failed,
                    ..
                },
            ) => {
                assert_eq!(composite, "all");
                assert_eq!(failed, "check");
                assert_eq!(outer.failing_id(), "lint");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_default_run_command() {
        let d = devfile(vec![exec("build", "runtime", "make", Some(GroupKind::Build))]);
        let backend = MockBackend::new();
        let mut runner = CommandRunner::new(&backend, &d);

        let err = runner
            .run_group(GroupKind::Run, None, &handle())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KdoError::Command(CommandError::DefaultNotFound { ref kind }) if kind == "run"
        ));
    }

    #[test]
    fn test_resolve_checks_without_executing() {
        let mut unsupported = exec("deploy", "runtime", "", None);
        unsupported.kind = CommandKind::Unsupported("apply".to_string());
        let d = devfile(vec![
            exec("install", "runtime", "npm install", Some(GroupKind::Build)),
            composite("all", &["install", "deploy"]),
            unsupported,
        ]);
        let backend = MockBackend::new();
        let runner = CommandRunner::new(&backend, &d);

        let build = runner.resolve(GroupKind::Build, None).unwrap();
        assert_eq!(build.id, "install");
        assert!(matches!(
            runner.resolve(GroupKind::Build, Some("garbage")),
            Err(KdoError::Command(CommandError::NotFound { ref id })) if id == "garbage"
        ));
        assert!(matches!(
            runner.resolve(GroupKind::Run, None),
            Err(KdoError::Command(CommandError::DefaultNotFound { ref kind })) if kind == "run"
        ));
        assert!(matches!(
            runner.resolve_id("all"),
            Err(KdoError::Command(CommandError::CompositeFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_and_invalid_type() {
        let mut unsupported = exec("deploy", "runtime", "", None);
        unsupported.kind = CommandKind::Unsupported("apply".to_string());
        let d = devfile(vec![unsupported]);
        let backend = MockBackend::new();
        let mut runner = CommandRunner::new(&backend, &d);

        let err = runner.run("nope", &handle()).await.unwrap_err();
        assert!(matches!(err, KdoError::Command(CommandError::NotFound { .. })));

        let err = runner.run("deploy", &handle()).await.unwrap_err();
        assert!(matches!(err, KdoError::Command(CommandError::InvalidType { .. })));
    }

    #[tokio::test]
    async fn test_component_without_instance_is_a_mismatch() {
        let d = devfile(vec![exec("build", "tools", "make", Some(GroupKind::Build))]);
        let backend = MockBackend::new();
        let mut runner = CommandRunner::new(&backend, &d);

        let err = runner
            .run_group(GroupKind::Build, None, &handle())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KdoError::Command(CommandError::ComponentMismatch { ref component, .. }) if component == "tools"
        ));
    }

    #[tokio::test]
    async fn test_run_group_restarts_under_supervisord() {
        let d = devfile(vec![exec("run", "runtime", "npm start", Some(GroupKind::Run))]);
        let (backend, calls) = recording_backend(Some("ctl stop"));
        let mut runner = CommandRunner::new(&backend, &d);

        runner
            .run_group(GroupKind::Run, None, &handle())
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("ctl stop devrun"));
        assert!(calls[1].contains("ctl start devrun"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_execution_failure() {
        let d = devfile(vec![exec("build", "runtime", "make", Some(GroupKind::Build))]);
        let mut backend = MockBackend::new();
        backend.expect_exec().returning(|_, _| {
            Err(crate::error::BackendError::new("exec", "runtime", "connection reset").into())
        });
        let mut runner = CommandRunner::new(&backend, &d);

        let err = runner.run("build", &handle()).await.unwrap_err();
        assert!(matches!(
            err,
            KdoError::Command(CommandError::ExecutionFailed { ref message, .. }) if message.contains("connection reset")
        ));
    }

    #[test]
    fn test_wrap_nests_innermost_first() {
        let err = wrap(
            &["outer", "inner"],
            "leaf",
            CommandError::NotFound {
                id: "leaf".to_string(),
            },
        );
        assert_eq!(err.failing_id(), "leaf");
        assert!(matches!(
            err,
            CommandError::CompositeFailed { ref composite, ref failed, .. } if composite == "outer" && failed == "inner"
        ));
    }
}
