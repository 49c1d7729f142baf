//! Supervision of the long-running run command.
//!
//! The container hosting the run command starts supervisord instead of its
//! own process. supervisord reads the command line from the environment, so
//! restarting after a code change is a `ctl stop` plus `ctl start` and never
//! recreates the container.

use crate::backend::{ContainerSpec, ExecRequest};
use crate::devfile::{EnvVar, ExecCommand};

/// Mount path of the shared supervisord volume.
pub const SUPERVISORD_MOUNT_PATH: &str = "/opt/odo/";

/// supervisord binary inside the shared volume.
pub const SUPERVISORD_BINARY: &str = "/opt/odo/bin/supervisord";

/// supervisord configuration inside the shared volume.
pub const SUPERVISORD_CONF: &str = "/opt/odo/conf/devfile-supervisor.conf";

/// Program name of the run command in the supervisord configuration.
pub const SUPERVISORD_PROGRAM: &str = "devrun";

/// Environment variable carrying the run command line.
pub const ENV_COMMAND_RUN: &str = "ODO_COMMAND_RUN";

/// Environment variable carrying the run command working directory.
pub const ENV_COMMAND_RUN_WORKING_DIR: &str = "ODO_COMMAND_RUN_WORKING_DIR";

/// Image that carries supervisord under [`BOOTSTRAP_SOURCE_DIR`].
pub const DEFAULT_BOOTSTRAP_IMAGE: &str =
    "registry.access.redhat.com/openshiftdo/odo-init-image-rhel7:1.1.2";

/// Directory of the bootstrap image copied into the shared volume.
pub const BOOTSTRAP_SOURCE_DIR: &str = "/opt/odo-init/";

/// Command that copies supervisord from the bootstrap image into the volume.
#[must_use]
pub fn bootstrap_command() -> Vec<String> {
    vec![
        "/usr/bin/cp".to_string(),
        "-r".to_string(),
        format!("{BOOTSTRAP_SOURCE_DIR}."),
        SUPERVISORD_MOUNT_PATH.to_string(),
    ]
}

/// Prepares a container to host the run command under supervisord.
///
/// A container that declares its own entrypoint keeps it; the environment
/// and the supervisord mount are added either way.
pub fn inject(container: &mut ContainerSpec, run: &ExecCommand) {
    if container.command.is_empty() && container.args.is_empty() {
        container.command = vec![SUPERVISORD_BINARY.to_string()];
        container.args = vec!["-c".to_string(), SUPERVISORD_CONF.to_string()];
    }

    container
        .env
        .push(EnvVar::new(ENV_COMMAND_RUN, run.command_line.clone()));
    if let Some(dir) = &run.working_dir {
        container
            .env
            .push(EnvVar::new(ENV_COMMAND_RUN_WORKING_DIR, dir.clone()));
    }
    container.supervised = true;
}

/// Builds a `supervisord ctl` invocation for the run program.
#[must_use]
pub fn ctl(container: &str, action: &str) -> ExecRequest {
    ExecRequest::args(
        container,
        &[SUPERVISORD_BINARY, "ctl", action, SUPERVISORD_PROGRAM],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> ExecCommand {
        ExecCommand {
            component: "runtime".to_string(),
            command_line: "npm start".to_string(),
            working_dir: Some("/projects/app".to_string()),
        }
    }

    #[test]
    fn test_empty_entrypoint_is_overridden() {
        let mut container = ContainerSpec {
            alias: "runtime".to_string(),
            ..ContainerSpec::default()
        };
        inject(&mut container, &run());

        assert_eq!(container.command, vec![SUPERVISORD_BINARY]);
        assert_eq!(container.args, vec!["-c", SUPERVISORD_CONF]);
        assert!(container.supervised);
        assert!(container.env.contains(&EnvVar::new(ENV_COMMAND_RUN, "npm start")));
        assert!(
            container
                .env
                .contains(&EnvVar::new(ENV_COMMAND_RUN_WORKING_DIR, "/projects/app"))
        );
    }

    #[test]
    fn test_declared_entrypoint_is_kept() {
        let mut container = ContainerSpec {
            alias: "runtime".to_string(),
            command: vec!["tail".to_string()],
            args: vec!["-f".to_string(), "/dev/null".to_string()],
            ..ContainerSpec::default()
        };
        inject(&mut container, &run());

        assert_eq!(container.command, vec!["tail"]);
        assert_eq!(container.args, vec!["-f", "/dev/null"]);
        assert!(container.supervised);
        assert_eq!(container.env.len(), 2);
    }

    #[test]
    fn test_ctl_request() {
        let request = ctl("runtime", "start");
        assert_eq!(
            request.command,
            vec![SUPERVISORD_BINARY, "ctl", "start", SUPERVISORD_PROGRAM]
        );
    }
}
