//! `kubectl` process driver.

use serde::de::DeserializeOwned;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

use crate::backend::ExecOutput;
use crate::error::{BackendError, Result};

/// Runs `kubectl` against one namespace.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: String,
    namespace: Option<String>,
}

impl Kubectl {
    /// Creates a driver for `binary`, scoped to `namespace` when given.
    #[must_use]
    pub fn new(binary: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            namespace,
        }
    }

    /// Full argument vector, namespace flag included.
    #[must_use]
    pub fn args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(namespace) = &self.namespace {
            full.push("--namespace");
            full.push(namespace.as_str());
        }
        full.extend_from_slice(args);
        full
    }

    /// Runs `kubectl` with optional stdin and captures its output.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the process cannot be spawned.
    pub async fn output(
        &self,
        operation: &str,
        resource: &str,
        args: &[&str],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput> {
        let full = self.args(args);
        trace!("{} {}", self.binary, full.join(" "));

        let spawn_error =
            |e: std::io::Error| BackendError::new(operation, resource, format!("{}: {e}", self.binary));

        let mut child = Command::new(&self.binary)
            .args(&full)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(&input).await.map_err(spawn_error)?;
            pipe.shutdown().await.map_err(spawn_error)?;
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;
        Ok(ExecOutput {
            exit_code: output.status.code().map_or(-1, i64::from),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Runs `kubectl` and fails on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns a backend error carrying stderr if the command fails.
    pub async fn run(
        &self,
        operation: &str,
        resource: &str,
        args: &[&str],
        stdin: Option<Vec<u8>>,
    ) -> Result<String> {
        let output = self.output(operation, resource, args, stdin).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(BackendError::new(operation, resource, output.stderr.trim().to_string()).into())
        }
    }

    /// Runs a `get ... -o json` and parses the result.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the command fails or prints invalid JSON.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        resource: &str,
        args: &[&str],
    ) -> Result<T> {
        let stdout = self.run(operation, resource, args, None).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| BackendError::new(operation, resource, format!("invalid JSON: {e}")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_flag_comes_first() {
        let kubectl = Kubectl::new("kubectl", Some("dev".to_string()));
        assert_eq!(
            kubectl.args(&["get", "pods"]),
            vec!["--namespace", "dev", "get", "pods"]
        );
        assert_eq!(Kubectl::new("kubectl", None).args(&["get"]), vec!["get"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_backend_error() {
        let kubectl = Kubectl::new("kdo-no-such-kubectl", None);
        let err = kubectl.run("get", "pods", &["get", "pods"], None).await.unwrap_err();
        assert!(matches!(err, crate::error::KdoError::Backend(ref e) if e.operation == "get"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_and_exit_code() {
        let sh = Kubectl::new("sh", None);
        let output = sh
            .output("exec", "sh", &["-c", "cat; exit 3"], Some(b"piped".to_vec()))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "piped");
    }
}
