//! Docker Engine HTTP API client.

use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

use crate::backend::{ExecOutput, Labels};
use crate::error::{BackendError, ConfigError, Result};

use super::types::{
    ContainerInspect, ContainerSummary, CreateContainerRequest, CreateVolumeRequest,
    ExecCreateRequest, ExecInspect, IdResponse, VolumeInfo, VolumeList, WaitResponse, demux,
};

/// Daemon address used when `DOCKER_HOST` is unset.
pub const DEFAULT_DOCKER_HOST: &str = "tcp://localhost:2375";

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Docker Engine API client.
#[derive(Debug, Clone)]
pub struct DockerClient {
    client: Client,
    base_url: String,
}

impl DockerClient {
    /// Creates a client for a `DOCKER_HOST` style address.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unsupported schemes and a backend
    /// error if the HTTP client cannot be built.
    pub fn new(host: &str) -> Result<Self> {
        let base_url = Self::endpoint(host)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| BackendError::new("connect", &base_url, e.to_string()))?;
        debug!("Using Docker Engine at {base_url}");
        Ok(Self { client, base_url })
    }

    /// Maps `tcp://host:port` to `http://host:port`; http(s) URLs pass through.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for any other scheme.
    pub fn endpoint(host: &str) -> Result<String> {
        let host = host.trim().trim_end_matches('/');
        if let Some(rest) = host.strip_prefix("tcp://") {
            return Ok(format!("http://{rest}"));
        }
        if host.starts_with("http://") || host.starts_with("https://") {
            return Ok(host.to_string());
        }
        Err(ConfigError::InvalidValue {
            name: "DOCKER_HOST".to_string(),
            value: host.to_string(),
        }
        .into())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, operation: &str, resource: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::new(operation, resource, format!("request failed: {e}")))?;

        let status = response.status();
        trace!("{operation} {resource}: {status}");
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(body);
        Err(BackendError::new(operation, resource, format!("{}: {message}", status.as_u16())).into())
    }

    async fn json<T: DeserializeOwned>(operation: &str, resource: &str, response: Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| BackendError::new(operation, resource, format!("invalid response: {e}")).into())
    }

    fn label_filter(labels: &Labels, keys: &[&str]) -> String {
        let mut values: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        values.extend(keys.iter().map(ToString::to_string));
        serde_json::json!({ "label": values }).to_string()
    }

    /// Lists containers, stopped ones included, carrying every label.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn list_containers(&self, labels: &Labels) -> Result<Vec<ContainerSummary>> {
        let filters = Self::label_filter(labels, &[]);
        let request = self
            .client
            .get(self.url("/containers/json"))
            .query(&[("all", "true"), ("filters", filters.as_str())]);
        let response = self.send("list", "containers", request).await?;
        Self::json("list", "containers", response).await
    }

    /// Inspects a container.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        let request = self.client.get(self.url(&format!("/containers/{id}/json")));
        let response = self.send("inspect", id, request).await?;
        Self::json("inspect", id, response).await
    }

    /// Creates a container and returns its id.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn create_container(&self, name: &str, body: &CreateContainerRequest) -> Result<String> {
        let request = self
            .client
            .post(self.url("/containers/create"))
            .query(&[("name", name)])
            .json(body);
        let response = self.send("create", name, request).await?;
        let created: IdResponse = Self::json("create", name, response).await?;
        Ok(created.id)
    }

    /// Starts a container; starting a running one is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn start_container(&self, id: &str) -> Result<()> {
        let request = self.client.post(self.url(&format!("/containers/{id}/start")));
        self.send("start", id, request).await?;
        Ok(())
    }

    /// Blocks until a container exits and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn wait_container(&self, id: &str) -> Result<i64> {
        let request = self.client.post(self.url(&format!("/containers/{id}/wait")));
        let response = self.send("wait", id, request).await?;
        let waited: WaitResponse = Self::json("wait", id, response).await?;
        Ok(waited.status_code)
    }

    /// Force-removes a container.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn remove_container(&self, id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.url(&format!("/containers/{id}")))
            .query(&[("force", "true")]);
        self.send("remove", id, request).await?;
        Ok(())
    }

    /// Returns true if the image is present locally.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.url(&format!("/images/{image}/json")))
            .send()
            .await
            .map_err(|e| BackendError::new("inspect", image, format!("request failed: {e}")))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(BackendError::new("inspect", image, format!("unexpected status {status}")).into()),
        }
    }

    /// Pulls an image.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the pull fails.
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        let request = self
            .client
            .post(self.url("/images/create"))
            .query(&[("fromImage", image)]);
        let response = self.send("pull", image, request).await?;
        let progress = response
            .text()
            .await
            .map_err(|e| BackendError::new("pull", image, e.to_string()))?;
        if let Some(error) = progress
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .find_map(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        {
            return Err(BackendError::new("pull", image, error).into());
        }
        Ok(())
    }

    /// Lists volumes carrying every label and every label key in `keys`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn list_volumes(&self, labels: &Labels, keys: &[&str]) -> Result<Vec<VolumeInfo>> {
        let request = self
            .client
            .get(self.url("/volumes"))
            .query(&[("filters", Self::label_filter(labels, keys))]);
        let response = self.send("list", "volumes", request).await?;
        let list: VolumeList = Self::json("list", "volumes", response).await?;
        Ok(list.volumes.unwrap_or_default())
    }

    /// Creates a named volume.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn create_volume(&self, name: &str, labels: &Labels) -> Result<VolumeInfo> {
        let body = CreateVolumeRequest {
            name: name.to_string(),
            labels: labels.clone(),
        };
        let request = self.client.post(self.url("/volumes/create")).json(&body);
        let response = self.send("create", name, request).await?;
        Self::json("create", name, response).await
    }

    /// Removes a volume.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn remove_volume(&self, name: &str) -> Result<()> {
        let request = self.client.delete(self.url(&format!("/volumes/{name}")));
        self.send("remove", name, request).await?;
        Ok(())
    }

    /// Runs a command in a container and collects its output.
    ///
    /// # Errors
    ///
    /// Returns a backend error if any of the exec calls fail.
    pub async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput> {
        let body = ExecCreateRequest {
            attach_stdout: true,
            attach_stderr: true,
            cmd: cmd.to_vec(),
        };
        let request = self
            .client
            .post(self.url(&format!("/containers/{id}/exec")))
            .json(&body);
        let response = self.send("exec", id, request).await?;
        let exec: IdResponse = Self::json("exec", id, response).await?;

        let request = self
            .client
            .post(self.url(&format!("/exec/{}/start", exec.id)))
            .json(&serde_json::json!({ "Detach": false, "Tty": false }));
        let response = self.send("exec", id, request).await?;
        let stream = response
            .bytes()
            .await
            .map_err(|e| BackendError::new("exec", id, format!("stream broken: {e}")))?;
        let (stdout, stderr) = demux(&stream);

        let request = self.client.get(self.url(&format!("/exec/{}/json", exec.id)));
        let response = self.send("exec", id, request).await?;
        let inspect: ExecInspect = Self::json("exec", id, response).await?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    /// Extracts a tar archive into `path` of a container.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn put_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        let request = self
            .client
            .put(self.url(&format!("/containers/{id}/archive")))
            .query(&[("path", path)])
            .header(header::CONTENT_TYPE, "application/x-tar")
            .body(archive);
        self.send("copy", id, request).await?;
        Ok(())
    }

    /// Returns stdout and stderr of a container.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the daemon call fails.
    pub async fn logs(&self, id: &str) -> Result<String> {
        let request = self
            .client
            .get(self.url(&format!("/containers/{id}/logs")))
            .query(&[("stdout", "true"), ("stderr", "true")]);
        let response = self.send("logs", id, request).await?;
        let stream = response
            .bytes()
            .await
            .map_err(|e| BackendError::new("logs", id, e.to_string()))?;
        let (stdout, stderr) = demux(&stream);
        Ok(stdout + &stderr)
    }
}
