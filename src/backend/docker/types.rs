//! Docker Engine API types.
//!
//! Only the fields kdo reads or writes are modeled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entry of `GET /containers/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    /// Container id.
    pub id: String,
    /// Lifecycle state (`running`, `exited`, ...).
    #[serde(default)]
    pub state: String,
    /// Labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ContainerSummary {
    /// Returns true if the container is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Response of `GET /containers/{id}/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    /// Container id.
    pub id: String,
    /// Creation config.
    pub config: InspectConfig,
    /// Host config.
    #[serde(default)]
    pub host_config: InspectHostConfig,
    /// Runtime state.
    pub state: InspectState,
    /// Mounts.
    #[serde(default)]
    pub mounts: Vec<MountPoint>,
}

/// `Config` of an inspected container.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectConfig {
    /// Image reference as given at creation.
    pub image: String,
    /// `NAME=value` strings, image defaults included.
    #[serde(default)]
    pub env: Option<Vec<String>>,
    /// Labels.
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

/// `HostConfig` of an inspected container.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectHostConfig {
    /// `port/proto` to host bindings.
    #[serde(default)]
    pub port_bindings: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
}

/// `State` of an inspected container.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectState {
    /// Whether the process is running.
    #[serde(default)]
    pub running: bool,
}

/// A mount of an inspected container.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountPoint {
    /// Mount type (`volume`, `bind`, ...).
    #[serde(rename = "Type", default)]
    pub kind: String,
    /// Volume name for volume mounts.
    #[serde(default)]
    pub name: Option<String>,
    /// Path inside the container.
    pub destination: String,
}

/// Host side of a port binding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    /// Host port; empty lets the daemon pick one.
    #[serde(default)]
    pub host_port: String,
}

/// Body of `POST /containers/create`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainerRequest {
    /// Image reference.
    pub image: String,
    /// Entrypoint override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Command arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    /// `NAME=value` strings.
    pub env: Vec<String>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Exposed `port/proto` keys.
    pub exposed_ports: BTreeMap<String, serde_json::Value>,
    /// Host config.
    pub host_config: CreateHostConfig,
}

/// `HostConfig` of a container being created.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateHostConfig {
    /// Volume mounts.
    pub mounts: Vec<Mount>,
    /// Port bindings.
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
    /// Memory limit in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
}

/// A volume mount of a container being created.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mount {
    /// Always `volume`.
    #[serde(rename = "Type")]
    pub kind: String,
    /// Volume name.
    pub source: String,
    /// Path inside the container.
    pub target: String,
}

impl Mount {
    /// A named volume mount.
    #[must_use]
    pub fn volume(source: &str, target: &str) -> Self {
        Self {
            kind: "volume".to_string(),
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

/// Response carrying an `Id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IdResponse {
    /// Created object id.
    pub id: String,
}

/// Response of `GET /volumes`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeList {
    /// Volumes; the daemon sends `null` when there are none.
    #[serde(default)]
    pub volumes: Option<Vec<VolumeInfo>>,
}

/// A Docker volume.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Labels.
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

/// Body of `POST /volumes/create`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateVolumeRequest {
    /// Volume name.
    pub name: String,
    /// Labels.
    pub labels: BTreeMap<String, String>,
}

/// Body of `POST /containers/{id}/exec`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecCreateRequest {
    /// Attach standard output.
    pub attach_stdout: bool,
    /// Attach standard error.
    pub attach_stderr: bool,
    /// Argument vector.
    pub cmd: Vec<String>,
}

/// Response of `GET /exec/{id}/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecInspect {
    /// Exit code, once the process ended.
    #[serde(default)]
    pub exit_code: Option<i64>,
}

/// Response of `POST /containers/{id}/wait`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitResponse {
    /// Exit code of the container process.
    pub status_code: i64,
}

/// Splits a multiplexed attach stream into stdout and stderr.
///
/// Each frame is an 8 byte header (stream type, three zero bytes, big-endian
/// length) followed by the payload. Trailing partial frames are dropped.
#[must_use]
pub fn demux(bytes: &[u8]) -> (String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut rest = bytes;

    while rest.len() >= 8 {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let Some(payload) = rest.get(8..8 + len) else {
            break;
        };
        match rest[0] {
            2 => stderr.extend_from_slice(payload),
            _ => stdout.extend_from_slice(payload),
        }
        rest = &rest[8 + len..];
    }

    (
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    )
}

/// Converts a Kubernetes memory quantity to bytes.
#[must_use]
pub fn memory_bytes(quantity: &str) -> Option<i64> {
    const UNITS: [(&str, i64); 8] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];
    let quantity = quantity.trim();
    for (suffix, factor) in UNITS {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return number.parse::<i64>().ok()?.checked_mul(factor);
        }
    }
    quantity.parse().ok()
}
