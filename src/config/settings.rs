//! Tool settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::BackendKind;
use crate::backend::docker::DEFAULT_DOCKER_HOST;
use crate::backend::kube::DEFAULT_KUBECTL;
use crate::reconciler::DEFAULT_WATCH_TIMEOUT_SECS;
use crate::runner::supervisor::DEFAULT_BOOTSTRAP_IMAGE;

/// Resolved `kdo` settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KdoConfig {
    /// Backend used for pushes.
    pub backend: BackendKind,
    /// Kubernetes namespace; the current context's namespace when unset.
    pub namespace: Option<String>,
    /// `kubectl` binary.
    pub kubectl: String,
    /// Docker Engine endpoint.
    pub docker_host: String,
    /// Bound for waiting on a running instance, in seconds.
    pub watch_timeout_secs: u64,
    /// Image carrying supervisord.
    pub bootstrap_image: String,
}

impl Default for KdoConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            namespace: None,
            kubectl: DEFAULT_KUBECTL.to_string(),
            docker_host: DEFAULT_DOCKER_HOST.to_string(),
            watch_timeout_secs: DEFAULT_WATCH_TIMEOUT_SECS,
            bootstrap_image: DEFAULT_BOOTSTRAP_IMAGE.to_string(),
        }
    }
}

impl KdoConfig {
    /// Watch bound as a duration.
    #[must_use]
    pub const fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }

    /// Overlays every value set in `file`.
    pub fn merge(&mut self, file: ConfigFile) {
        if let Some(backend) = file.backend {
            self.backend = backend;
        }
        if file.namespace.is_some() {
            self.namespace = file.namespace;
        }
        if let Some(kubectl) = file.kubectl {
            self.kubectl = kubectl;
        }
        if let Some(docker_host) = file.docker_host {
            self.docker_host = docker_host;
        }
        if let Some(secs) = file.watch_timeout_secs {
            self.watch_timeout_secs = secs;
        }
        if let Some(image) = file.bootstrap_image {
            self.bootstrap_image = image;
        }
    }
}

/// Settings as written in a `config.yaml`; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Backend.
    #[serde(default)]
    pub backend: Option<BackendKind>,
    /// Namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// `kubectl` binary.
    #[serde(default)]
    pub kubectl: Option<String>,
    /// Docker Engine endpoint.
    #[serde(default)]
    pub docker_host: Option<String>,
    /// Watch bound in seconds.
    #[serde(default)]
    pub watch_timeout_secs: Option<u64>,
    /// supervisord image.
    #[serde(default)]
    pub bootstrap_image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KdoConfig::default();
        assert_eq!(config.backend, BackendKind::Kubernetes);
        assert_eq!(config.watch_timeout(), Duration::from_secs(10));
        assert_eq!(config.kubectl, "kubectl");
        assert!(config.bootstrap_image.contains("odo-init-image"));
    }

    #[test]
    fn test_merge_keeps_unset_values() {
        let mut config = KdoConfig::default();
        let file: ConfigFile = serde_yaml::from_str("backend: docker\nwatch_timeout_secs: 30\n").unwrap();
        config.merge(file);

        assert_eq!(config.backend, BackendKind::Docker);
        assert_eq!(config.watch_timeout_secs, 30);
        assert_eq!(config.docker_host, DEFAULT_DOCKER_HOST);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(serde_yaml::from_str::<ConfigFile>("backnd: docker\n").is_err());
    }
}
