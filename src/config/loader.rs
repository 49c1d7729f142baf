//! Layered configuration loading.
//!
//! Values are applied in this order, later layers winning:
//! built-in defaults, `~/.kdo/config.yaml`, `<context>/.kdo/config.yaml`,
//! `<context>/.env`, then the process environment. CLI flags are applied by
//! the binary on top of the result.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::backend::BackendKind;
use crate::error::{ConfigError, Result};
use crate::state::STATE_DIR;

use super::settings::{ConfigFile, KdoConfig};

/// Configuration file name inside a `.kdo` directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Selects the backend.
pub const ENV_BACKEND: &str = "KDO_BACKEND";
/// Kubernetes namespace.
pub const ENV_NAMESPACE: &str = "KDO_NAMESPACE";
/// `kubectl` binary.
pub const ENV_KUBECTL: &str = "KDO_KUBECTL";
/// Docker Engine endpoint.
pub const ENV_DOCKER_HOST: &str = "DOCKER_HOST";
/// Watch bound in seconds.
pub const ENV_WATCH_TIMEOUT: &str = "KDO_WATCH_TIMEOUT";

/// Loads [`KdoConfig`] for one context directory.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Directory holding the user-wide `config.yaml`.
    global_dir: Option<PathBuf>,
    /// Project context directory.
    context: PathBuf,
}

impl ConfigLoader {
    /// Creates a loader for `context`, using `~/.kdo` as the global directory.
    #[must_use]
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            global_dir: dirs::home_dir().map(|home| home.join(STATE_DIR)),
            context: context.into(),
        }
    }

    /// Replaces the global directory; `None` disables the global layer.
    #[must_use]
    pub fn with_global_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.global_dir = dir;
        self
    }

    /// Resolves the configuration.
    ///
    /// `env` looks up process environment variables; entries of the
    /// context's `.env` are used for names it does not know.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a file cannot be parsed or an
    /// override holds an invalid value.
    pub fn load(&self, env: impl Fn(&str) -> Option<String>) -> Result<KdoConfig> {
        let mut config = KdoConfig::default();

        let global = self.global_dir.as_ref().map(|dir| dir.join(CONFIG_FILE));
        let project = self.context.join(STATE_DIR).join(CONFIG_FILE);
        for path in global.iter().chain(std::iter::once(&project)) {
            if let Some(file) = read_file(path)? {
                info!("Loaded configuration from {}", path.display());
                config.merge(file);
            }
        }

        let dotenv = self.dotenv()?;
        apply_env_overrides(&mut config, |name| {
            env(name).or_else(|| dotenv.get(name).cloned())
        })?;

        debug!("Resolved configuration: {config:?}");
        Ok(config)
    }

    /// Reads `<context>/.env` without touching the process environment.
    fn dotenv(&self) -> Result<BTreeMap<String, String>> {
        let path = self.context.join(".env");
        if !path.exists() {
            debug!(".env file not found at: {}", path.display());
            return Ok(BTreeMap::new());
        }

        let parse_error = |e: dotenvy::Error| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        };
        let mut values = BTreeMap::new();
        for entry in dotenvy::from_path_iter(&path).map_err(parse_error)? {
            let (key, value) = entry.map_err(parse_error)?;
            values.insert(key, value);
        }
        info!("Loaded {} value(s) from {}", values.len(), path.display());
        Ok(values)
    }
}

fn read_file(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Some(ConfigFile::default()));
    }
    let file = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(Some(file))
}

/// Applies `KDO_*` and `DOCKER_HOST` overrides.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] for an unknown backend or a
/// non-numeric timeout.
pub fn apply_env_overrides(
    config: &mut KdoConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let invalid = |name: &str, value: String| ConfigError::InvalidValue {
        name: name.to_string(),
        value,
    };

    if let Some(value) = lookup(ENV_BACKEND) {
        debug!("Overriding backend from {ENV_BACKEND}");
        config.backend = match value.to_lowercase().as_str() {
            "kubernetes" | "kube" | "k8s" => BackendKind::Kubernetes,
            "docker" => BackendKind::Docker,
            _ => return Err(invalid(ENV_BACKEND, value).into()),
        };
    }
    if let Some(namespace) = lookup(ENV_NAMESPACE) {
        debug!("Overriding namespace from {ENV_NAMESPACE}");
        config.namespace = Some(namespace);
    }
    if let Some(kubectl) = lookup(ENV_KUBECTL) {
        config.kubectl = kubectl;
    }
    if let Some(host) = lookup(ENV_DOCKER_HOST) {
        config.docker_host = host;
    }
    if let Some(value) = lookup(ENV_WATCH_TIMEOUT) {
        config.watch_timeout_secs = value
            .trim()
            .parse()
            .map_err(|_| invalid(ENV_WATCH_TIMEOUT, value.clone()))?;
    }
    Ok(())
}
