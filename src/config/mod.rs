//! Configuration module for kdo.
//!
//! This module resolves the tool's own settings (backend, namespace,
//! timeouts). The devfile is loaded separately by [`crate::devfile`].

mod loader;
mod settings;

pub use loader::{
    CONFIG_FILE, ConfigLoader, ENV_BACKEND, ENV_DOCKER_HOST, ENV_KUBECTL, ENV_NAMESPACE,
    ENV_WATCH_TIMEOUT, apply_env_overrides,
};
pub use settings::{ConfigFile, KdoConfig};
