//! Devfile module.
//!
//! This module handles everything about the manifest:
//! - Loading `devfile.yaml` and translating older schemas
//! - The version-agnostic model the engine works on
//! - Static validation before anything touches a backend

mod parser;
mod spec;
mod v1;
mod validator;

pub use parser::{DEFAULT_DEVFILE_NAMES, DevfileParser, find_devfile};
pub use spec::{
    Command, CommandKind, Component, ComponentKind, CompositeCommand, Container, DEFAULT_VOLUME_SIZE,
    Devfile, Endpoint, EnvVar, Events, ExecCommand, Group, GroupKind, Project, Volume, VolumeMount,
};
pub use validator::{
    DevfileValidator, ENV_PROJECT_SOURCE, ENV_PROJECTS_ROOT, RESERVED_ENV_NAMES, is_valid_quantity,
};
