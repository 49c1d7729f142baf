//! Error types for kdo.
//!
//! Every layer wraps failures with the operation and resource it was working
//! on and returns them; only the binary decides how to print them.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for kdo.
#[derive(Debug, Error)]
pub enum KdoError {
    /// The devfile could not be located or parsed.
    #[error("Devfile error: {0}")]
    Devfile(#[from] DevfileError),

    /// The manifest is structurally or referentially invalid.
    #[error("Invalid devfile: {0}")]
    Validation(#[from] ValidationError),

    /// Observed backend state contradicts the manifest.
    #[error("Inconsistent state: {0}")]
    InconsistentState(#[from] InconsistentStateError),

    /// A backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// No running instance appeared within the watch bound.
    #[error("Timed out after {timeout_secs}s waiting for a running instance matching {selector}")]
    Timeout {
        /// Label selector that was watched.
        selector: String,
        /// The bound that elapsed.
        timeout_secs: u64,
    },

    /// A lifecycle command failed.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// File synchronization failed.
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Sync State or push lock errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Tool configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading a devfile.
#[derive(Debug, Error)]
pub enum DevfileError {
    /// No devfile was found.
    #[error("Devfile not found: {path}")]
    NotFound {
        /// Path that was searched.
        path: PathBuf,
    },

    /// The devfile could not be parsed.
    #[error("Failed to parse devfile: {message}")]
    Parse {
        /// Description of the parse error.
        message: String,
    },

    /// The schema version is not understood.
    #[error("Unsupported devfile schema version: {version}")]
    UnsupportedVersion {
        /// The version that was found.
        version: String,
    },
}

/// Manifest validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The manifest declares no components at all.
    #[error("no components present")]
    NoComponents,

    /// The manifest declares no container components.
    #[error("kdo requires at least one component of type 'container' in devfile")]
    NoContainerComponent,

    /// Two volume components share a name.
    #[error("duplicate volume components present with the same name: {name}")]
    DuplicateVolume {
        /// The duplicated volume name.
        name: String,
    },

    /// A volume size is not a valid quantity.
    #[error("size {size} for volume component {name} is invalid")]
    InvalidVolumeSize {
        /// Volume component name.
        name: String,
        /// The rejected size string.
        size: String,
    },

    /// Volume mounts reference undeclared volumes.
    #[error(
        "unable to find the following volume mounts in devfile volume components: {}",
        .names.join(",")
    )]
    MissingVolumeMounts {
        /// Every dangling volume name.
        names: Vec<String>,
    },

    /// A container overrides an environment variable injected by kdo.
    #[error("env variable {name} is reserved and cannot be customized in component {component}")]
    ReservedEnv {
        /// The reserved name.
        name: String,
        /// The offending component.
        component: String,
    },

    /// A command is neither exec nor composite.
    #[error("command \"{id}\" must be of type \"exec\" or \"composite\"")]
    InvalidCommandType {
        /// Command id.
        id: String,
    },

    /// An exec command is missing a required field.
    #[error("exec command \"{id}\" must set a non-empty {field}")]
    MissingExecField {
        /// Command id.
        id: String,
        /// Missing field name.
        field: &'static str,
    },

    /// An exec command references a component that is not a container.
    #[error("the command \"{id}\" does not map to a container component ({component})")]
    ExecInvalidComponent {
        /// Command id.
        id: String,
        /// The unresolved component name.
        component: String,
    },

    /// A composite command belongs to the run group.
    #[error("composite commands of run kind are not supported currently (command \"{id}\")")]
    CompositeRunKind {
        /// Command id.
        id: String,
    },

    /// A composite command references an undeclared command.
    #[error("composite command \"{id}\" references command \"{missing}\" which is not declared")]
    CompositeMissingCommand {
        /// Composite command id.
        id: String,
        /// The unresolved sub-command id.
        missing: String,
    },

    /// A composite command references itself directly or transitively.
    #[error("composite command \"{id}\" references itself: {}", .path.join(" -> "))]
    CompositeCycle {
        /// Composite command id.
        id: String,
        /// The reference path that closes the cycle.
        path: Vec<String>,
    },

    /// Event ids that do not resolve to a declared command.
    #[error("{}", describe_invalid_events(.events))]
    InvalidEvents {
        /// Unresolved ids per event type (preStart, postStart, ...), in event order.
        events: Vec<(String, Vec<String>)>,
    },

    /// Two container components share an alias.
    #[error("duplicate container components present with the same name: {}", .names.join(", "))]
    DuplicateContainers {
        /// Every duplicated alias.
        names: Vec<String>,
    },

    /// Two commands share an id.
    #[error("duplicate commands present with the same id: {}", .ids.join(", "))]
    DuplicateCommands {
        /// Every duplicated id.
        ids: Vec<String>,
    },

    /// A container declares an environment variable more than once.
    #[error("duplicate env variables present: {}", .entries.join(", "))]
    DuplicateEnv {
        /// Every offender as `<container>.<NAME>`.
        entries: Vec<String>,
    },

    /// More than one default command exists for a group kind.
    #[error("multiple default {kind} commands found: {}", .ids.join(", "))]
    MultipleDefaults {
        /// The group kind.
        kind: String,
        /// The competing command ids.
        ids: Vec<String>,
    },
}

fn describe_invalid_events(events: &[(String, Vec<String>)]) -> String {
    events
        .iter()
        .map(|(event, ids)| {
            format!("{} does not map to a valid devfile command in {event} events", ids.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Backend state that contradicts the manifest.
#[derive(Debug, Error)]
pub enum InconsistentStateError {
    /// More than one volume matches a single declared volume.
    #[error(
        "found {count} volumes for storage {volume} of component {component}, expected at most one"
    )]
    DuplicateVolumes {
        /// Component name.
        component: String,
        /// Declared volume name.
        volume: String,
        /// How many matched.
        count: usize,
    },

    /// More volumes exist than the manifest declares.
    #[error(
        "component {component} has {observed} volumes but the devfile declares {declared}: {}",
        .unknown.join(", ")
    )]
    VolumeCardinality {
        /// Component name.
        component: String,
        /// Observed volume count.
        observed: usize,
        /// Declared volume count.
        declared: usize,
        /// Observed storage names with no declaration.
        unknown: Vec<String>,
    },

    /// More than one component instance matches the component labels.
    #[error("found {count} instances of component {component}, expected at most one")]
    DuplicateComponents {
        /// Component name.
        component: String,
        /// How many matched.
        count: usize,
    },

    /// File sync needs a container that mounts sources.
    #[error(
        "component {component} requires at least one component in a devfile to set 'mountSources: true'"
    )]
    NoSourceContainer {
        /// Component name.
        component: String,
    },
}

/// A failed backend call, tagged with what it was doing.
#[derive(Debug, Error)]
#[error("{operation} {resource} failed: {message}")]
pub struct BackendError {
    /// Operation being performed (create, exec, ...).
    pub operation: String,
    /// Resource the operation targeted.
    pub resource: String,
    /// Description of the failure.
    pub message: String,
}

impl BackendError {
    /// Creates a new backend error.
    #[must_use]
    pub fn new(
        operation: impl Into<String>,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// Lifecycle command errors.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command id does not resolve.
    #[error("the command \"{id}\" was not found in the devfile")]
    NotFound {
        /// Requested id.
        id: String,
    },

    /// No default command exists for a group kind.
    #[error("the command type \"{kind}\" is not found in the devfile")]
    DefaultNotFound {
        /// The group kind.
        kind: String,
    },

    /// The command is neither exec nor composite.
    #[error("command \"{id}\" must be of type \"exec\" or \"composite\"")]
    InvalidType {
        /// Command id.
        id: String,
    },

    /// The command's component has no running instance.
    #[error("component \"{component}\" of command \"{id}\" has no running instance")]
    ComponentMismatch {
        /// Command id.
        id: String,
        /// The component alias.
        component: String,
    },

    /// The remote process failed or the transport broke.
    #[error("command \"{id}\" failed in component \"{component}\": {message}")]
    ExecutionFailed {
        /// Command id.
        id: String,
        /// The component alias.
        component: String,
        /// Failure description.
        message: String,
    },

    /// A sub-command of a composite failed.
    #[error("composite command \"{composite}\" failed at \"{failed}\": {source}")]
    CompositeFailed {
        /// Composite command id.
        composite: String,
        /// The sub-command that failed.
        failed: String,
        /// The sub-command's error.
        #[source]
        source: Box<CommandError>,
    },
}

impl CommandError {
    /// Returns the id of the innermost failing command.
    #[must_use]
    pub fn failing_id(&self) -> &str {
        match self {
            Self::CompositeFailed { source, .. } => source.failing_id(),
            Self::NotFound { id }
            | Self::InvalidType { id }
            | Self::ComponentMismatch { id, .. }
            | Self::ExecutionFailed { id, .. } => id,
            Self::DefaultNotFound { kind } => kind,
        }
    }
}

/// File synchronization errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Walking the local tree failed.
    #[error("Failed to walk {path}: {message}")]
    Walk {
        /// Path being walked.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Building the archive failed.
    #[error("Failed to archive {path}: {message}")]
    Archive {
        /// Path being archived.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Copying the archive into the component failed.
    #[error("Failed to copy files to {remote}: {message}")]
    Copy {
        /// Remote target directory.
        remote: String,
        /// Description of the failure.
        message: String,
    },

    /// Removing a deleted path remotely failed.
    #[error("Failed to remove {path} remotely: {message}")]
    Remove {
        /// Remote path.
        path: String,
        /// Description of the failure.
        message: String,
    },
}

/// Sync State and lock errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The push lock is held by another process.
    #[error("Component {component} is locked by {holder} since {since}")]
    LockedByOther {
        /// Component name.
        component: String,
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },
}

/// Tool configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("Failed to parse {path}: {message}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// An override holds an invalid value.
    #[error("Invalid value {value:?} for {name}")]
    InvalidValue {
        /// Setting or variable name.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// Result type alias for kdo operations.
pub type Result<T> = std::result::Result<T, KdoError>;

impl KdoError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(selector: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            selector: selector.into(),
            timeout_secs,
        }
    }

    /// Returns a suggestion for the user, if this class of error has one.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Validation(_) | Self::Devfile(_) => Some("fix the devfile and push again"),
            Self::InconsistentState(_) => {
                Some("delete the component with `kdo delete` and push again")
            }
            Self::Timeout { .. } => Some("check cluster capacity and the image name"),
            Self::State(StateError::LockedByOther { .. }) => {
                Some("wait for the other push to finish, or remove .kdo/push.lock")
            }
            _ => None,
        }
    }
}

impl DevfileError {
    /// Creates a parse error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a corruption error.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}
