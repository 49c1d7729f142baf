//! Volume bindings for one reconciliation pass.
//!
//! The map from volume component name to backing volume is built once, after
//! the cardinality check, and only read afterwards. Containers mounting the
//! same volume name all get the same backing volume.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::backend::{Backend, VolumeHandle, volume_labels};
use crate::devfile::Devfile;
use crate::error::{InconsistentStateError, Result};

/// Immutable volume name to backing volume mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeBindings {
    handles: BTreeMap<String, VolumeHandle>,
}

impl VolumeBindings {
    /// Checks existing volumes against the devfile and ensures every declared one.
    ///
    /// # Errors
    ///
    /// Returns an inconsistency error if the component has volumes the devfile
    /// does not declare, or several volumes for one declaration. Backend
    /// failures are passed through.
    pub async fn ensure(backend: &dyn Backend, devfile: &Devfile) -> Result<Self> {
        let component = devfile.name.as_str();
        let existing = backend.list_volumes(component).await?;
        Self::check_cardinality(devfile, &existing)?;

        let mut handles = BTreeMap::new();
        for (name, volume) in devfile.volumes() {
            let labels = volume_labels(component, name);
            let size = volume.size_or_default();
            let handle = backend
                .ensure_volume(&backing_name(component, name), size, &labels)
                .await?;
            debug!("Volume {name} is backed by {}", handle.name);
            handles.insert(name.to_string(), handle);
        }

        if !handles.is_empty() {
            info!("Ensured {} volume(s) for {component}", handles.len());
        }
        Ok(Self { handles })
    }

    /// Builds bindings from known handles.
    #[must_use]
    pub const fn from_handles(handles: BTreeMap<String, VolumeHandle>) -> Self {
        Self { handles }
    }

    fn check_cardinality(devfile: &Devfile, existing: &[VolumeHandle]) -> Result<()> {
        let declared: BTreeSet<&str> = devfile.volumes().map(|(name, _)| name).collect();

        let mut per_storage: BTreeMap<&str, usize> = BTreeMap::new();
        for volume in existing {
            *per_storage.entry(volume.storage_name.as_str()).or_default() += 1;
        }

        if let Some((volume, count)) = per_storage.iter().find(|(_, count)| **count > 1) {
            return Err(InconsistentStateError::DuplicateVolumes {
                component: devfile.name.clone(),
                volume: (*volume).to_string(),
                count: *count,
            }
            .into());
        }

        let unknown: Vec<String> = per_storage
            .keys()
            .filter(|name| !declared.contains(*name))
            .map(|name| (*name).to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(InconsistentStateError::VolumeCardinality {
                component: devfile.name.clone(),
                observed: existing.len(),
                declared: declared.len(),
                unknown,
            }
            .into());
        }
        Ok(())
    }

    /// Returns the backing volume of a volume component.
    #[must_use]
    pub fn get(&self, volume: &str) -> Option<&VolumeHandle> {
        self.handles.get(volume)
    }

    /// Returns the number of bound volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if no volumes are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Name of the backing resource for a volume component.
#[must_use]
pub fn backing_name(component: &str, volume: &str) -> String {
    format!("{component}-{volume}")
}
