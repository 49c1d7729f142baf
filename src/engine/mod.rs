//! Reconciliation engine building blocks.
//!
//! [`VolumeBindings`] resolves the persistent volumes of a pass,
//! [`SpecBuilder`] derives the desired [`crate::backend::ComponentSpec`] from
//! the devfile, and [`DiffEngine`] compares it with what the backend reports.

mod diff;
mod spec_builder;
mod volumes;

pub use diff::{ComponentDiff, ContainerDiff, DiffDetail, DiffEngine, DiffType};
pub use spec_builder::SpecBuilder;
pub use volumes::{VolumeBindings, backing_name};
