//! Lifecycle command runner.
//!
//! Resolves devfile commands by id or by group, expands composites and
//! dispatches every exec leaf through the [`crate::backend::Backend`].

mod command;
pub mod supervisor;

pub use command::CommandRunner;
