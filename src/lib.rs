// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # kdo
//!
//! Reconciles devfile manifests into running development containers and
//! keeps a local source tree in sync with them.
//!
//! ## Overview
//!
//! A devfile declares container components, volumes and lifecycle commands.
//! `kdo push` turns it into a running component on Kubernetes or Docker:
//!
//! - Ensure one persistent volume per declared volume component
//! - Create the component, or update only the containers that drifted
//! - Push the files that changed since the last successful sync
//! - Run the init, build and run commands, keeping the run command under
//!   supervisord so it can be restarted without recreating the container
//!
//! ## Architecture
//!
//! Every push walks the same pipeline:
//!
//! 1. **Inspecting**: observe the component and check its volumes
//! 2. **Provisioning**: create or update it, then wait until it runs
//! 3. **Syncing**: replay the local file delta into `/projects`
//! 4. **Executing**: run the lifecycle commands
//!
//! ## Modules
//!
//! - [`devfile`]: Manifest model, loader and validator
//! - [`backend`]: Backend trait with Docker and Kubernetes implementations
//! - [`engine`]: Desired spec construction, drift detection, volume bindings
//! - [`reconciler`]: The push pipeline
//! - [`runner`]: Lifecycle command execution and supervision
//! - [`sync`]: File tree scanning, deltas and remote replay
//! - [`state`]: Sync State and push lock storage
//! - [`config`]: Tool settings
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! schemaVersion: 2.0.0
//! metadata:
//!   name: nodejs
//! components:
//!   - name: runtime
//!     container:
//!       image: node:18
//!       mountSources: true
//!       endpoints:
//!         - name: http
//!           targetPort: 3000
//! commands:
//!   - id: install
//!     exec:
//!       component: runtime
//!       commandLine: npm install
//!       group:
//!         kind: build
//!         isDefault: true
//!   - id: run
//!     exec:
//!       component: runtime
//!       commandLine: npm start
//!       group:
//!         kind: run
//!         isDefault: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod backend;
pub mod cli;
pub mod config;
pub mod devfile;
pub mod engine;
pub mod error;
pub mod reconciler;
pub mod runner;
pub mod state;
pub mod sync;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{Backend, BackendKind, DockerBackend, KubeBackend};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigLoader, KdoConfig};
pub use devfile::{Devfile, DevfileParser, DevfileValidator};
pub use engine::{DiffEngine, SpecBuilder, VolumeBindings};
pub use error::{KdoError, Result};
pub use reconciler::{DriftReport, PushOptions, PushReport, Reconciler, Stage};
pub use runner::CommandRunner;
pub use state::{LocalStateStore, StateStore};
pub use sync::{FileSyncer, SyncOutcome};
