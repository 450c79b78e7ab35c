//! Lifecycle management for the manager and worker services.
//!
//! This module is split into focused submodules so each concern remains small
//! and testable:
//! - [`types`] defines service descriptors, command payloads, and IO helpers.
//! - [`error`] captures the error surface exposed to the CLI.
//! - [`state`] persists process identifiers and guards invocations.
//! - [`database`] probes, activates, and bootstraps the database.
//! - [`kmod`] builds, loads, and unloads the worker's kernel modules.
//! - [`launcher`] spawns the target binaries with the right privilege.
//! - [`locator`] resolves a service to live process identifiers.
//! - [`terminator`] delivers escalating termination signals.
//! - [`controller`] implements the start/stop/status flows.

mod controller;
pub mod database;
mod error;
pub mod kmod;
#[cfg(test)]
mod kmod_tests;
pub mod launcher;
pub mod locator;
pub mod state;
pub mod terminator;
mod types;

pub use controller::LifecycleController;
pub use error::{BootstrapStage, LifecycleError};
pub use types::{
    LifecycleContext, LifecycleInvocation, LifecycleOutput, ManagerStartOptions, ProjectLayout,
    ServiceDescriptor, ServiceKind, StopOptions, WorkerStartOptions,
};

pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");
pub(crate) const DATABASE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::database");
pub(crate) const KMOD_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::kmod");
pub(crate) const LAUNCHER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launcher");
pub(crate) const LOCATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::locator");
pub(crate) const TERMINATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::terminator");
