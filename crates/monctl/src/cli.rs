//! CLI argument definitions for the monitor lifecycle controller.
//!
//! This module defines the command-line interface structure used by both the
//! runtime parser and the build script for manpage generation. Global
//! configuration flags are stripped before parsing, so they are documented in
//! the trailing help text rather than declared here.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Default manager listen address.
pub(crate) const DEFAULT_LISTEN: &str = "0.0.0.0:50051";
/// Default manager address handed to the worker.
pub(crate) const DEFAULT_MANAGER: &str = "127.0.0.1:50051";
/// Default worker sampling interval, in seconds.
pub(crate) const DEFAULT_INTERVAL: u32 = 10;

/// Command-line interface for the manager and worker lifecycle controller.
#[derive(Parser, Debug)]
#[command(
    name = "monctl",
    version,
    about = "Start, stop, and inspect the monitor manager and worker services",
    disable_help_subcommand = true,
    after_help = "Global configuration flags (--config-path, --log-filter, --log-format, \
                  --project-root, --state-dir) must precede the service name."
)]
pub(crate) struct Cli {
    /// The service to operate on.
    #[command(subcommand)]
    pub(crate) service: ServiceCommand,
}

/// Controlled services.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum ServiceCommand {
    /// Controls the manager service and its database prerequisite.
    Manager {
        /// The lifecycle action to perform.
        #[command(subcommand)]
        action: ManagerAction,
    },
    /// Controls the worker service and its kernel module prerequisite.
    Worker {
        /// The lifecycle action to perform.
        #[command(subcommand)]
        action: WorkerAction,
    },
}

/// Manager lifecycle actions.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum ManagerAction {
    /// Prepares the database and launches the manager in the background.
    Start(ManagerStartArgs),
    /// Stops the manager, optionally stopping the database afterwards.
    Stop(ManagerStopArgs),
    /// Reports whether the manager is running.
    Status(StatusArgs),
}

/// Worker lifecycle actions.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum WorkerAction {
    /// Loads the kernel modules and launches the worker in the background.
    Start(WorkerStartArgs),
    /// Stops the worker and unloads its kernel modules.
    Stop(WorkerStopArgs),
    /// Reports whether the worker is running.
    Status(StatusArgs),
}

/// Flags for `manager start`.
#[derive(Args, Debug, Clone)]
pub(crate) struct ManagerStartArgs {
    /// Manager binary; relative paths are resolved against the project root.
    #[arg(long, visible_alias = "manager-bin", value_name = "PATH")]
    pub(crate) binary: Option<PathBuf>,
    /// Address the manager listens on.
    #[arg(long, default_value = DEFAULT_LISTEN, value_name = "ADDR")]
    pub(crate) listen: String,
    /// SQL script run against the database after bootstrap.
    #[arg(long, visible_alias = "sql", value_name = "PATH")]
    pub(crate) init_script: Option<PathBuf>,
    /// Skips database activation and bootstrap.
    #[arg(long, visible_alias = "no-db-init")]
    pub(crate) skip_db_init: bool,
}

/// Flags for `worker start`.
#[derive(Args, Debug, Clone)]
pub(crate) struct WorkerStartArgs {
    /// Worker binary; relative paths are resolved against the project root.
    #[arg(long, visible_alias = "worker-bin", value_name = "PATH")]
    pub(crate) binary: Option<PathBuf>,
    /// Manager address the worker reports to.
    #[arg(long, default_value = DEFAULT_MANAGER, value_name = "ADDR")]
    pub(crate) manager: String,
    /// Sampling interval in seconds.
    #[arg(
        long,
        default_value_t = DEFAULT_INTERVAL,
        value_parser = clap::value_parser!(u32).range(1..),
        value_name = "SECONDS"
    )]
    pub(crate) interval: u32,
    /// Skips building, loading, and unloading kernel modules.
    #[arg(long)]
    pub(crate) skip_kmod: bool,
    /// Launches the worker without the elevation wrapper.
    #[arg(long)]
    pub(crate) no_sudo_worker: bool,
    /// Continues without kernel modules when no kernel build environment
    /// exists.
    #[arg(long)]
    pub(crate) no_strict_kmod: bool,
}

/// Flags for `manager stop`.
#[derive(Args, Debug, Clone)]
pub(crate) struct ManagerStopArgs {
    /// Manager binary used for command-line matching.
    #[arg(long, visible_alias = "manager-bin", value_name = "PATH")]
    pub(crate) binary: Option<PathBuf>,
    /// Also stops the active database service.
    #[arg(long)]
    pub(crate) stop_db: bool,
}

/// Flags for `worker stop`.
#[derive(Args, Debug, Clone)]
pub(crate) struct WorkerStopArgs {
    /// Worker binary used for command-line matching.
    #[arg(long, visible_alias = "worker-bin", value_name = "PATH")]
    pub(crate) binary: Option<PathBuf>,
    /// Leaves kernel modules loaded.
    #[arg(long)]
    pub(crate) skip_kmod: bool,
}

/// Flags for `<service> status`.
#[derive(Args, Debug, Clone)]
pub(crate) struct StatusArgs {
    /// Service binary used for command-line matching.
    #[arg(long, value_name = "PATH")]
    pub(crate) binary: Option<PathBuf>,
}
