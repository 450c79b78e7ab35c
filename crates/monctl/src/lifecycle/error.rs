//! Error types for service lifecycle operations.

use std::fmt;
use std::io;
use std::path::PathBuf;

use monctl_config::StateLayoutError;
use thiserror::Error;

use super::types::ServiceKind;

/// Step of the database bootstrap that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    /// Database and account creation, grants, and privilege flush.
    Statements,
    /// The caller-supplied initialisation script.
    Script,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Statements => formatter.write_str("bootstrap statements"),
            Self::Script => formatter.write_str("initialisation script"),
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while executing lifecycle commands.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{service} binary not found at {path:?}; build it or pass its location explicitly")]
    BinaryNotFound { service: ServiceKind, path: PathBuf },
    #[error("database initialisation script not found at {path:?}")]
    MissingInitScript { path: PathBuf },
    #[error("database did not answer the liveness probe after {attempts} attempts")]
    DependencyTimeout { attempts: u32 },
    #[error("database {stage} failed: {diagnostic}")]
    BootstrapFailed {
        stage: BootstrapStage,
        diagnostic: String,
    },
    #[error("kernel module dependencies unavailable: {reason}")]
    DependenciesUnavailable { reason: String },
    #[error("kernel module artefacts missing: {}", join_paths(.paths))]
    ArtifactMissing { paths: Vec<PathBuf> },
    #[error("kernel module build failed ({diagnostic}); still missing: {}", join_paths(.paths))]
    BuildFailed {
        diagnostic: String,
        paths: Vec<PathBuf>,
    },
    #[error("kernel module {module} did not appear after loading: {diagnostic}")]
    LoadVerificationFailed { module: String, diagnostic: String },
    #[error("device nodes missing after module load: {}", join_paths(.paths))]
    DeviceNodeMissing { paths: Vec<PathBuf> },
    #[error("{service} exited immediately (status: {code:?}); see {log_path:?}")]
    EarlyExit {
        service: ServiceKind,
        code: Option<i32>,
        log_path: PathBuf,
    },
    #[error("failed to deliver {signal} to pid {pid}: {diagnostic}")]
    SignalDeliveryFailed {
        pid: u32,
        signal: crate::host::Signal,
        diagnostic: String,
    },
    #[error("{service} is already running (pid {pid}); stop it first")]
    AlreadyRunning { service: ServiceKind, pid: u32 },
    #[error("another monctl invocation (pid {pid}) is operating on {service}")]
    InvocationInProgress { service: ServiceKind, pid: u32 },
    #[error("failed to run '{command}': {source}")]
    Command {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to launch {service} from {binary:?}: {source}")]
    Launch {
        service: ServiceKind,
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read the kernel module table: {source}")]
    ModuleTable {
        #[source]
        source: io::Error,
    },
    #[error("failed to search the process table: {source}")]
    ProcessTable {
        #[source]
        source: io::Error,
    },
    #[error("failed to update state file {path:?}: {source}")]
    StateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    StateLayout(#[from] StateLayoutError),
    #[error("failed to write lifecycle output: {0}")]
    Io(#[source] io::Error),
    #[cfg(not(target_os = "linux"))]
    #[error("process and kernel module control is only implemented for Linux")]
    UnsupportedPlatform,
}

impl LifecycleError {
    /// Soft conditions are reported but never change the exit status on
    /// their own; the caller decides whether to escalate them.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::DependenciesUnavailable { .. } | Self::SignalDeliveryFailed { .. }
        )
    }
}
