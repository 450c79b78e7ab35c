//! Lifecycle command types and output abstractions.
//!
//! Defines the service descriptors, invocation payloads, and IO wrappers shared
//! across lifecycle commands so the controller remains agnostic of concrete
//! writers and host implementations.

use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use monctl_config::{Config, StateLayout};

use super::LifecycleError;
use crate::host::Host;

/// The two services under control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Manager,
    Worker,
}

impl ServiceKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// Default artefact locations derived from the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Default binary for `service`: `<root>/build/<service>/<service>`.
    pub fn binary(&self, service: ServiceKind) -> PathBuf {
        self.root.join(Self::relative_binary(service))
    }

    /// Project-relative form of the binary path, used as a search pattern.
    pub fn relative_binary(service: ServiceKind) -> PathBuf {
        Path::new("build").join(service.name()).join(service.name())
    }

    /// Log sink for `service`: `<root>/<service>/<service>.log`.
    pub fn log(&self, service: ServiceKind) -> PathBuf {
        self.root
            .join(service.name())
            .join(format!("{}.log", service.name()))
    }

    pub fn init_script(&self) -> PathBuf {
        self.root.join("manager").join("sql").join("server.sql")
    }

    pub fn kmod_dir(&self) -> PathBuf {
        self.root.join("worker").join("src").join("kmod")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    /// Anchors a caller-supplied path at the project root when relative.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Everything needed to launch, locate, and stop one service.
///
/// Immutable for the lifetime of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub kind: ServiceKind,
    pub binary: PathBuf,
    pub args: Vec<OsString>,
    pub pid_path: PathBuf,
    /// Command-line search patterns, most specific first.
    pub patterns: Vec<String>,
    pub log_path: PathBuf,
    pub working_dir: PathBuf,
}

impl ServiceDescriptor {
    /// Describes `kind` with `binary` (defaulted from the project layout) and
    /// positional `args`.
    pub fn new(
        kind: ServiceKind,
        project: &ProjectLayout,
        state: &StateLayout,
        binary: Option<&Path>,
        args: Vec<OsString>,
    ) -> Self {
        let binary = binary.map_or_else(|| project.binary(kind), |path| project.resolve(path));
        let mut patterns = vec![binary.display().to_string()];
        let relative = ProjectLayout::relative_binary(kind).display().to_string();
        if !patterns.contains(&relative) {
            patterns.push(relative);
        }
        Self {
            kind,
            pid_path: state.pid_path(kind.name()),
            log_path: project.log(kind),
            working_dir: project.root().to_path_buf(),
            binary,
            args,
            patterns,
        }
    }

    /// Descriptor used only to locate and stop `kind`.
    pub fn for_lookup(
        kind: ServiceKind,
        project: &ProjectLayout,
        state: &StateLayout,
        binary: Option<&Path>,
    ) -> Self {
        Self::new(kind, project, state, binary, Vec::new())
    }
}

/// Options for `manager start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStartOptions {
    pub binary: Option<PathBuf>,
    pub listen: String,
    pub init_script: Option<PathBuf>,
    pub skip_db_init: bool,
}

/// Options for `worker start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStartOptions {
    pub binary: Option<PathBuf>,
    pub manager: String,
    pub interval: u32,
    pub skip_kmod: bool,
    pub elevate: bool,
    pub strict_kmod: bool,
}

/// Options for `<service> stop`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOptions {
    pub binary: Option<PathBuf>,
    /// Worker only: leave kernel modules loaded.
    pub skip_kmod: bool,
    /// Manager only: stop the active database service afterwards.
    pub stop_db: bool,
}

/// Invocation payload forwarded from the CLI runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleInvocation {
    StartManager(ManagerStartOptions),
    StartWorker(WorkerStartOptions),
    Stop {
        service: ServiceKind,
        options: StopOptions,
    },
    Status {
        service: ServiceKind,
        binary: Option<PathBuf>,
    },
}

/// Shared context available to lifecycle handlers.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleContext<'a> {
    pub config: &'a Config,
    pub project: &'a ProjectLayout,
    pub state: &'a StateLayout,
    pub host: Host<'a>,
}

/// Output handle abstracting over stdout/stderr writers.
pub struct LifecycleOutput<W: Write, E: Write> {
    pub stdout: W,
    pub stderr: E,
}

impl<W: Write, E: Write> LifecycleOutput<W, E> {
    pub fn new(stdout: W, stderr: E) -> Self {
        Self { stdout, stderr }
    }

    pub fn stdout_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        self.stdout.write_fmt(args).map_err(LifecycleError::Io)?;
        self.stdout.write_all(b"\n").map_err(LifecycleError::Io)?;
        self.stdout.flush().map_err(LifecycleError::Io)
    }

    pub fn stderr_line(&mut self, args: fmt::Arguments<'_>) -> Result<(), LifecycleError> {
        self.stderr.write_fmt(args).map_err(LifecycleError::Io)?;
        self.stderr.write_all(b"\n").map_err(LifecycleError::Io)?;
        self.stderr.flush().map_err(LifecycleError::Io)
    }
}
