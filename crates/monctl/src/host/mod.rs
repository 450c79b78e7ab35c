//! Seams between the lifecycle components and the operating system.
//!
//! Every side effect the controller performs goes through one of the traits in
//! this module: running helper commands, probing and signalling processes,
//! searching the process table, inspecting and changing the kernel module
//! table, spawning the target binaries, sleeping, and detecting privilege.
//! Production implementations live in [`system`]; tests substitute recording
//! doubles.

#[cfg(target_os = "linux")]
pub mod system;

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// External helper command run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    stdin: Option<PathBuf>,
    elevated: bool,
}

impl CommandSpec {
    /// Starts a command specification for `program`.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            elevated: false,
        }
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feeds the contents of `path` to the command's standard input.
    #[must_use]
    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Marks the command as requiring elevated privilege.
    #[must_use]
    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    pub fn stdin(&self) -> Option<&Path> {
        self.stdin.as_deref()
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Completion record of a helper command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit code, absent when the command was terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutcome {
    /// Outcome of a command that exited with status zero.
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }

    /// Outcome of a command that exited with `code` and printed `stderr`.
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }

    /// Best diagnostic text: stderr, else stdout, else `fallback`.
    pub fn diagnostic(&self, fallback: &str) -> String {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .find(|text| !text.is_empty())
            .map_or_else(|| fallback.to_owned(), str::to_owned)
    }
}

/// Runs helper commands such as `systemctl`, `mysql`, or `kill`.
pub trait CommandRunner {
    /// Runs `spec` to completion, capturing its output.
    ///
    /// Returns `Err` only when the command could not be started at all.
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutcome>;

    /// Reports whether `program` can be found on the search path.
    fn is_available(&self, program: &str) -> bool;
}

/// Termination signals used by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Cooperative termination request (`SIGTERM`).
    Terminate,
    /// Unconditional termination (`SIGKILL`).
    Kill,
}

impl Signal {
    /// Conventional signal number, as accepted by `kill -<n>`.
    pub fn number(self) -> i32 {
        match self {
            Self::Terminate => 15,
            Self::Kill => 9,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminate => f.write_str("SIGTERM"),
            Self::Kill => f.write_str("SIGKILL"),
        }
    }
}

/// Result of a zero-signal liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process exists and may be signalled by the controller.
    Alive,
    /// The process exists but belongs to another, more privileged identity.
    Restricted,
    /// No process with the identifier exists.
    Gone,
}

impl Liveness {
    pub fn is_alive(self) -> bool {
        !matches!(self, Self::Gone)
    }
}

/// Result of delivering a signal directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The target vanished before the signal arrived.
    Gone,
    PermissionDenied,
    /// Any other OS error, by raw errno.
    Failed(i32),
}

/// Probes and signals processes by identifier.
pub trait ProcessSignaller {
    fn probe(&self, pid: u32) -> Liveness;
    fn send(&self, pid: u32, signal: Signal) -> Delivery;
}

/// Searches the live process table.
pub trait ProcessTable {
    /// Identifiers of processes whose command line contains `pattern`.
    fn find(&self, pattern: &str) -> io::Result<Vec<u32>>;
}

/// Inspects and changes the live kernel module table.
pub trait ModuleControl {
    /// Names of the currently loaded modules.
    fn loaded_modules(&self) -> io::Result<Vec<String>>;

    /// Whether headers for the running kernel are installed.
    fn build_environment_present(&self) -> bool;

    /// Loads the module at `artifact` with elevated privilege.
    fn load(&self, artifact: &Path) -> io::Result<CommandOutcome>;

    /// Unloads `module` with elevated privilege.
    fn unload(&self, module: &str) -> io::Result<CommandOutcome>;

    /// Whether the character device exposed by a module exists.
    fn device_present(&self, device: &Path) -> bool;
}

/// Fully resolved request to start a target binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Program actually executed (the binary, or the elevation wrapper).
    pub program: OsString,
    /// Arguments passed to `program`.
    pub args: Vec<OsString>,
    /// Working directory of the child.
    pub working_dir: PathBuf,
    /// File receiving both stdout and stderr, opened for append.
    pub log_path: PathBuf,
    /// Start the child in a new session, decoupled from the controller.
    pub new_session: bool,
}

/// Observed state of a spawned child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Running,
    Exited { code: Option<i32> },
}

/// Handle on a spawned target process.
pub trait LaunchedProcess {
    fn pid(&self) -> u32;

    /// Polls the child without blocking.
    fn state(&mut self) -> io::Result<ChildState>;
}

/// Spawns target binaries.
pub trait ProcessSpawner {
    fn spawn(&self, request: &SpawnRequest) -> io::Result<Box<dyn LaunchedProcess>>;
}

/// Blocks the current thread.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Reports the controller's effective privilege.
pub trait Privilege {
    /// True when running as the superuser.
    fn is_elevated(&self) -> bool;
}

/// The full set of host seams handed to the lifecycle components.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    pub runner: &'a dyn CommandRunner,
    pub signaller: &'a dyn ProcessSignaller,
    pub processes: &'a dyn ProcessTable,
    pub modules: &'a dyn ModuleControl,
    pub spawner: &'a dyn ProcessSpawner,
    pub sleeper: &'a dyn Sleeper,
    pub privilege: &'a dyn Privilege,
}

impl fmt::Debug for Host<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}
