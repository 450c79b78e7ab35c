//! Production host seams backed by the running Linux system.

use std::env;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal as NixSignal, kill};
use nix::unistd::{Pid, geteuid, setsid};
use procfs::process::Process;
use tracing::debug;

use super::{
    ChildState, CommandOutcome, CommandRunner, CommandSpec, Delivery, Host, LaunchedProcess,
    Liveness, ModuleControl, Privilege, ProcessSignaller, ProcessSpawner, ProcessTable, Signal,
    Sleeper, SpawnRequest,
};

const HOST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::host");
const MODULE_TABLE: &str = "/proc/modules";
const KERNEL_RELEASE: &str = "/proc/sys/kernel/osrelease";

/// Runs helper commands, prefixing the elevation wrapper when required.
#[derive(Debug, Clone)]
pub struct SystemCommands {
    elevation_program: OsString,
}

impl SystemCommands {
    pub fn new(elevation_program: impl Into<OsString>) -> Self {
        Self {
            elevation_program: elevation_program.into(),
        }
    }

    fn command_for(&self, spec: &CommandSpec) -> Command {
        if spec.is_elevated() && !geteuid().is_root() {
            let mut command = Command::new(&self.elevation_program);
            command.arg(spec.program()).args(spec.arguments());
            command
        } else {
            let mut command = Command::new(spec.program());
            command.args(spec.arguments());
            command
        }
    }
}

impl CommandRunner for SystemCommands {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutcome> {
        let mut command = self.command_for(spec);
        match spec.stdin() {
            Some(path) => command.stdin(File::open(path)?),
            None => command.stdin(Stdio::null()),
        };
        debug!(target: HOST_TARGET, command = %spec, elevated = spec.is_elevated(), "running helper");
        let output = command.output()?;
        Ok(CommandOutcome {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn is_available(&self, program: &str) -> bool {
        let candidate = Path::new(program);
        if candidate.components().count() > 1 {
            return candidate.is_file();
        }
        env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
            .unwrap_or(false)
    }
}

/// Probes and signals processes with `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignals;

fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}

impl ProcessSignaller for SystemSignals {
    fn probe(&self, pid: u32) -> Liveness {
        let Some(target) = to_pid(pid) else {
            return Liveness::Gone;
        };
        match kill(target, None) {
            Ok(()) => Liveness::Alive,
            Err(Errno::EPERM) => Liveness::Restricted,
            Err(_) => Liveness::Gone,
        }
    }

    fn send(&self, pid: u32, signal: Signal) -> Delivery {
        let Some(target) = to_pid(pid) else {
            return Delivery::Gone;
        };
        let signal = match signal {
            Signal::Terminate => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        match kill(target, signal) {
            Ok(()) => Delivery::Delivered,
            Err(Errno::ESRCH) => Delivery::Gone,
            Err(Errno::EPERM) => Delivery::PermissionDenied,
            Err(errno) => Delivery::Failed(errno as i32),
        }
    }
}

/// Searches `/proc` for processes by command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsTable;

fn parent_of(process: procfs::ProcResult<Process>) -> Option<i32> {
    process
        .ok()
        .and_then(|process| process.stat().ok())
        .map(|stat| stat.ppid)
}

/// The controller and every ancestor below init.
///
/// A `sudo` or shell wrapper carries the controller's own arguments, which
/// can include the very binary path being searched for.
fn controller_lineage() -> Vec<u32> {
    let mut lineage = vec![std::process::id()];
    let mut next = parent_of(Process::myself());
    while let Some(ppid) = next.filter(|pid| *pid > 1) {
        let Ok(pid) = u32::try_from(ppid) else {
            break;
        };
        if lineage.contains(&pid) {
            break;
        }
        lineage.push(pid);
        next = parent_of(Process::new(ppid));
    }
    lineage
}

impl ProcessTable for ProcfsTable {
    fn find(&self, pattern: &str) -> io::Result<Vec<u32>> {
        let lineage = controller_lineage();
        let processes = procfs::process::all_processes().map_err(io::Error::other)?;
        let mut matches = Vec::new();
        // Processes may exit mid-scan; unreadable entries are skipped.
        for process in processes.flatten() {
            let Ok(pid) = u32::try_from(process.pid) else {
                continue;
            };
            if lineage.contains(&pid) {
                continue;
            }
            let Ok(cmdline) = process.cmdline() else {
                continue;
            };
            if cmdline.join(" ").contains(pattern) {
                matches.push(pid);
            }
        }
        matches.sort_unstable();
        Ok(matches)
    }
}

/// Kernel module table access through `/proc/modules`, `insmod`, and `rmmod`.
#[derive(Debug, Clone)]
pub struct SystemModules {
    commands: SystemCommands,
}

impl SystemModules {
    pub fn new(commands: SystemCommands) -> Self {
        Self { commands }
    }
}

fn parse_module_table(table: &str) -> Vec<String> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_owned)
        .collect()
}

impl ModuleControl for SystemModules {
    fn loaded_modules(&self) -> io::Result<Vec<String>> {
        fs::read_to_string(MODULE_TABLE).map(|table| parse_module_table(&table))
    }

    fn build_environment_present(&self) -> bool {
        let Ok(release) = fs::read_to_string(KERNEL_RELEASE) else {
            return false;
        };
        PathBuf::from("/lib/modules")
            .join(release.trim())
            .join("build")
            .exists()
    }

    fn load(&self, artifact: &Path) -> io::Result<CommandOutcome> {
        self.commands
            .run(&CommandSpec::new("insmod").arg(artifact).elevated())
    }

    fn unload(&self, module: &str) -> io::Result<CommandOutcome> {
        self.commands
            .run(&CommandSpec::new("rmmod").arg(module).elevated())
    }

    fn device_present(&self, device: &Path) -> bool {
        device.exists()
    }
}

/// Spawns target binaries with their output appended to a log file.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

struct SpawnedChild {
    child: Child,
}

impl LaunchedProcess for SpawnedChild {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn state(&mut self) -> io::Result<ChildState> {
        Ok(match self.child.try_wait()? {
            Some(status) => ChildState::Exited {
                code: status.code(),
            },
            None => ChildState::Running,
        })
    }
}

impl ProcessSpawner for SystemSpawner {
    fn spawn(&self, request: &SpawnRequest) -> io::Result<Box<dyn LaunchedProcess>> {
        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&request.log_path)?;
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .current_dir(&request.working_dir)
            .stdout(log.try_clone()?)
            .stderr(log);
        if request.new_session {
            command.stdin(Stdio::null());
            // SAFETY: setsid(2) is async-signal-safe and the closure touches no
            // state shared with the parent.
            unsafe {
                command.pre_exec(|| setsid().map(drop).map_err(io::Error::from));
            }
        } else {
            command.stdin(Stdio::inherit());
        }
        let child = command.spawn()?;
        Ok(Box::new(SpawnedChild { child }))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Reports privilege from the effective user identifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct EffectiveUser;

impl Privilege for EffectiveUser {
    fn is_elevated(&self) -> bool {
        geteuid().is_root()
    }
}

/// Owns every production seam and lends them out as a [`Host`].
#[derive(Debug)]
pub struct SystemHost {
    commands: SystemCommands,
    signals: SystemSignals,
    processes: ProcfsTable,
    modules: SystemModules,
    spawner: SystemSpawner,
    sleeper: ThreadSleeper,
    privilege: EffectiveUser,
}

impl SystemHost {
    pub fn new(elevation_program: &str) -> Self {
        let commands = SystemCommands::new(elevation_program);
        Self {
            modules: SystemModules::new(commands.clone()),
            commands,
            signals: SystemSignals,
            processes: ProcfsTable,
            spawner: SystemSpawner,
            sleeper: ThreadSleeper,
            privilege: EffectiveUser,
        }
    }

    pub fn host(&self) -> Host<'_> {
        Host {
            runner: &self.commands,
            signaller: &self.signals,
            processes: &self.processes,
            modules: &self.modules,
            spawner: &self.spawner,
            sleeper: &self.sleeper,
            privilege: &self.privilege,
        }
    }
}
