//! Recording doubles for the host seams.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::host::{
    ChildState, CommandOutcome, CommandRunner, CommandSpec, Delivery, LaunchedProcess, Liveness,
    ModuleControl, Privilege, ProcessSignaller, ProcessSpawner, ProcessTable, Signal, Sleeper,
    SpawnRequest,
};

/// Pops scripted values, repeating the last one once the script runs out.
fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Command runner that records every call and replays scripted outcomes.
///
/// Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<CommandSpec>>,
    responses: RefCell<HashMap<String, VecDeque<CommandOutcome>>>,
    unspawnable: RefCell<HashSet<String>>,
    available: RefCell<HashSet<String>>,
    effects: RefCell<HashMap<String, Box<dyn Fn()>>>,
}

impl RecordingRunner {
    pub fn respond(&self, line: &str, outcome: CommandOutcome) {
        self.respond_sequence(line, vec![outcome]);
    }

    pub fn respond_sequence(&self, line: &str, outcomes: Vec<CommandOutcome>) {
        self.responses
            .borrow_mut()
            .insert(line.to_owned(), outcomes.into());
    }

    pub fn fail_to_spawn(&self, line: &str) {
        self.unspawnable.borrow_mut().insert(line.to_owned());
    }

    pub fn make_available(&self, program: &str) {
        self.available.borrow_mut().insert(program.to_owned());
    }

    /// Runs `effect` whenever `line` is executed.
    pub fn on_run(&self, line: &str, effect: impl Fn() + 'static) {
        self.effects
            .borrow_mut()
            .insert(line.to_owned(), Box::new(effect));
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(ToString::to_string).collect()
    }

    pub fn elevated_lines(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|spec| spec.is_elevated())
            .map(ToString::to_string)
            .collect()
    }

    pub fn count(&self, line: &str) -> usize {
        self.command_lines().iter().filter(|call| *call == line).count()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutcome> {
        let line = spec.to_string();
        self.calls.borrow_mut().push(spec.clone());
        if self.unspawnable.borrow().contains(&line) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "program not found"));
        }
        if let Some(effect) = self.effects.borrow().get(&line) {
            effect();
        }
        let scripted = self
            .responses
            .borrow_mut()
            .get_mut(&line)
            .and_then(next_scripted);
        Ok(scripted.unwrap_or_else(CommandOutcome::success))
    }

    fn is_available(&self, program: &str) -> bool {
        self.available.borrow().contains(program)
    }
}

/// Signaller with scripted liveness per identifier.
///
/// Identifiers without a script are reported gone.
#[derive(Default)]
pub struct FakeSignaller {
    scripts: RefCell<HashMap<u32, VecDeque<Liveness>>>,
    probes: RefCell<HashMap<u32, usize>>,
    denied: RefCell<HashSet<u32>>,
    sent: RefCell<Vec<(u32, Signal)>>,
}

impl FakeSignaller {
    pub fn script(&self, pid: u32, liveness: Vec<Liveness>) {
        self.scripts.borrow_mut().insert(pid, liveness.into());
    }

    pub fn mark_alive(&self, pid: u32) {
        self.script(pid, vec![Liveness::Alive]);
    }

    /// Direct delivery to `pid` fails with a permission error.
    pub fn deny(&self, pid: u32) {
        self.denied.borrow_mut().insert(pid);
    }

    /// Signals delivered directly, in order.
    pub fn sent(&self) -> Vec<(u32, Signal)> {
        self.sent.borrow().clone()
    }

    pub fn probe_count(&self, pid: u32) -> usize {
        self.probes.borrow().get(&pid).copied().unwrap_or(0)
    }
}

impl ProcessSignaller for FakeSignaller {
    fn probe(&self, pid: u32) -> Liveness {
        *self.probes.borrow_mut().entry(pid).or_default() += 1;
        self.scripts
            .borrow_mut()
            .get_mut(&pid)
            .and_then(next_scripted)
            .unwrap_or(Liveness::Gone)
    }

    fn send(&self, pid: u32, signal: Signal) -> Delivery {
        if self.denied.borrow().contains(&pid) {
            return Delivery::PermissionDenied;
        }
        if !self.scripts.borrow().contains_key(&pid) {
            return Delivery::Gone;
        }
        self.sent.borrow_mut().push((pid, signal));
        Delivery::Delivered
    }
}

/// Process table answering from a fixed pattern map.
#[derive(Default)]
pub struct FakeProcessTable {
    matches: RefCell<HashMap<String, Vec<u32>>>,
    queries: RefCell<Vec<String>>,
}

impl FakeProcessTable {
    pub fn insert(&self, pattern: &str, pids: Vec<u32>) {
        self.matches.borrow_mut().insert(pattern.to_owned(), pids);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.borrow().clone()
    }
}

impl ProcessTable for FakeProcessTable {
    fn find(&self, pattern: &str) -> io::Result<Vec<u32>> {
        self.queries.borrow_mut().push(pattern.to_owned());
        Ok(self
            .matches
            .borrow()
            .get(pattern)
            .cloned()
            .unwrap_or_default())
    }
}

/// In-memory module table.
///
/// Loading an artefact adds its file stem to the table unless the module was
/// marked as refusing to load.
#[derive(Default)]
pub struct FakeModules {
    loaded: RefCell<Vec<String>>,
    build_environment: Cell<bool>,
    refused: RefCell<HashSet<String>>,
    missing_devices: RefCell<HashSet<PathBuf>>,
    table_reads: Cell<usize>,
    operations: RefCell<Vec<String>>,
}

impl FakeModules {
    pub fn preload(&self, name: &str) {
        self.loaded.borrow_mut().push(name.to_owned());
    }

    pub fn set_build_environment(&self, present: bool) {
        self.build_environment.set(present);
    }

    pub fn refuse(&self, name: &str) {
        self.refused.borrow_mut().insert(name.to_owned());
    }

    pub fn remove_device(&self, device: &Path) {
        self.missing_devices.borrow_mut().insert(device.to_path_buf());
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.borrow().clone()
    }

    pub fn table_reads(&self) -> usize {
        self.table_reads.get()
    }

    /// `load <name>` and `unload <name>` entries, in call order.
    pub fn operations(&self) -> Vec<String> {
        self.operations.borrow().clone()
    }
}

impl ModuleControl for FakeModules {
    fn loaded_modules(&self) -> io::Result<Vec<String>> {
        self.table_reads.set(self.table_reads.get() + 1);
        Ok(self.loaded())
    }

    fn build_environment_present(&self) -> bool {
        self.build_environment.get()
    }

    fn load(&self, artifact: &Path) -> io::Result<CommandOutcome> {
        let name = artifact
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.operations.borrow_mut().push(format!("load {name}"));
        if self.refused.borrow().contains(&name) {
            return Ok(CommandOutcome::failure(
                1,
                "insmod: ERROR: could not insert module: Invalid module format",
            ));
        }
        self.loaded.borrow_mut().push(name);
        Ok(CommandOutcome::success())
    }

    fn unload(&self, module: &str) -> io::Result<CommandOutcome> {
        self.operations.borrow_mut().push(format!("unload {module}"));
        self.loaded.borrow_mut().retain(|name| name != module);
        Ok(CommandOutcome::success())
    }

    fn device_present(&self, device: &Path) -> bool {
        !self.missing_devices.borrow().contains(device)
    }
}

struct FakeChild {
    pid: u32,
    state: ChildState,
}

impl LaunchedProcess for FakeChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn state(&mut self) -> io::Result<ChildState> {
        Ok(self.state)
    }
}

/// Spawner recording requests; children keep running unless told otherwise.
pub struct FakeSpawner {
    requests: RefCell<Vec<SpawnRequest>>,
    exit: Cell<Option<Option<i32>>>,
    pid: Cell<u32>,
}

impl Default for FakeSpawner {
    fn default() -> Self {
        Self {
            requests: RefCell::new(Vec::new()),
            exit: Cell::new(None),
            pid: Cell::new(4321),
        }
    }
}

impl FakeSpawner {
    pub fn exit_immediately(&self, code: Option<i32>) {
        self.exit.set(Some(code));
    }

    pub fn next_pid(&self) -> u32 {
        self.pid.get()
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.borrow().clone()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> io::Result<Box<dyn LaunchedProcess>> {
        self.requests.borrow_mut().push(request.clone());
        let state = match self.exit.get() {
            Some(code) => ChildState::Exited { code },
            None => ChildState::Running,
        };
        Ok(Box::new(FakeChild {
            pid: self.pid.get(),
            state,
        }))
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    durations: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn durations(&self) -> Vec<Duration> {
        self.durations.borrow().clone()
    }

    pub fn total(&self) -> Duration {
        self.durations.borrow().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.durations.borrow_mut().push(duration);
    }
}

#[derive(Default)]
pub struct FixedPrivilege {
    elevated: Cell<bool>,
}

impl FixedPrivilege {
    pub fn set_elevated(&self, elevated: bool) {
        self.elevated.set(elevated);
    }
}

impl Privilege for FixedPrivilege {
    fn is_elevated(&self) -> bool {
        self.elevated.get()
    }
}
