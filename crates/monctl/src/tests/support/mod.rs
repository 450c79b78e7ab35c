//! Test support utilities for lifecycle coverage.
//!
//! Supplies recording host doubles and a project sandbox so unit tests and
//! step definitions stay focused on their assertions.

mod host;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use monctl_config::{Config, StateLayout};
use tempfile::TempDir;

pub use host::{
    FakeModules, FakeProcessTable, FakeSignaller, FakeSpawner, FixedPrivilege, RecordingRunner,
    RecordingSleeper,
};

use crate::host::Host;
use crate::lifecycle::{LifecycleContext, ProjectLayout};

/// Every host double, lent out together as a [`Host`].
#[derive(Default)]
pub struct FakeHost {
    pub runner: RecordingRunner,
    pub signaller: FakeSignaller,
    pub processes: FakeProcessTable,
    pub modules: FakeModules,
    pub spawner: FakeSpawner,
    pub sleeper: RecordingSleeper,
    pub privilege: FixedPrivilege,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(&self) -> Host<'_> {
        Host {
            runner: &self.runner,
            signaller: &self.signaller,
            processes: &self.processes,
            modules: &self.modules,
            spawner: &self.spawner,
            sleeper: &self.sleeper,
            privilege: &self.privilege,
        }
    }
}

/// Writes an empty executable shell script at `path`.
pub fn touch_executable(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create binary directory");
    }
    fs::write(path, "#!/bin/sh\nexit 0\n").expect("write binary");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod binary");
}

/// A temporary project root with its own state directory.
pub struct Sandbox {
    _temp: TempDir,
    pub config: Config,
    pub project: ProjectLayout,
    pub state: StateLayout,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("temp dir");
        let root = temp.path().join("project");
        let state_dir = temp.path().join("state");
        fs::create_dir_all(&root).expect("create project root");
        let config = Config {
            project_root: Some(utf8(&root)),
            state_dir: Some(utf8(&state_dir)),
            ..Config::default()
        };
        let state = StateLayout::from_config(&config).expect("state layout");
        Self {
            _temp: temp,
            project: ProjectLayout::new(root),
            config,
            state,
        }
    }

    pub fn context<'a>(&'a self, host: &'a FakeHost) -> LifecycleContext<'a> {
        LifecycleContext {
            config: &self.config,
            project: &self.project,
            state: &self.state,
            host: host.host(),
        }
    }

    pub fn root(&self) -> &Path {
        self.project.root()
    }

    /// Creates the default binaries, init script, and module artefacts.
    pub fn populate(&self) {
        for service in [
            crate::lifecycle::ServiceKind::Manager,
            crate::lifecycle::ServiceKind::Worker,
        ] {
            touch_executable(&self.project.binary(service));
        }
        let script = self.project.init_script();
        fs::create_dir_all(script.parent().expect("script parent")).expect("create sql dir");
        fs::write(&script, "CREATE TABLE IF NOT EXISTS t (id INT);\n").expect("write script");
        let kmod_dir = self.project.kmod_dir();
        fs::create_dir_all(&kmod_dir).expect("create kmod dir");
        for artefact in ["softirq_collector.ko", "cpu_stat_collector.ko"] {
            fs::write(kmod_dir.join(artefact), b"\x7fELF").expect("write artefact");
        }
    }

    pub fn pid_path(&self, service: crate::lifecycle::ServiceKind) -> PathBuf {
        self.state.pid_path(service.name())
    }

    pub fn write_pid(&self, service: crate::lifecycle::ServiceKind, content: &str) {
        fs::write(self.pid_path(service), content).expect("write pid file");
    }
}

fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("temporary paths are UTF-8")
}
