//! Persisted identifiers and invocation locks.
//!
//! Each service owns two files in the state directory: `<service>.pid`, holding
//! the identifier of the process launched by the last successful start, and
//! `<service>.lock`, held exclusively by the controller invocation currently
//! operating on the service. Neither file is authoritative on its own: a pid
//! file may be stale and a lock may outlive a crashed controller, so both are
//! checked against the live process table before being trusted.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use cap_std::fs::Dir;
use monctl_config::StateLayout;
use tracing::{debug, info, warn};

use super::LIFECYCLE_TARGET;
use super::error::LifecycleError;
use super::types::ServiceKind;
use crate::host::ProcessSignaller;

/// Capability handle on the state directory.
#[derive(Debug)]
pub struct StateStore {
    dir: Dir,
    layout: StateLayout,
}

impl StateStore {
    /// Opens the state directory described by `layout`.
    pub fn open(layout: &StateLayout) -> Result<Self, LifecycleError> {
        let dir = Dir::open_ambient_dir(layout.dir(), cap_std::ambient_authority()).map_err(
            |source| LifecycleError::StateFile {
                path: layout.dir().to_path_buf(),
                source,
            },
        )?;
        Ok(Self {
            dir,
            layout: layout.clone(),
        })
    }

    pub fn pid_path(&self, service: ServiceKind) -> PathBuf {
        self.layout.pid_path(service.name())
    }

    /// Reads the persisted identifier for `service`.
    ///
    /// Returns `Ok(None)` when the file is absent, empty, or does not hold a
    /// single positive decimal integer.
    pub fn read_pid(&self, service: ServiceKind) -> Result<Option<u32>, LifecycleError> {
        let name = StateLayout::pid_file_name(service.name());
        let content = match self.dir.read_to_string(&name) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LifecycleError::StateFile {
                    path: self.pid_path(service),
                    source,
                });
            }
        };
        let parsed = parse_pid(&content);
        if parsed.is_none() {
            warn!(
                target: LIFECYCLE_TARGET,
                service = %service,
                file = %self.pid_path(service).display(),
                "ignoring unparsable pid file"
            );
        }
        Ok(parsed)
    }

    /// Records `pid` as the identifier of `service`, replacing any previous
    /// record.
    pub fn write_pid(&self, service: ServiceKind, pid: u32) -> Result<(), LifecycleError> {
        let path = self.pid_path(service);
        let wrap = |source| LifecycleError::StateFile {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .map_err(wrap)?;
        writeln!(file, "{pid}").map_err(wrap)?;
        file.sync_all().map_err(wrap)?;
        info!(
            target: LIFECYCLE_TARGET,
            service = %service,
            pid,
            file = %path.display(),
            "pid file written"
        );
        Ok(())
    }

    /// Removes the persisted identifier. Returns whether a file was removed.
    pub fn remove_pid(&self, service: ServiceKind) -> Result<bool, LifecycleError> {
        let name = StateLayout::pid_file_name(service.name());
        match self.dir.remove_file(&name) {
            Ok(()) => {
                debug!(target: LIFECYCLE_TARGET, service = %service, "pid file removed");
                Ok(true)
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(LifecycleError::StateFile {
                path: self.pid_path(service),
                source,
            }),
        }
    }

    /// Acquires the invocation lock for `service`.
    ///
    /// A lock left behind by a controller that is no longer alive is removed
    /// and re-acquired once.
    pub fn lock(
        &self,
        service: ServiceKind,
        signaller: &dyn ProcessSignaller,
    ) -> Result<InvocationLock, LifecycleError> {
        let path = self.layout.lock_path(service.name());
        match create_lock(&path) {
            Ok(lock) => Ok(lock),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                self.reclaim_lock(service, &path, signaller)
            }
            Err(source) => Err(LifecycleError::StateFile { path, source }),
        }
    }

    fn reclaim_lock(
        &self,
        service: ServiceKind,
        path: &Path,
        signaller: &dyn ProcessSignaller,
    ) -> Result<InvocationLock, LifecycleError> {
        let name = StateLayout::lock_file_name(service.name());
        let holder = self
            .dir
            .read_to_string(&name)
            .ok()
            .and_then(|content| parse_pid(&content));
        if let Some(pid) = holder
            && pid != std::process::id()
            && signaller.probe(pid).is_alive()
        {
            return Err(LifecycleError::InvocationInProgress { service, pid });
        }
        warn!(
            target: LIFECYCLE_TARGET,
            service = %service,
            holder = ?holder,
            "removing stale invocation lock"
        );
        match self.dir.remove_file(&name) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(LifecycleError::StateFile {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
        create_lock(path).map_err(|source| LifecycleError::StateFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_pid(content: &str) -> Option<u32> {
    content.trim().parse::<u32>().ok().filter(|pid| *pid != 0)
}

/// Publishes a lock file that already names its holder.
///
/// The record is written to a private staging file and hard-linked into
/// place, so the lock never exists without a complete pid in it.
fn create_lock(path: &Path) -> io::Result<InvocationLock> {
    let own_pid = std::process::id();
    let staging = path.with_extension(format!("lock.{own_pid}"));
    let written = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&staging)
        .and_then(|mut file| writeln!(file, "{own_pid}"));
    let published = written.and_then(|()| fs::hard_link(&staging, path));
    if let Err(error) = fs::remove_file(&staging)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LIFECYCLE_TARGET,
            file = %staging.display(),
            error = %error,
            "failed to remove lock staging file"
        );
    }
    published?;
    debug!(target: LIFECYCLE_TARGET, file = %path.display(), "acquired invocation lock");
    Ok(InvocationLock {
        path: path.to_path_buf(),
    })
}

/// Exclusive claim on a service for the duration of one invocation.
///
/// The lock file is removed on drop.
#[derive(Debug)]
pub struct InvocationLock {
    path: PathBuf,
}

impl InvocationLock {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl Drop for InvocationLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    target: LIFECYCLE_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "failed to remove invocation lock"
                );
            }
            _ => {}
        }
    }
}
