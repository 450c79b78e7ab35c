//! Privileged launch of the target binaries.
//!
//! When elevation is required and the controller is not already privileged,
//! the binary runs under `<wrapper> nohup`, attached to the controller's
//! session so the wrapper can prompt for credentials. Otherwise the binary
//! runs directly in a new session. Either way stdout and stderr are appended
//! to the service log, and after a short pause the child is checked once for
//! an early exit.

use std::ffi::OsString;
use std::time::Duration;

use tracing::{info, warn};

use super::LAUNCHER_TARGET;
use super::error::LifecycleError;
use super::types::ServiceDescriptor;
use crate::host::{ChildState, Host, SpawnRequest};

/// Builds the spawn request for `descriptor`.
pub fn plan_launch(
    descriptor: &ServiceDescriptor,
    require_elevation: bool,
    already_elevated: bool,
    elevation_program: &str,
) -> SpawnRequest {
    let wrapped = require_elevation && !already_elevated;
    let (program, args) = if wrapped {
        let mut args: Vec<OsString> = vec!["nohup".into(), descriptor.binary.clone().into()];
        args.extend(descriptor.args.iter().cloned());
        (OsString::from(elevation_program), args)
    } else {
        (descriptor.binary.clone().into_os_string(), descriptor.args.clone())
    };
    SpawnRequest {
        program,
        args,
        working_dir: descriptor.working_dir.clone(),
        log_path: descriptor.log_path.clone(),
        new_session: !wrapped,
    }
}

/// Starts `descriptor` and performs the single post-launch health check.
///
/// Returns the identifier of the spawned process. No supervision happens
/// after this returns.
///
/// # Errors
///
/// - `BinaryNotFound` when the binary does not exist.
/// - `Launch` when the process cannot be spawned or polled.
/// - `EarlyExit` when the child has already exited after `check_delay`.
pub fn launch(
    host: Host<'_>,
    descriptor: &ServiceDescriptor,
    require_elevation: bool,
    elevation_program: &str,
    check_delay: Duration,
) -> Result<u32, LifecycleError> {
    if !descriptor.binary.is_file() {
        return Err(LifecycleError::BinaryNotFound {
            service: descriptor.kind,
            path: descriptor.binary.clone(),
        });
    }
    let request = plan_launch(
        descriptor,
        require_elevation,
        host.privilege.is_elevated(),
        elevation_program,
    );
    let launch_error = |source| LifecycleError::Launch {
        service: descriptor.kind,
        binary: descriptor.binary.clone(),
        source,
    };
    let mut child = host.spawner.spawn(&request).map_err(launch_error)?;
    let pid = child.pid();
    info!(
        target: LAUNCHER_TARGET,
        service = %descriptor.kind,
        pid,
        detached = request.new_session,
        log = %descriptor.log_path.display(),
        "spawned"
    );
    host.sleeper.sleep(check_delay);
    match child.state().map_err(launch_error)? {
        ChildState::Running => Ok(pid),
        ChildState::Exited { code } => {
            warn!(target: LAUNCHER_TARGET, service = %descriptor.kind, pid, ?code, "exited during launch check");
            Err(LifecycleError::EarlyExit {
                service: descriptor.kind,
                code,
                log_path: descriptor.log_path.clone(),
            })
        }
    }
}
