//! Database prerequisite: probe, activation, readiness, and bootstrap.
//!
//! The manager needs a running MySQL-compatible engine with the monitoring
//! schema and accounts in place. The engine is supervised by the host, so
//! activation goes through `systemctl` when present and the SysV `service`
//! wrapper otherwise.

use std::path::{Path, PathBuf};

use monctl_config::PollBudget;
use tracing::{debug, info, warn};

use super::DATABASE_TARGET;
use super::error::{BootstrapStage, LifecycleError};
use crate::host::{CommandOutcome, CommandRunner, CommandSpec, Host};

/// Service names tried, in order, when looking for the engine.
pub const DATABASE_CANDIDATES: [&str; 3] = ["mysqld", "mysql", "mariadb"];

/// Idempotent schema and account setup run before the init script.
pub const BOOTSTRAP_STATEMENTS: &str = "\
CREATE DATABASE IF NOT EXISTS monitor_db DEFAULT CHARACTER SET utf8mb4;
CREATE USER IF NOT EXISTS 'monitor'@'localhost' IDENTIFIED BY 'monitor123';
CREATE USER IF NOT EXISTS 'monitor'@'%' IDENTIFIED BY 'monitor123';
GRANT ALL PRIVILEGES ON monitor_db.* TO 'monitor'@'localhost';
GRANT ALL PRIVILEGES ON monitor_db.* TO 'monitor'@'%';
FLUSH PRIVILEGES;";

const ADMIN_USER: &str = "root";

/// Host facility used to query and command supervised services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervisor {
    Systemd,
    SysV,
}

impl Supervisor {
    /// Every facility available on the host, preferred first.
    pub fn detect(runner: &dyn CommandRunner) -> Vec<Self> {
        let mut found = Vec::new();
        if runner.is_available("systemctl") {
            found.push(Self::Systemd);
        }
        if runner.is_available("service") {
            found.push(Self::SysV);
        }
        found
    }

    fn is_active(self, service: &str) -> CommandSpec {
        match self {
            Self::Systemd => CommandSpec::new("systemctl").args(["is-active", "--quiet", service]),
            Self::SysV => CommandSpec::new("service").args([service, "status"]),
        }
    }

    fn control(self, service: &str, action: &str) -> CommandSpec {
        match self {
            Self::Systemd => CommandSpec::new("systemctl").args([action, service]),
            Self::SysV => CommandSpec::new("service").args([service, action]),
        }
        .elevated()
    }
}

/// [`DATABASE_CANDIDATES`] as owned names.
pub fn default_candidates() -> Vec<String> {
    DATABASE_CANDIDATES.iter().map(|name| (*name).to_owned()).collect()
}

/// Fixed description of the database prerequisite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSpec {
    pub candidates: Vec<String>,
    pub init_script: PathBuf,
    pub readiness: PollBudget,
}

impl DatabaseSpec {
    pub fn new(init_script: impl Into<PathBuf>, readiness: PollBudget) -> Self {
        Self {
            candidates: default_candidates(),
            init_script: init_script.into(),
            readiness,
        }
    }
}

/// How the database prerequisite was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseReport {
    /// Service found active or started, when supervision was available.
    pub service: Option<String>,
    /// Whether this invocation started the service.
    pub started: bool,
    /// Liveness probes issued before the engine answered.
    pub probes: u32,
}

fn succeeds(runner: &dyn CommandRunner, spec: &CommandSpec) -> bool {
    match runner.run(spec) {
        Ok(outcome) => outcome.succeeded(),
        Err(error) => {
            debug!(target: DATABASE_TARGET, command = %spec, error = %error, "helper failed to run");
            false
        }
    }
}

/// Returns the first candidate the supervision facility reports as active.
pub fn find_active(
    runner: &dyn CommandRunner,
    supervisors: &[Supervisor],
    candidates: &[String],
) -> Option<(Supervisor, String)> {
    supervisors.iter().find_map(|supervisor| {
        candidates
            .iter()
            .find(|name| succeeds(runner, &supervisor.is_active(name)))
            .map(|name| (*supervisor, name.clone()))
    })
}

fn start_first(
    runner: &dyn CommandRunner,
    supervisors: &[Supervisor],
    candidates: &[String],
) -> Option<String> {
    for supervisor in supervisors {
        for name in candidates {
            if succeeds(runner, &supervisor.control(name, "start")) {
                info!(target: DATABASE_TARGET, service = %name, "database service started");
                return Some(name.clone());
            }
            debug!(target: DATABASE_TARGET, service = %name, supervisor = ?supervisor, "start attempt failed");
        }
    }
    None
}

/// Brings the database up, waits for it, and applies the bootstrap.
///
/// # Errors
///
/// - `MissingInitScript` before any engine contact when the script is absent.
/// - `DependencyTimeout` when the engine never answers within the budget.
/// - `BootstrapFailed` when either bootstrap stage exits non-zero.
pub fn ensure_database(host: Host<'_>, spec: &DatabaseSpec) -> Result<DatabaseReport, LifecycleError> {
    if !spec.init_script.is_file() {
        return Err(LifecycleError::MissingInitScript {
            path: spec.init_script.clone(),
        });
    }
    let supervisors = Supervisor::detect(host.runner);
    let (service, started) = match find_active(host.runner, &supervisors, &spec.candidates) {
        Some((_, name)) => {
            info!(target: DATABASE_TARGET, service = %name, "database service already active");
            (Some(name), false)
        }
        None if supervisors.is_empty() => {
            warn!(
                target: DATABASE_TARGET,
                "no service supervision facility found; relying on liveness probe"
            );
            (None, false)
        }
        None => {
            let started = start_first(host.runner, &supervisors, &spec.candidates);
            if started.is_none() {
                warn!(
                    target: DATABASE_TARGET,
                    candidates = ?spec.candidates,
                    "no database service could be started; relying on liveness probe"
                );
            }
            let was_started = started.is_some();
            (started, was_started)
        }
    };
    let probes = wait_until_ready(host, spec.readiness)?;
    bootstrap(host.runner, &spec.init_script)?;
    Ok(DatabaseReport {
        service,
        started,
        probes,
    })
}

/// Polls the engine's liveness ping until it answers.
///
/// Returns the number of probes issued. Probes are separated by the budget
/// interval; no pause precedes the first probe or follows the last.
pub fn wait_until_ready(host: Host<'_>, budget: PollBudget) -> Result<u32, LifecycleError> {
    let ping = CommandSpec::new("mysqladmin").args(["-u", ADMIN_USER, "ping"]);
    for attempt in 1..=budget.attempts {
        if attempt > 1 {
            host.sleeper.sleep(budget.interval);
        }
        if succeeds(host.runner, &ping) {
            debug!(target: DATABASE_TARGET, attempt, "database answered liveness probe");
            return Ok(attempt);
        }
    }
    Err(LifecycleError::DependencyTimeout {
        attempts: budget.attempts,
    })
}

/// Creates the schema and accounts, then applies `init_script`.
pub fn bootstrap(runner: &dyn CommandRunner, init_script: &Path) -> Result<(), LifecycleError> {
    let statements = CommandSpec::new("mysql").args(["-u", ADMIN_USER, "-e", BOOTSTRAP_STATEMENTS]);
    check_stage(run_helper(runner, &statements)?, BootstrapStage::Statements)?;
    let script = CommandSpec::new("mysql")
        .args(["-u", ADMIN_USER])
        .stdin_from(init_script);
    check_stage(run_helper(runner, &script)?, BootstrapStage::Script)?;
    info!(
        target: DATABASE_TARGET,
        script = %init_script.display(),
        "database bootstrap applied"
    );
    Ok(())
}

fn check_stage(outcome: CommandOutcome, stage: BootstrapStage) -> Result<(), LifecycleError> {
    if outcome.succeeded() {
        return Ok(());
    }
    Err(LifecycleError::BootstrapFailed {
        stage,
        diagnostic: outcome.diagnostic(&format!("mysql exited with {:?}", outcome.code)),
    })
}

pub(super) fn run_helper(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutcome, LifecycleError> {
    runner.run(spec).map_err(|source| LifecycleError::Command {
        command: spec.to_string(),
        source,
    })
}

/// Stops the first active candidate. Returns the stopped service, if any.
pub fn stop_active(
    runner: &dyn CommandRunner,
    candidates: &[String],
) -> Result<Option<String>, LifecycleError> {
    let supervisors = Supervisor::detect(runner);
    let Some((supervisor, name)) = find_active(runner, &supervisors, candidates) else {
        return Ok(None);
    };
    let outcome = run_helper(runner, &supervisor.control(&name, "stop"))?;
    if !outcome.succeeded() {
        warn!(
            target: DATABASE_TARGET,
            service = %name,
            diagnostic = %outcome.diagnostic("stop failed"),
            "database service did not stop cleanly"
        );
    }
    Ok(Some(name))
}
