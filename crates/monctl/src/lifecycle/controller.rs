//! High-level orchestration for service lifecycle commands.
//!
//! Start runs the prerequisite gate for the service and then the launcher.
//! Stop runs the locator, the terminator, and for the worker the module
//! deactivator. Status is read-only and never takes the invocation lock.

use std::io::Write;
use std::process::ExitCode;

use tracing::{info, warn};

use super::LIFECYCLE_TARGET;
use super::database::{self, DatabaseSpec};
use super::error::LifecycleError;
use super::kmod::{self, KmodPlan};
use super::launcher::launch;
use super::locator::{LocateSource, Located, locate};
use super::state::StateStore;
use super::terminator::{Termination, Terminator};
use super::types::{
    LifecycleContext, LifecycleInvocation, LifecycleOutput, ManagerStartOptions, ServiceDescriptor,
    ServiceKind, StopOptions, WorkerStartOptions,
};

/// Drives lifecycle commands against the host seams in its context.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleController<'a> {
    context: LifecycleContext<'a>,
}

impl<'a> LifecycleController<'a> {
    pub fn new(context: LifecycleContext<'a>) -> Self {
        Self { context }
    }

    pub fn handle<W: Write, E: Write>(
        &self,
        invocation: LifecycleInvocation,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        match invocation {
            LifecycleInvocation::StartManager(options) => self.start_manager(&options, output),
            LifecycleInvocation::StartWorker(options) => self.start_worker(&options, output),
            LifecycleInvocation::Stop { service, options } => self.stop(service, &options, output),
            LifecycleInvocation::Status { service, binary } => {
                self.status(service, binary.as_deref(), output)
            }
        }
    }

    fn descriptor(
        &self,
        kind: ServiceKind,
        binary: Option<&std::path::Path>,
        args: Vec<std::ffi::OsString>,
    ) -> ServiceDescriptor {
        ServiceDescriptor::new(kind, self.context.project, self.context.state, binary, args)
    }

    fn kmod_plan(&self) -> KmodPlan {
        let project = self.context.project;
        KmodPlan::standard(
            &project.kmod_dir(),
            project.build_dir(),
            self.context.config.kmod_build_jobs(),
        )
    }

    fn start_manager<W: Write, E: Write>(
        &self,
        options: &ManagerStartOptions,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let descriptor = self.descriptor(
            ServiceKind::Manager,
            options.binary.as_deref(),
            vec![options.listen.clone().into()],
        );
        ensure_binary(&descriptor)?;
        let store = StateStore::open(self.context.state)?;
        let _lock = store.lock(descriptor.kind, self.context.host.signaller)?;
        self.ensure_not_running(&store, descriptor.kind)?;

        if options.skip_db_init {
            info!(target: LIFECYCLE_TARGET, "database initialisation skipped");
        } else {
            let script = options.init_script.as_deref().map_or_else(
                || self.context.project.init_script(),
                |path| self.context.project.resolve(path),
            );
            let spec = DatabaseSpec::new(script, self.context.config.db_ready_budget());
            let report = database::ensure_database(self.context.host, &spec)?;
            output.stderr_line(format_args!(
                "database ready{} after {} probe(s)",
                report
                    .service
                    .as_deref()
                    .map(|name| format!(" ({name})"))
                    .unwrap_or_default(),
                report.probes
            ))?;
        }

        self.launch_and_record(&store, &descriptor, false, output)
    }

    fn start_worker<W: Write, E: Write>(
        &self,
        options: &WorkerStartOptions,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let descriptor = self.descriptor(
            ServiceKind::Worker,
            options.binary.as_deref(),
            vec![
                options.manager.clone().into(),
                options.interval.to_string().into(),
            ],
        );
        ensure_binary(&descriptor)?;
        let store = StateStore::open(self.context.state)?;
        let _lock = store.lock(descriptor.kind, self.context.host.signaller)?;
        self.ensure_not_running(&store, descriptor.kind)?;

        if options.skip_kmod {
            info!(target: LIFECYCLE_TARGET, "kernel module activation skipped");
        } else {
            match kmod::activate(self.context.host, &self.kmod_plan()) {
                Ok(report) => {
                    info!(
                        target: LIFECYCLE_TARGET,
                        built = report.built,
                        loaded = ?report.loaded,
                        already_loaded = ?report.already_loaded,
                        "kernel modules ready"
                    );
                }
                Err(error @ LifecycleError::DependenciesUnavailable { .. })
                    if !options.strict_kmod =>
                {
                    warn!(target: LIFECYCLE_TARGET, error = %error, "continuing without kernel modules");
                    output.stderr_line(format_args!(
                        "warning: {error}; continuing without kernel modules"
                    ))?;
                }
                Err(error) => return Err(error),
            }
        }

        self.launch_and_record(&store, &descriptor, options.elevate, output)
    }

    fn launch_and_record<W: Write, E: Write>(
        &self,
        store: &StateStore,
        descriptor: &ServiceDescriptor,
        require_elevation: bool,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let config = self.context.config;
        let pid = launch(
            self.context.host,
            descriptor,
            require_elevation,
            config.elevation_program(),
            config.launch_check_delay(),
        )?;
        store.write_pid(descriptor.kind, pid)?;
        output.stdout_line(format_args!(
            "{} running in background (PID {pid})",
            descriptor.kind
        ))?;
        output.stderr_line(format_args!(
            "output is appended to {}",
            descriptor.log_path.display()
        ))?;
        Ok(ExitCode::SUCCESS)
    }

    fn ensure_not_running(
        &self,
        store: &StateStore,
        service: ServiceKind,
    ) -> Result<(), LifecycleError> {
        let Some(pid) = store.read_pid(service)? else {
            return Ok(());
        };
        if self.context.host.signaller.probe(pid).is_alive() {
            return Err(LifecycleError::AlreadyRunning { service, pid });
        }
        warn!(
            target: LIFECYCLE_TARGET,
            service = %service,
            pid,
            "removing stale pid file"
        );
        store.remove_pid(service)?;
        Ok(())
    }

    fn stop<W: Write, E: Write>(
        &self,
        service: ServiceKind,
        options: &StopOptions,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let host = self.context.host;
        let descriptor = ServiceDescriptor::for_lookup(
            service,
            self.context.project,
            self.context.state,
            options.binary.as_deref(),
        );
        let store = StateStore::open(self.context.state)?;
        let _lock = store.lock(service, host.signaller)?;

        let located = match locate(&descriptor, &store, host.processes) {
            Ok(located) => located,
            Err(error) => {
                warn!(target: LIFECYCLE_TARGET, service = %service, error = %error, "process lookup failed");
                output.stderr_line(format_args!("warning: {error}"))?;
                Located {
                    pids: Vec::new(),
                    source: LocateSource::NotFound,
                }
            }
        };

        if located.is_empty() {
            output.stdout_line(format_args!("{service} process not found"))?;
        }
        let terminator = Terminator::new(
            host.signaller,
            host.runner,
            host.sleeper,
            self.context.config.stop_budget(),
        );
        for pid in located.pids {
            match terminator.terminate(pid) {
                Ok(Termination::AlreadyGone) => {
                    output.stdout_line(format_args!(
                        "{service} process not found (pid={pid} is not running)"
                    ))?;
                }
                Ok(Termination::Graceful) => {
                    output.stdout_line(format_args!("{service} stopped (pid={pid})"))?;
                }
                Ok(Termination::Forced) => {
                    output.stdout_line(format_args!("{service} force killed (pid={pid})"))?;
                }
                Err(error) => {
                    warn!(target: LIFECYCLE_TARGET, service = %service, pid, error = %error, "stop failed");
                    output.stderr_line(format_args!("error: {error}"))?;
                }
            }
        }

        if let Err(error) = store.remove_pid(service) {
            warn!(target: LIFECYCLE_TARGET, service = %service, error = %error, "pid file not removed");
            output.stderr_line(format_args!("warning: {error}"))?;
        }

        match service {
            ServiceKind::Worker if !options.skip_kmod => {
                for module in kmod::deactivate(host.modules, &self.kmod_plan()) {
                    output.stderr_line(format_args!("unloaded kernel module {module}"))?;
                }
            }
            ServiceKind::Manager if options.stop_db => {
                match database::stop_active(host.runner, &database::default_candidates())? {
                    Some(name) => {
                        output.stdout_line(format_args!("stopped database service {name}"))?;
                    }
                    None => output.stdout_line(format_args!("no active database service found"))?,
                }
            }
            _ => {}
        }
        Ok(ExitCode::SUCCESS)
    }

    fn status<W: Write, E: Write>(
        &self,
        service: ServiceKind,
        binary: Option<&std::path::Path>,
        output: &mut LifecycleOutput<W, E>,
    ) -> Result<ExitCode, LifecycleError> {
        let descriptor = ServiceDescriptor::for_lookup(
            service,
            self.context.project,
            self.context.state,
            binary,
        );
        let store = StateStore::open(self.context.state)?;
        let located = locate(&descriptor, &store, self.context.host.processes)?;
        if located.is_empty() {
            output.stdout_line(format_args!("{service} is not running"))?;
            return Ok(ExitCode::SUCCESS);
        }
        for pid in &located.pids {
            let alive = self.context.host.signaller.probe(*pid).is_alive();
            match (&located.source, alive) {
                (LocateSource::PidFile, true) => {
                    output.stdout_line(format_args!("{service} is running (pid={pid})"))?;
                }
                (LocateSource::PidFile, false) => {
                    output.stdout_line(format_args!(
                        "{service} is not running; pid file at {} names exited pid {pid}",
                        descriptor.pid_path.display()
                    ))?;
                }
                (_, true) => {
                    output.stdout_line(format_args!(
                        "{service} is running (pid={pid}, found by command line)"
                    ))?;
                }
                (_, false) => {
                    output.stdout_line(format_args!("{service} is not running"))?;
                }
            }
        }
        Ok(ExitCode::SUCCESS)
    }
}

fn ensure_binary(descriptor: &ServiceDescriptor) -> Result<(), LifecycleError> {
    if descriptor.binary.is_file() {
        Ok(())
    } else {
        Err(LifecycleError::BinaryNotFound {
            service: descriptor.kind,
            path: descriptor.binary.clone(),
        })
    }
}
