//! Kernel module prerequisite for the worker.
//!
//! The worker reads from two collector modules which expose character devices.
//! Load order is fixed: the softirq collector first, then the CPU statistics
//! collector. Unloading walks the same list backwards.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::KMOD_TARGET;
use super::database::run_helper;
use super::error::LifecycleError;
use crate::host::{CommandSpec, Host, ModuleControl};

/// Build target producing both module artefacts.
pub const KMOD_BUILD_TARGET: &str = "kmod_modules";

/// One module the worker depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelModuleSpec {
    pub name: String,
    pub artifact: PathBuf,
    pub device: PathBuf,
}

impl KernelModuleSpec {
    pub fn new(name: &str, artifact: impl Into<PathBuf>, device: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_owned(),
            artifact: artifact.into(),
            device: device.into(),
        }
    }
}

/// Ordered module list plus the build used to produce missing artefacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmodPlan {
    /// Modules in load order.
    pub modules: Vec<KernelModuleSpec>,
    pub build_dir: PathBuf,
    pub build_jobs: u32,
}

impl KmodPlan {
    /// The two collector modules with artefacts under `kmod_dir`.
    pub fn standard(kmod_dir: &Path, build_dir: impl Into<PathBuf>, build_jobs: u32) -> Self {
        Self {
            modules: vec![
                KernelModuleSpec::new(
                    "softirq_collector",
                    kmod_dir.join("softirq_collector.ko"),
                    "/dev/cpu_softirq_monitor",
                ),
                KernelModuleSpec::new(
                    "cpu_stat_collector",
                    kmod_dir.join("cpu_stat_collector.ko"),
                    "/dev/cpu_stat_monitor",
                ),
            ],
            build_dir: build_dir.into(),
            build_jobs,
        }
    }

    pub fn missing_artifacts(&self) -> Vec<PathBuf> {
        self.modules
            .iter()
            .filter(|module| !module.artifact.exists())
            .map(|module| module.artifact.clone())
            .collect()
    }

    fn build_command(&self) -> CommandSpec {
        CommandSpec::new("cmake")
            .arg("--build")
            .arg(&self.build_dir)
            .args(["--target", KMOD_BUILD_TARGET])
            .arg(format!("-j{}", self.build_jobs))
    }
}

/// Result of a successful activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KmodReport {
    pub built: bool,
    /// Modules loaded by this invocation, in load order.
    pub loaded: Vec<String>,
    /// Modules that were already present.
    pub already_loaded: Vec<String>,
}

/// Builds missing artefacts when the host can, then loads and verifies every
/// module.
///
/// Returns `DependenciesUnavailable` when artefacts are missing and no kernel
/// build environment exists; callers decide whether that is fatal.
pub fn activate(host: Host<'_>, plan: &KmodPlan) -> Result<KmodReport, LifecycleError> {
    let built = ensure_artifacts(host, plan)?;
    let mut report = load_all(host.modules, plan)?;
    report.built = built;
    Ok(report)
}

/// Ensures every artefact exists, building them when necessary.
///
/// Returns whether a build was run.
pub fn ensure_artifacts(host: Host<'_>, plan: &KmodPlan) -> Result<bool, LifecycleError> {
    if plan.missing_artifacts().is_empty() {
        return Ok(false);
    }
    if !host.modules.build_environment_present() {
        return Err(LifecycleError::DependenciesUnavailable {
            reason: "module artefacts are missing and no kernel build environment is installed"
                .into(),
        });
    }
    let build = plan.build_command();
    info!(target: KMOD_TARGET, command = %build, "building kernel modules");
    let outcome = run_helper(host.runner, &build)?;
    let missing = plan.missing_artifacts();
    match (missing.is_empty(), outcome.succeeded()) {
        (true, succeeded) => {
            if !succeeded {
                warn!(
                    target: KMOD_TARGET,
                    diagnostic = %outcome.diagnostic("build failed"),
                    "kernel module build exited unsuccessfully but produced every artefact"
                );
            }
            Ok(true)
        }
        (false, true) => Err(LifecycleError::ArtifactMissing { paths: missing }),
        (false, false) => Err(LifecycleError::BuildFailed {
            diagnostic: outcome.diagnostic("build exited unsuccessfully"),
            paths: missing,
        }),
    }
}

fn module_table(modules: &dyn ModuleControl) -> Result<Vec<String>, LifecycleError> {
    modules
        .loaded_modules()
        .map_err(|source| LifecycleError::ModuleTable { source })
}

/// Loads each module in order, skipping those already present.
pub fn load_all(
    modules: &dyn ModuleControl,
    plan: &KmodPlan,
) -> Result<KmodReport, LifecycleError> {
    let mut report = KmodReport::default();
    for module in &plan.modules {
        if module_table(modules)?.contains(&module.name) {
            debug!(target: KMOD_TARGET, module = %module.name, "module already loaded");
            report.already_loaded.push(module.name.clone());
            continue;
        }
        if !module.artifact.exists() {
            return Err(LifecycleError::ArtifactMissing {
                paths: vec![module.artifact.clone()],
            });
        }
        let outcome = modules
            .load(&module.artifact)
            .map_err(|source| LifecycleError::Command {
                command: format!("insmod {}", module.artifact.display()),
                source,
            })?;
        if !module_table(modules)?.contains(&module.name) {
            return Err(LifecycleError::LoadVerificationFailed {
                module: module.name.clone(),
                diagnostic: outcome.diagnostic(&format!("insmod exited with {:?}", outcome.code)),
            });
        }
        info!(target: KMOD_TARGET, module = %module.name, "module loaded");
        report.loaded.push(module.name.clone());
    }
    verify(modules, plan)?;
    Ok(report)
}

fn verify(modules: &dyn ModuleControl, plan: &KmodPlan) -> Result<(), LifecycleError> {
    let table = module_table(modules)?;
    if let Some(absent) = plan.modules.iter().find(|module| !table.contains(&module.name)) {
        return Err(LifecycleError::LoadVerificationFailed {
            module: absent.name.clone(),
            diagnostic: "module left the module table during activation".into(),
        });
    }
    let missing: Vec<PathBuf> = plan
        .modules
        .iter()
        .filter(|module| !modules.device_present(&module.device))
        .map(|module| module.device.clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LifecycleError::DeviceNodeMissing { paths: missing })
    }
}

/// Unloads present modules in reverse load order.
///
/// Best effort: the table is re-read before each module and failures are only
/// logged. Returns the modules an unload was issued for.
pub fn deactivate(modules: &dyn ModuleControl, plan: &KmodPlan) -> Vec<String> {
    let mut attempted = Vec::new();
    for module in plan.modules.iter().rev() {
        match modules.loaded_modules() {
            Ok(table) if table.contains(&module.name) => {}
            Ok(_) => continue,
            Err(error) => {
                warn!(
                    target: KMOD_TARGET,
                    module = %module.name,
                    error = %error,
                    "cannot read module table; skipping unload"
                );
                continue;
            }
        }
        attempted.push(module.name.clone());
        match modules.unload(&module.name) {
            Ok(outcome) if outcome.succeeded() => {
                info!(target: KMOD_TARGET, module = %module.name, "module unloaded");
            }
            Ok(outcome) => warn!(
                target: KMOD_TARGET,
                module = %module.name,
                diagnostic = %outcome.diagnostic("rmmod failed"),
                "module unload failed"
            ),
            Err(error) => warn!(
                target: KMOD_TARGET,
                module = %module.name,
                error = %error,
                "module unload could not run"
            ),
        }
    }
    attempted
}
