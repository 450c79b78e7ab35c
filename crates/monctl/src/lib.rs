//! Lifecycle controller for the monitor manager and worker services.
//!
//! The runtime splits leading configuration flags from the service command,
//! loads [`monctl_config::Config`], installs telemetry, and hands the parsed
//! invocation to [`lifecycle::LifecycleController`]. Every interaction with
//! the host goes through the seams in [`host`], so the binary and the tests
//! share one code path with different host implementations.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use monctl_config::Config;

mod cli;
mod command;
mod config;
mod errors;
pub mod host;
pub mod lifecycle;
pub mod telemetry;
#[cfg(test)]
mod tests;

use cli::Cli;
use config::split_config_arguments;
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
pub(crate) use errors::AppError;
use lifecycle::{LifecycleError, LifecycleInvocation, LifecycleOutput};

/// Runs the controller using the provided arguments and IO handles.
///
/// Returns exit code 0 on success and 1 on any fatal condition, after
/// writing `error: <diagnostic>` to `stderr`.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_handler(
        args,
        stdout,
        stderr,
        &OrthoConfigLoader,
        |invocation, config, output| system_handler(invocation, config, output),
    )
}

/// Runs the controller with a substitute loader and lifecycle handler.
pub(crate) fn run_with_handler<I, W, E, L, F>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
    handler: F,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
    F: FnOnce(
        LifecycleInvocation,
        &Config,
        &mut LifecycleOutput<&mut W, &mut E>,
    ) -> Result<ExitCode, LifecycleError>,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);

    let result = Cli::try_parse_from(split.command_arguments.iter().cloned())
        .map_err(AppError::CliUsage)
        .and_then(|cli| {
            let config = loader.load(&split.config_arguments)?;
            telemetry::initialise(&config)?;
            let mut output = LifecycleOutput::new(&mut *stdout, &mut *stderr);
            handler(cli.into(), &config, &mut output).map_err(AppError::from)
        });

    match result {
        Ok(exit_code) => exit_code,
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            // --help and --version render to stdout and succeed.
            let _ = write!(stdout, "{}", error.render());
            ExitCode::SUCCESS
        }
        Err(AppError::CliUsage(error)) => {
            let _ = write!(stderr, "{}", error.render());
            ExitCode::FAILURE
        }
        Err(error) => {
            let _ = writeln!(stderr, "error: {error}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(target_os = "linux")]
fn system_handler<W: Write, E: Write>(
    invocation: LifecycleInvocation,
    config: &Config,
    output: &mut LifecycleOutput<W, E>,
) -> Result<ExitCode, LifecycleError> {
    use lifecycle::{LifecycleContext, LifecycleController, ProjectLayout};
    use monctl_config::StateLayout;

    let system = host::system::SystemHost::new(config.elevation_program());
    let project = ProjectLayout::new(config.project_root());
    let state = StateLayout::from_config(config)?;
    let context = LifecycleContext {
        config,
        project: &project,
        state: &state,
        host: system.host(),
    };
    LifecycleController::new(context).handle(invocation, output)
}

#[cfg(not(target_os = "linux"))]
fn system_handler<W: Write, E: Write>(
    _invocation: LifecycleInvocation,
    _config: &Config,
    _output: &mut LifecycleOutput<W, E>,
) -> Result<ExitCode, LifecycleError> {
    Err(LifecycleError::UnsupportedPlatform)
}
