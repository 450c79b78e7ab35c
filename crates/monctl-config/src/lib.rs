//! Shared configuration for the `monctl` lifecycle controller.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults, then an
//! optional TOML file named by `--config-path`, then `MONCTL_*` environment
//! variables, then command-line flags. The resolved [`Config`] carries the
//! logging setup, the project root used to derive default artefact paths, the
//! state directory for persisted identifiers, and the polling budgets that
//! bound every blocking wait performed by the controller.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;
mod state;

pub use defaults::*;
pub use logging::{LogFormat, LogFormatParseError};
pub use state::{StateLayout, StateLayoutError};

/// Resolved controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "MONCTL")]
pub struct Config {
    /// `tracing` filter expression.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Root directory used to derive default binary, script, and log paths.
    pub project_root: Option<Utf8PathBuf>,
    /// Directory holding persisted identifiers and invocation locks.
    pub state_dir: Option<Utf8PathBuf>,
    /// Wrapper used when an operation needs elevated privilege.
    #[ortho_config(default = defaults::default_elevation_program_string())]
    pub elevation_program: String,
    /// Deadline for the database liveness probe, in seconds.
    #[ortho_config(default = defaults::DEFAULT_DB_READY_TIMEOUT_SECS)]
    pub db_ready_timeout_secs: u64,
    /// Pause between database liveness probes, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_DB_POLL_INTERVAL_MS)]
    pub db_poll_interval_ms: u64,
    /// Pause before the post-launch early-exit check, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_LAUNCH_CHECK_DELAY_MS)]
    pub launch_check_delay_ms: u64,
    /// Pause between post-signal liveness probes, in milliseconds.
    #[ortho_config(default = defaults::DEFAULT_STOP_POLL_INTERVAL_MS)]
    pub stop_poll_interval_ms: u64,
    /// Number of post-signal liveness probes before a forced kill.
    #[ortho_config(default = defaults::DEFAULT_STOP_POLL_ATTEMPTS)]
    pub stop_poll_attempts: u32,
    /// Parallel jobs handed to the kernel module build.
    #[ortho_config(default = defaults::DEFAULT_KMOD_BUILD_JOBS)]
    pub kmod_build_jobs: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
            project_root: None,
            state_dir: None,
            elevation_program: defaults::default_elevation_program_string(),
            db_ready_timeout_secs: DEFAULT_DB_READY_TIMEOUT_SECS,
            db_poll_interval_ms: DEFAULT_DB_POLL_INTERVAL_MS,
            launch_check_delay_ms: DEFAULT_LAUNCH_CHECK_DELAY_MS,
            stop_poll_interval_ms: DEFAULT_STOP_POLL_INTERVAL_MS,
            stop_poll_attempts: DEFAULT_STOP_POLL_ATTEMPTS,
            kmod_build_jobs: DEFAULT_KMOD_BUILD_JOBS,
        }
    }
}

/// A fixed-interval polling budget.
///
/// Waits are expressed as a number of probes separated by a pause rather than
/// a wall-clock deadline, so a budget behaves identically under a fake
/// sleeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Pause between consecutive probes.
    pub interval: Duration,
    /// Maximum number of probes.
    pub attempts: u32,
}

impl PollBudget {
    /// Converts a deadline into an attempt count, never fewer than one.
    ///
    /// A zero interval probes once; counts beyond `u32` saturate.
    pub fn from_deadline(deadline: Duration, interval: Duration) -> Self {
        let attempts = match deadline.as_millis().checked_div(interval.as_millis()) {
            Some(count) => u32::try_from(count).unwrap_or(u32::MAX),
            None => 1,
        }
        .max(1);
        Self { interval, attempts }
    }

    /// Total time spent sleeping if every probe fails.
    pub fn worst_case(self) -> Duration {
        self.interval.saturating_mul(self.attempts.saturating_sub(1))
    }
}

impl Config {
    /// Log filter expression.
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Project root, falling back to the current working directory.
    pub fn project_root(&self) -> PathBuf {
        match &self.project_root {
            Some(root) => root.as_std_path().to_path_buf(),
            None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Elevation wrapper program.
    pub fn elevation_program(&self) -> &str {
        self.elevation_program.as_str()
    }

    /// Budget for the database liveness probe.
    pub fn db_ready_budget(&self) -> PollBudget {
        PollBudget::from_deadline(
            Duration::from_secs(self.db_ready_timeout_secs),
            Duration::from_millis(self.db_poll_interval_ms),
        )
    }

    /// Delay before the post-launch early-exit check.
    pub fn launch_check_delay(&self) -> Duration {
        Duration::from_millis(self.launch_check_delay_ms)
    }

    /// Budget for post-signal liveness polling.
    pub fn stop_budget(&self) -> PollBudget {
        PollBudget {
            interval: Duration::from_millis(self.stop_poll_interval_ms),
            attempts: self.stop_poll_attempts.max(1),
        }
    }

    /// Parallel jobs for the kernel module build.
    pub fn kmod_build_jobs(&self) -> u32 {
        self.kmod_build_jobs.max(1)
    }
}
