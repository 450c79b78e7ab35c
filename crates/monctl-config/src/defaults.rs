//! Default values shared by the configuration loader and its callers.

use crate::logging::LogFormat;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default privilege-elevation wrapper.
pub const DEFAULT_ELEVATION_PROGRAM: &str = "sudo";

/// Deadline for the database liveness probe.
pub const DEFAULT_DB_READY_TIMEOUT_SECS: u64 = 30;

/// Pause between database liveness probes.
pub const DEFAULT_DB_POLL_INTERVAL_MS: u64 = 1_000;

/// Pause before checking whether a freshly launched process already exited.
pub const DEFAULT_LAUNCH_CHECK_DELAY_MS: u64 = 2_000;

/// Pause between liveness probes after a termination signal.
pub const DEFAULT_STOP_POLL_INTERVAL_MS: u64 = 500;

/// Number of liveness probes before escalating to a forced kill.
pub const DEFAULT_STOP_POLL_ATTEMPTS: u32 = 10;

/// Parallel jobs requested from the kernel module build.
pub const DEFAULT_KMOD_BUILD_JOBS: u32 = 4;

/// Owned log filter value used where allocation is required.
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Owned elevation program value used where allocation is required.
pub fn default_elevation_program_string() -> String {
    DEFAULT_ELEVATION_PROGRAM.to_owned()
}

/// Default logging format for the binary.
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}
