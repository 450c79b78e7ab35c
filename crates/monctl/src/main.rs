//! CLI entrypoint for the monitor lifecycle controller.
//!
//! The binary delegates to [`monctl::run`], which loads configuration, parses
//! the service command, and drives the start, stop, or status flow against the
//! live host.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    monctl::run(std::env::args_os(), &mut stdout, &mut stderr)
}
