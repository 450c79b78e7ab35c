//! Escalating termination of located processes.
//!
//! Each identifier is handled on its own: a zero-signal probe, `SIGTERM`, a
//! fixed liveness poll, then `SIGKILL` if the process outlived the poll. A
//! permission failure on delivery is retried through the elevation wrapper.

use std::io;

use monctl_config::PollBudget;
use tracing::{debug, info, warn};

use super::TERMINATOR_TARGET;
use super::error::LifecycleError;
use crate::host::{CommandRunner, CommandSpec, Delivery, Liveness, ProcessSignaller, Signal, Sleeper};

/// How a single identifier was dealt with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No process had the identifier when probed.
    AlreadyGone,
    /// The process exited within the poll budget after `SIGTERM`.
    Graceful,
    /// The poll budget elapsed and `SIGKILL` was delivered.
    Forced,
}

/// Signals processes, retrying with elevation on permission failures.
pub struct Terminator<'a> {
    signaller: &'a dyn ProcessSignaller,
    runner: &'a dyn CommandRunner,
    sleeper: &'a dyn Sleeper,
    budget: PollBudget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sent {
    Delivered,
    Vanished,
}

impl<'a> Terminator<'a> {
    pub fn new(
        signaller: &'a dyn ProcessSignaller,
        runner: &'a dyn CommandRunner,
        sleeper: &'a dyn Sleeper,
        budget: PollBudget,
    ) -> Self {
        Self {
            signaller,
            runner,
            sleeper,
            budget,
        }
    }

    /// Stops `pid`.
    ///
    /// # Errors
    ///
    /// Returns `SignalDeliveryFailed` when `SIGTERM` cannot be delivered even
    /// with elevation. `SIGKILL` delivery failures are logged only; there is
    /// no confirmation poll after a forced kill.
    pub fn terminate(&self, pid: u32) -> Result<Termination, LifecycleError> {
        let restricted = match self.signaller.probe(pid) {
            Liveness::Gone => {
                debug!(target: TERMINATOR_TARGET, pid, "process already gone");
                return Ok(Termination::AlreadyGone);
            }
            Liveness::Restricted => true,
            Liveness::Alive => false,
        };

        // The identifier is not re-verified against the command line before
        // signalling; a pid recycled since it was located would be hit.
        if self.deliver(pid, Signal::Terminate, restricted)? == Sent::Vanished {
            return Ok(Termination::Graceful);
        }

        for attempt in 1..=self.budget.attempts {
            if !self.signaller.probe(pid).is_alive() {
                info!(target: TERMINATOR_TARGET, pid, attempt, "process exited after SIGTERM");
                return Ok(Termination::Graceful);
            }
            self.sleeper.sleep(self.budget.interval);
        }

        warn!(
            target: TERMINATOR_TARGET,
            pid,
            waited = ?self.budget.interval.saturating_mul(self.budget.attempts),
            "process ignored SIGTERM; forcing"
        );
        if let Err(error) = self.deliver(pid, Signal::Kill, restricted) {
            warn!(target: TERMINATOR_TARGET, pid, error = %error, "SIGKILL delivery failed");
        }
        Ok(Termination::Forced)
    }

    fn deliver(&self, pid: u32, signal: Signal, restricted: bool) -> Result<Sent, LifecycleError> {
        if restricted {
            return self.deliver_elevated(pid, signal);
        }
        match self.signaller.send(pid, signal) {
            Delivery::Delivered => Ok(Sent::Delivered),
            Delivery::Gone => Ok(Sent::Vanished),
            Delivery::PermissionDenied => {
                debug!(target: TERMINATOR_TARGET, pid, %signal, "permission denied; retrying elevated");
                self.deliver_elevated(pid, signal)
            }
            Delivery::Failed(errno) => Err(LifecycleError::SignalDeliveryFailed {
                pid,
                signal,
                diagnostic: io::Error::from_raw_os_error(errno).to_string(),
            }),
        }
    }

    fn deliver_elevated(&self, pid: u32, signal: Signal) -> Result<Sent, LifecycleError> {
        let spec = CommandSpec::new("kill")
            .arg(format!("-{}", signal.number()))
            .arg(pid.to_string())
            .elevated();
        match self.runner.run(&spec) {
            Ok(outcome) if outcome.succeeded() => Ok(Sent::Delivered),
            Ok(outcome) => Err(LifecycleError::SignalDeliveryFailed {
                pid,
                signal,
                diagnostic: outcome.diagnostic("elevated kill failed"),
            }),
            Err(source) => Err(LifecycleError::SignalDeliveryFailed {
                pid,
                signal,
                diagnostic: source.to_string(),
            }),
        }
    }
}
