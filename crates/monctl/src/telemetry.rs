//! Diagnostic logging for the controller.
//!
//! Status lines meant for the operator go through `LifecycleOutput`; this
//! module only routes `tracing` events to stderr.

use std::io::{self, IsTerminal};

use monctl_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

static INSTALLED: OnceCell<()> = OnceCell::new();

/// Failures while wiring up diagnostic logging.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `log_filter` is not a valid directive list.
    #[error("log filter {filter:?} is invalid: {source}")]
    Filter {
        filter: String,
        #[source]
        source: ParseError,
    },
    /// Another global subscriber got there first.
    #[error("could not install the log subscriber: {0}")]
    Install(#[from] TryInitError),
}

/// Installs the global subscriber once per process.
///
/// Repeat calls are no-ops, whatever configuration they carry.
pub fn initialise(config: &Config) -> Result<(), TelemetryError> {
    INSTALLED.get_or_try_init(|| install(config)).map(drop)
}

fn parse_filter(directives: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directives).map_err(|source| TelemetryError::Filter {
        filter: directives.to_owned(),
        source,
    })
}

fn install(config: &Config) -> Result<(), TelemetryError> {
    let filter = parse_filter(config.log_filter())?;
    let events = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(true)
        .with_timer(UtcTime::rfc_3339());
    let events = match config.log_format() {
        LogFormat::Json => events.json().flatten_event(true).boxed(),
        LogFormat::Compact => events.compact().boxed(),
    };
    tracing_subscriber::registry()
        .with(events)
        .with(filter)
        .try_init()?;
    Ok(())
}
