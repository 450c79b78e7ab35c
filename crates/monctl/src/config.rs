//! Configuration loading helpers for the controller.
//!
//! Global configuration flags lead the argument list. They are separated here
//! so `ortho-config` only receives the flags it understands while clap parses
//! the service subcommand that follows.

use std::ffi::{OsStr, OsString};

use monctl_config::Config;
use ortho_config::OrthoConfig;

use crate::AppError;

/// CLI flags recognised by the configuration loader.
///
/// MAINTENANCE: keep in sync with the fields of `monctl_config::Config` that
/// operators are expected to set per invocation.
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--project-root",
    "--state-dir",
];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the leading configuration arguments.
    ///
    /// `args` starts with the program name, followed only by flags listed in
    /// [`CONFIG_CLI_FLAGS`] and their values.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Stop,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Stop;
    }
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !inline_value,
        }
    } else {
        FlagAction::Stop
    }
}

/// Configuration arguments and the command tokens that follow them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    /// Program name plus leading configuration flags.
    pub(crate) config_arguments: Vec<OsString>,
    /// Program name plus everything from the first command token onwards.
    pub(crate) command_arguments: Vec<OsString>,
}

pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let mut iter = args.iter();
    let Some(program) = iter.next() else {
        return ConfigArgumentSplit {
            config_arguments: Vec::new(),
            command_arguments: Vec::new(),
        };
    };

    let mut config_arguments = vec![program.clone()];
    let mut rest = iter.as_slice();
    while let Some((argument, tail)) = rest.split_first() {
        match classify(argument) {
            FlagAction::Include { needs_value } => {
                config_arguments.push(argument.clone());
                rest = tail;
                if needs_value && let Some((value, after)) = rest.split_first() {
                    config_arguments.push(value.clone());
                    rest = after;
                }
            }
            FlagAction::Stop => break,
        }
    }

    let mut command_arguments = vec![program.clone()];
    command_arguments.extend(rest.iter().cloned());
    ConfigArgumentSplit {
        config_arguments,
        command_arguments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case::inline("--log-filter=debug", FlagAction::Include { needs_value: false })]
    #[case::separate("--state-dir", FlagAction::Include { needs_value: true })]
    #[case::subcommand("worker", FlagAction::Stop)]
    #[case::unknown("--skip-kmod", FlagAction::Stop)]
    fn classifies_leading_arguments(#[case] argument: &str, #[case] expected: FlagAction) {
        assert_eq!(classify(OsStr::new(argument)), expected);
    }

    #[test]
    fn splits_config_flags_from_the_service_command() {
        let split = split_config_arguments(&os(&[
            "monctl",
            "--project-root",
            "/srv/mon",
            "--log-format=json",
            "worker",
            "start",
            "--skip-kmod",
        ]));
        assert_eq!(
            split.config_arguments,
            os(&["monctl", "--project-root", "/srv/mon", "--log-format=json"])
        );
        assert_eq!(
            split.command_arguments,
            os(&["monctl", "worker", "start", "--skip-kmod"])
        );
    }

    #[test]
    fn config_flags_after_the_service_stay_with_the_command() {
        let split = split_config_arguments(&os(&["monctl", "manager", "status", "--state-dir", "x"]));
        assert_eq!(split.config_arguments, os(&["monctl"]));
        assert_eq!(split.command_arguments.len(), 5);
    }

    #[test]
    fn empty_arguments_split_to_nothing() {
        let split = split_config_arguments(&[]);
        assert!(split.config_arguments.is_empty());
        assert!(split.command_arguments.is_empty());
    }
}
