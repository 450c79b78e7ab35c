//! Translates parsed CLI arguments into lifecycle invocations.

use crate::cli::{Cli, ManagerAction, ServiceCommand, WorkerAction};
use crate::lifecycle::{
    LifecycleInvocation, ManagerStartOptions, ServiceKind, StopOptions, WorkerStartOptions,
};

impl From<Cli> for LifecycleInvocation {
    fn from(cli: Cli) -> Self {
        match cli.service {
            ServiceCommand::Manager { action } => match action {
                ManagerAction::Start(args) => Self::StartManager(ManagerStartOptions {
                    binary: args.binary,
                    listen: args.listen,
                    init_script: args.init_script,
                    skip_db_init: args.skip_db_init,
                }),
                ManagerAction::Stop(args) => Self::Stop {
                    service: ServiceKind::Manager,
                    options: StopOptions {
                        binary: args.binary,
                        skip_kmod: false,
                        stop_db: args.stop_db,
                    },
                },
                ManagerAction::Status(args) => Self::Status {
                    service: ServiceKind::Manager,
                    binary: args.binary,
                },
            },
            ServiceCommand::Worker { action } => match action {
                WorkerAction::Start(args) => Self::StartWorker(WorkerStartOptions {
                    binary: args.binary,
                    manager: args.manager,
                    interval: args.interval,
                    skip_kmod: args.skip_kmod,
                    elevate: !args.no_sudo_worker,
                    strict_kmod: !args.no_strict_kmod,
                }),
                WorkerAction::Stop(args) => Self::Stop {
                    service: ServiceKind::Worker,
                    options: StopOptions {
                        binary: args.binary,
                        skip_kmod: args.skip_kmod,
                        stop_db: false,
                    },
                },
                WorkerAction::Status(args) => Self::Status {
                    service: ServiceKind::Worker,
                    binary: args.binary,
                },
            },
        }
    }
}
