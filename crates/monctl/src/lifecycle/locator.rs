//! Resolves a service to live process identifiers.

use tracing::debug;

use super::LOCATOR_TARGET;
use super::error::LifecycleError;
use super::state::StateStore;
use super::types::ServiceDescriptor;
use crate::host::ProcessTable;

/// Where a set of identifiers came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateSource {
    PidFile,
    Pattern(String),
    NotFound,
}

/// Identifiers resolved for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub pids: Vec<u32>,
    pub source: LocateSource,
}

impl Located {
    fn not_found() -> Self {
        Self {
            pids: Vec::new(),
            source: LocateSource::NotFound,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }
}

/// Resolves `descriptor` to process identifiers.
///
/// A parsable persisted identifier wins outright, even when the process it
/// names has exited; the pattern search runs only when the record is absent or
/// unparsable. Patterns are tried in order and the first one with any match
/// supplies every identifier it matched. Finding nothing is not an error.
pub fn locate(
    descriptor: &ServiceDescriptor,
    store: &StateStore,
    processes: &dyn ProcessTable,
) -> Result<Located, LifecycleError> {
    if let Some(pid) = store.read_pid(descriptor.kind)? {
        debug!(target: LOCATOR_TARGET, service = %descriptor.kind, pid, "using persisted identifier");
        return Ok(Located {
            pids: vec![pid],
            source: LocateSource::PidFile,
        });
    }
    for pattern in &descriptor.patterns {
        let pids = processes
            .find(pattern)
            .map_err(|source| LifecycleError::ProcessTable { source })?;
        if !pids.is_empty() {
            debug!(
                target: LOCATOR_TARGET,
                service = %descriptor.kind,
                pattern = %pattern,
                count = pids.len(),
                "matched running processes"
            );
            return Ok(Located {
                pids,
                source: LocateSource::Pattern(pattern.clone()),
            });
        }
    }
    Ok(Located::not_found())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::types::{ProjectLayout, ServiceKind};
    use crate::tests::support::FakeProcessTable;
    use monctl_config::StateLayout;
    use rstest::{fixture, rstest};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        state: StateLayout,
        descriptor: ServiceDescriptor,
    }

    #[fixture]
    fn worker() -> Fixture {
        let temp = tempfile::tempdir().expect("temp dir");
        let state = StateLayout::at(temp.path()).expect("state layout");
        let project = ProjectLayout::new("/srv/mon");
        let descriptor = ServiceDescriptor::for_lookup(ServiceKind::Worker, &project, &state, None);
        Fixture {
            _temp: temp,
            state,
            descriptor,
        }
    }

    #[rstest]
    fn persisted_identifier_takes_precedence(worker: Fixture) {
        fs::write(&worker.descriptor.pid_path, "4242\n").expect("write pid");
        let store = StateStore::open(&worker.state).expect("store");
        let table = FakeProcessTable::default();
        table.insert("/srv/mon/build/worker/worker", vec![7]);
        let located = locate(&worker.descriptor, &store, &table).expect("locate");
        assert_eq!(located.pids, vec![4242]);
        assert_eq!(located.source, LocateSource::PidFile);
        assert!(table.queries().is_empty());
    }

    #[rstest]
    #[case::empty("")]
    #[case::garbage("not-a-pid")]
    #[case::zero("0")]
    fn unparsable_record_falls_back_to_patterns(worker: Fixture, #[case] content: &str) {
        fs::write(&worker.descriptor.pid_path, content).expect("write pid");
        let store = StateStore::open(&worker.state).expect("store");
        let table = FakeProcessTable::default();
        table.insert("build/worker/worker", vec![11, 12]);
        let located = locate(&worker.descriptor, &store, &table).expect("locate");
        assert_eq!(located.pids, vec![11, 12]);
        assert_eq!(
            located.source,
            LocateSource::Pattern("build/worker/worker".into())
        );
        assert_eq!(
            table.queries(),
            vec![
                "/srv/mon/build/worker/worker".to_owned(),
                "build/worker/worker".to_owned(),
            ]
        );
    }

    #[rstest]
    fn first_matching_pattern_wins(worker: Fixture) {
        let store = StateStore::open(&worker.state).expect("store");
        let table = FakeProcessTable::default();
        table.insert("/srv/mon/build/worker/worker", vec![5]);
        table.insert("build/worker/worker", vec![5, 6]);
        let located = locate(&worker.descriptor, &store, &table).expect("locate");
        assert_eq!(located.pids, vec![5]);
        assert_eq!(table.queries().len(), 1);
    }

    #[rstest]
    fn nothing_found_is_empty_not_error(worker: Fixture) {
        let store = StateStore::open(&worker.state).expect("store");
        let located = locate(&worker.descriptor, &store, &FakeProcessTable::default())
            .expect("locate");
        assert!(located.is_empty());
        assert_eq!(located.source, LocateSource::NotFound);
    }
}
