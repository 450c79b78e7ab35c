//! Tests for kernel module activation and deactivation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mockall::{Sequence, mock};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::error::LifecycleError;
use super::kmod::{KmodPlan, activate, deactivate, ensure_artifacts, load_all};
use crate::host::{CommandOutcome, ModuleControl};
use crate::tests::support::FakeHost;

mock! {
    Modules {}
    impl ModuleControl for Modules {
        fn loaded_modules(&self) -> io::Result<Vec<String>>;
        fn build_environment_present(&self) -> bool;
        fn load(&self, artifact: &Path) -> io::Result<CommandOutcome>;
        fn unload(&self, module: &str) -> io::Result<CommandOutcome>;
        fn device_present(&self, device: &Path) -> bool;
    }
}

struct KmodTree {
    _temp: TempDir,
    plan: KmodPlan,
}

impl KmodTree {
    fn write_artifacts(&self) {
        for module in &self.plan.modules {
            fs::write(&module.artifact, b"\x7fELF").expect("write artefact");
        }
    }

    fn build_line(&self) -> String {
        format!(
            "cmake --build {} --target kmod_modules -j4",
            self.plan.build_dir.display()
        )
    }
}

#[fixture]
fn tree() -> KmodTree {
    let temp = tempfile::tempdir().expect("temp dir");
    let kmod_dir = temp.path().join("worker/src/kmod");
    fs::create_dir_all(&kmod_dir).expect("create kmod dir");
    let plan = KmodPlan::standard(&kmod_dir, temp.path().join("build"), 4);
    KmodTree { _temp: temp, plan }
}

#[rstest]
fn loads_modules_in_order(tree: KmodTree) {
    tree.write_artifacts();
    let fake = FakeHost::new();

    let report = activate(fake.host(), &tree.plan).expect("activation succeeds");

    assert!(!report.built);
    assert_eq!(report.loaded, vec!["softirq_collector", "cpu_stat_collector"]);
    assert_eq!(
        fake.modules.operations(),
        vec!["load softirq_collector", "load cpu_stat_collector"]
    );
}

#[rstest]
fn second_activation_is_a_no_op(tree: KmodTree) {
    tree.write_artifacts();
    let fake = FakeHost::new();
    activate(fake.host(), &tree.plan).expect("first activation");

    let report = activate(fake.host(), &tree.plan).expect("second activation");

    assert!(report.loaded.is_empty());
    assert_eq!(report.already_loaded.len(), 2);
    assert_eq!(fake.modules.operations().len(), 2);
}

#[rstest]
fn missing_artifacts_trigger_a_build(tree: KmodTree) {
    let fake = FakeHost::new();
    fake.modules.set_build_environment(true);
    let artifacts: Vec<PathBuf> = tree
        .plan
        .modules
        .iter()
        .map(|module| module.artifact.clone())
        .collect();
    fake.runner.on_run(&tree.build_line(), move || {
        for artifact in &artifacts {
            fs::write(artifact, b"\x7fELF").expect("write built artefact");
        }
    });

    let report = activate(fake.host(), &tree.plan).expect("activation succeeds");

    assert!(report.built);
    assert_eq!(fake.runner.count(&tree.build_line()), 1);
    assert_eq!(report.loaded.len(), 2);
}

#[rstest]
fn missing_build_environment_is_dependencies_unavailable(tree: KmodTree) {
    let fake = FakeHost::new();

    let error = ensure_artifacts(fake.host(), &tree.plan).expect_err("nothing to build with");

    assert!(matches!(error, LifecycleError::DependenciesUnavailable { .. }));
    assert!(error.is_soft());
    assert!(fake.runner.command_lines().is_empty());
}

#[rstest]
fn failed_build_carries_its_diagnostic(tree: KmodTree) {
    let fake = FakeHost::new();
    fake.modules.set_build_environment(true);
    fake.runner.respond(
        &tree.build_line(),
        CommandOutcome::failure(2, "make: *** No rule to make target"),
    );

    let error = ensure_artifacts(fake.host(), &tree.plan).expect_err("build produced nothing");

    assert!(error.to_string().contains("No rule to make target"));
    match error {
        LifecycleError::BuildFailed { diagnostic, paths } => {
            assert_eq!(diagnostic, "make: *** No rule to make target");
            assert_eq!(paths.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn quiet_build_without_artefacts_reports_the_missing_paths(tree: KmodTree) {
    let fake = FakeHost::new();
    fake.modules.set_build_environment(true);

    let error = ensure_artifacts(fake.host(), &tree.plan).expect_err("build produced nothing");

    match error {
        LifecycleError::ArtifactMissing { paths } => assert_eq!(paths.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn rejected_module_fails_verification(tree: KmodTree) {
    tree.write_artifacts();
    let fake = FakeHost::new();
    fake.modules.refuse("cpu_stat_collector");

    let error = load_all(&fake.modules, &tree.plan).expect_err("second module refused");

    match error {
        LifecycleError::LoadVerificationFailed { module, diagnostic } => {
            assert_eq!(module, "cpu_stat_collector");
            assert!(diagnostic.contains("Invalid module format"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fake.modules.loaded(), vec!["softirq_collector"]);
}

#[rstest]
fn absent_device_node_is_reported(tree: KmodTree) {
    tree.write_artifacts();
    let fake = FakeHost::new();
    fake.modules
        .remove_device(Path::new("/dev/cpu_stat_monitor"));

    let error = load_all(&fake.modules, &tree.plan).expect_err("device missing");

    match error {
        LifecycleError::DeviceNodeMissing { paths } => {
            assert_eq!(paths, vec![PathBuf::from("/dev/cpu_stat_monitor")]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn deactivation_unloads_in_reverse_order(tree: KmodTree) {
    let mut modules = MockModules::new();
    let mut sequence = Sequence::new();
    modules
        .expect_loaded_modules()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|| Ok(vec!["softirq_collector".into(), "cpu_stat_collector".into()]));
    modules
        .expect_unload()
        .withf(|module| module == "cpu_stat_collector")
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(CommandOutcome::success()));
    modules
        .expect_loaded_modules()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|| Ok(vec!["softirq_collector".into()]));
    modules
        .expect_unload()
        .withf(|module| module == "softirq_collector")
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(CommandOutcome::success()));

    let attempted = deactivate(&modules, &tree.plan);

    assert_eq!(attempted, vec!["cpu_stat_collector", "softirq_collector"]);
}

#[rstest]
fn deactivation_skips_absent_modules_and_tolerates_failures(tree: KmodTree) {
    let mut modules = MockModules::new();
    modules
        .expect_loaded_modules()
        .returning(|| Ok(vec!["softirq_collector".into()]));
    modules
        .expect_unload()
        .withf(|module| module == "softirq_collector")
        .times(1)
        .returning(|_| Ok(CommandOutcome::failure(1, "rmmod: ERROR: Module is in use")));

    let attempted = deactivate(&modules, &tree.plan);

    assert_eq!(attempted, vec!["softirq_collector"]);
}
