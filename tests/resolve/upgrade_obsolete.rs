//! Upgrade-all where the successor package obsoletes the installed one.

use std::collections::HashMap;

use ferrite::plan::{StepAction, StepClass, classify};
use ferrite::pool::Pool;
use ferrite::solver::{GoalContext, Job, JobAction, SolverFlags, resolve};

use crate::common::{installed_pkg, repo_pkg};

fn ctx<'a>(pool: &'a Pool, auto: &'a HashMap<String, bool>) -> GoalContext<'a> {
    GoalContext {
        pool,
        flags: SolverFlags::default(),
        protected: &[],
        running_kernel: None,
        auto_flags: auto,
        installonly: &[],
        installonly_limit: 3,
        clean_requirements_on_remove: true,
        advisories: &[],
        security: Default::default(),
    }
}

#[test]
fn upgrade_installs_obsoleter_and_erases_victim() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![installed_pkg("foo", "1-1", &[])]);
    pool.add_repo("r", 50, vec![repo_pkg("bar", "2-1", &[], &["foo < 2"])]);

    let auto = HashMap::new();
    let jobs = vec![Job {
        action: JobAction::Upgrade,
        spec: None,
    }];
    let txn = resolve(&ctx(&pool, &auto), &jobs).unwrap();

    let erases: Vec<&str> = txn.erases().map(|s| pool.package(s.id).name()).collect();
    let installs: Vec<&str> = txn.installs().map(|s| pool.package(s.id).name()).collect();
    assert_eq!(erases, vec!["foo"]);
    assert_eq!(installs, vec!["bar"]);
    // Erasures come before installs in the step order.
    assert_eq!(txn.steps[0].action, StepAction::Erase);

    let plan = classify(&pool, txn);
    let foo = plan
        .classified
        .iter()
        .find(|s| pool.package(s.id).name() == "foo")
        .unwrap();
    assert_eq!(foo.class, StepClass::Obsoleted);
    let bar = plan
        .classified
        .iter()
        .find(|s| pool.package(s.id).name() == "bar")
        .unwrap();
    assert_eq!(bar.class, StepClass::Install);
}

#[test]
fn plain_upgrade_moves_to_newest_evr() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![installed_pkg("app", "1.0-1", &[])]);
    pool.add_repo(
        "r",
        50,
        vec![
            repo_pkg("app", "1.5-1", &[], &[]),
            repo_pkg("app", "2.0-1", &[], &[]),
        ],
    );

    let auto = HashMap::new();
    let jobs = vec![Job {
        action: JobAction::Upgrade,
        spec: Some("app".to_string()),
    }];
    let txn = resolve(&ctx(&pool, &auto), &jobs).unwrap();
    let plan = classify(&pool, txn);

    let upgraded: Vec<_> = plan.of_class(StepClass::Upgrade).collect();
    assert_eq!(upgraded.len(), 1);
    assert_eq!(pool.package(upgraded[0].id).evr().version, "2.0");
}

#[test]
fn upgrade_without_path_reports_it() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![installed_pkg("app", "3.0-1", &[])]);
    pool.add_repo("r", 50, vec![repo_pkg("app", "2.0-1", &[], &[])]);

    let auto = HashMap::new();
    let jobs = vec![Job {
        action: JobAction::Upgrade,
        spec: Some("app".to_string()),
    }];
    match resolve(&ctx(&pool, &auto), &jobs) {
        Err(ferrite::Error::NoUpgradePath { name }) => assert_eq!(name, "app"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn downgrade_picks_newest_older_candidate() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![installed_pkg("app", "3.0-1", &[])]);
    pool.add_repo(
        "r",
        50,
        vec![
            repo_pkg("app", "1.0-1", &[], &[]),
            repo_pkg("app", "2.0-1", &[], &[]),
        ],
    );

    let auto = HashMap::new();
    let jobs = vec![Job {
        action: JobAction::Downgrade,
        spec: Some("app".to_string()),
    }];
    let txn = resolve(&ctx(&pool, &auto), &jobs).unwrap();
    let plan = classify(&pool, txn);

    let down: Vec<_> = plan.of_class(StepClass::Downgrade).collect();
    assert_eq!(down.len(), 1);
    assert_eq!(pool.package(down[0].id).evr().version, "2.0");
    // The displaced installed version is reported as removed-by-downgrade.
    assert_eq!(plan.of_class(StepClass::RemovedByDowngrade).count(), 1);
}

#[test]
fn distro_sync_follows_repo_in_both_directions() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![
        installed_pkg("old", "1.0-1", &[]),
        installed_pkg("ahead", "5.0-1", &[]),
    ]);
    pool.add_repo(
        "r",
        50,
        vec![
            repo_pkg("old", "2.0-1", &[], &[]),
            repo_pkg("ahead", "4.0-1", &[], &[]),
        ],
    );

    let auto = HashMap::new();
    let jobs = vec![Job {
        action: JobAction::DistroSync,
        spec: None,
    }];
    let txn = resolve(&ctx(&pool, &auto), &jobs).unwrap();
    let plan = classify(&pool, txn);

    assert_eq!(plan.of_class(StepClass::Upgrade).count(), 1);
    assert_eq!(plan.of_class(StepClass::Downgrade).count(), 1);
}
