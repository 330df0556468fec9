//! Autoremove behavior: orphaned auto-installed dependencies fall with
//! their last user-level requirer unless `--noautoremove` holds them.

use std::collections::HashMap;

use ferrite::plan::{StepClass, classify};
use ferrite::pool::Pool;
use ferrite::solver::{GoalContext, Job, JobAction, SolverFlags, resolve};

use crate::common::installed_pkg;

fn system_pool() -> Pool {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![
        installed_pkg("a", "1-1", &["b"]),
        installed_pkg("b", "1-1", &[]),
    ]);
    pool
}

fn auto_flags() -> HashMap<String, bool> {
    [("a".to_string(), false), ("b".to_string(), true)].into()
}

fn ctx<'a>(
    pool: &'a Pool,
    auto: &'a HashMap<String, bool>,
    clean: bool,
) -> GoalContext<'a> {
    GoalContext {
        pool,
        flags: SolverFlags {
            allow_erasing: true,
            ..SolverFlags::default()
        },
        protected: &[],
        running_kernel: None,
        auto_flags: auto,
        installonly: &[],
        installonly_limit: 3,
        clean_requirements_on_remove: clean,
        advisories: &[],
        security: Default::default(),
    }
}

#[test]
fn remove_sweeps_orphaned_dependency() {
    let pool = system_pool();
    let auto = auto_flags();
    let jobs = vec![Job {
        action: JobAction::Erase,
        spec: Some("a".to_string()),
    }];
    let txn = resolve(&ctx(&pool, &auto, true), &jobs).unwrap();
    let plan = classify(&pool, txn);

    let removed: Vec<&str> = plan
        .of_class(StepClass::Remove)
        .map(|s| pool.package(s.id).name())
        .collect();
    let unneeded: Vec<&str> = plan
        .of_class(StepClass::Unneeded)
        .map(|s| pool.package(s.id).name())
        .collect();
    assert_eq!(removed, vec!["a"]);
    assert_eq!(unneeded, vec!["b"]);
}

#[test]
fn noautoremove_keeps_the_dependency() {
    let pool = system_pool();
    let auto = auto_flags();
    let jobs = vec![Job {
        action: JobAction::Erase,
        spec: Some("a".to_string()),
    }];
    let txn = resolve(&ctx(&pool, &auto, false), &jobs).unwrap();
    let plan = classify(&pool, txn);

    assert_eq!(plan.of_class(StepClass::Remove).count(), 1);
    assert_eq!(plan.of_class(StepClass::Unneeded).count(), 0);
}

#[test]
fn user_installed_dependency_survives_the_sweep() {
    let pool = system_pool();
    // b was explicitly requested at some point.
    let auto: HashMap<String, bool> =
        [("a".to_string(), false), ("b".to_string(), false)].into();
    let jobs = vec![Job {
        action: JobAction::Erase,
        spec: Some("a".to_string()),
    }];
    let txn = resolve(&ctx(&pool, &auto, true), &jobs).unwrap();
    let plan = classify(&pool, txn);

    assert_eq!(plan.of_class(StepClass::Unneeded).count(), 0);
}

#[test]
fn bare_autoremove_collects_existing_orphans() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![
        installed_pkg("standalone", "1-1", &[]),
        installed_pkg("orphan", "1-1", &[]),
    ]);
    let auto: HashMap<String, bool> = [
        ("standalone".to_string(), false),
        ("orphan".to_string(), true),
    ]
    .into();

    let jobs = vec![Job {
        action: JobAction::AutoRemove,
        spec: None,
    }];
    let txn = resolve(&ctx(&pool, &auto, true), &jobs).unwrap();
    let plan = classify(&pool, txn);

    let unneeded: Vec<&str> = plan
        .of_class(StepClass::Unneeded)
        .map(|s| pool.package(s.id).name())
        .collect();
    assert_eq!(unneeded, vec!["orphan"]);
    assert_eq!(plan.of_class(StepClass::Remove).count(), 0);
}
