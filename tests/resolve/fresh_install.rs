//! Fresh install onto an empty system: the dependency is pulled in,
//! ordered first, and flagged auto-installed.

use std::collections::HashMap;

use ferrite::plan::{StepClass, classify};
use ferrite::pool::Pool;
use ferrite::solver::{GoalContext, Job, JobAction, SolverFlags, resolve};

use crate::common::repo_pkg;

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
fn install_pulls_dependency_in_order() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_repo(
        "r",
        50,
        vec![
            repo_pkg("a", "1-1", &["b"], &[]),
            repo_pkg("b", "1-1", &[], &[]),
        ],
    );

    let auto = HashMap::new();
    let jobs = vec![Job {
        action: JobAction::Install,
        spec: Some("a".to_string()),
    }];
    let txn = resolve(&ctx(&pool, &auto), &jobs).unwrap();

    let names: Vec<&str> = txn
        .steps
        .iter()
        .map(|s| pool.package(s.id).name())
        .collect();
    // The dependency installs before its dependent.
    assert_eq!(names, vec!["b", "a"]);

    let plan = classify(&pool, txn);
    let a = plan
        .classified
        .iter()
        .find(|s| pool.package(s.id).name() == "a")
        .unwrap();
    let b = plan
        .classified
        .iter()
        .find(|s| pool.package(s.id).name() == "b")
        .unwrap();
    assert_eq!(a.class, StepClass::Install);
    assert_eq!(b.class, StepClass::Install);
    assert!(!a.auto, "directly requested package is user-installed");
    assert!(b.auto, "pulled dependency is auto-installed");
}

#[test]
fn install_of_installed_version_is_rejected() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![crate::common::installed_pkg("a", "1-1", &[])]);
    pool.add_repo("r", 50, vec![repo_pkg("a", "1-1", &[], &[])]);

    let auto = HashMap::new();
    let jobs = vec![Job {
        action: JobAction::Install,
        spec: Some("a".to_string()),
    }];
    match resolve(&ctx(&pool, &auto), &jobs) {
        Err(ferrite::Error::AlreadyInstalled { nevra }) => {
            assert_eq!(nevra, "a-1-1.x86_64");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn candidates_resolve_deterministically_by_priority_then_id() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    let mk = |repo: &str| {
        let mut pkg = repo_pkg("tool", "2.0-1", &[], &[]);
        pkg.repo_id = repo.to_string();
        pkg
    };
    pool.add_repo("zeta", 50, vec![mk("zeta")]);
    pool.add_repo("alpha", 50, vec![mk("alpha")]);
    pool.add_repo("slow", 90, vec![mk("slow")]);

    let auto = HashMap::new();
    let jobs = vec![Job {
        action: JobAction::Install,
        spec: Some("tool".to_string()),
    }];
    let txn = resolve(&ctx(&pool, &auto), &jobs).unwrap();
    assert_eq!(txn.steps.len(), 1);
    assert_eq!(pool.package(txn.steps[0].id).repo_id, "alpha");
}
