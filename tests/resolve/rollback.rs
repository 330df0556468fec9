//! History rollback replayed through the solver.

use std::collections::HashMap;

use ferrite::history::{HistoryOp, HistoryStore};
use ferrite::plan::{StepClass, classify};
use ferrite::pool::Pool;
use ferrite::solver::{GoalContext, Job, JobAction, SolverFlags, resolve};

use crate::common::{installed_pkg, repo_pkg};

#[test]
fn rollback_of_an_upgrade_restores_the_old_package() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = HistoryStore::open(&dir.path().join("history.db")).unwrap();

    // Transaction 1: the original install of foo.
    store.begin("install foo").unwrap();
    store.record_add("foo-1-1.x86_64", false).unwrap();
    store.commit().unwrap();

    // Transaction 2: bar obsoletes foo.
    store.begin("upgrade").unwrap();
    store.record_add("bar-2-1.x86_64", false).unwrap();
    store.record_remove("foo-1-1.x86_64").unwrap();
    store.commit().unwrap();

    let ops = store.plan_rollback(1).unwrap();
    assert_eq!(
        ops,
        vec![
            HistoryOp::Erase("bar-2-1.x86_64".to_string()),
            HistoryOp::Install("foo-1-1.x86_64".to_string()),
        ]
    );

    // Replaying the ops against the current system produces the plan
    // erase bar, install foo.
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![installed_pkg("bar", "2-1", &[])]);
    pool.add_repo("r", 50, vec![repo_pkg("foo", "1-1", &[], &[])]);

    let jobs: Vec<Job> = ops
        .into_iter()
        .map(|op| match op {
            HistoryOp::Install(nevra) => Job {
                action: JobAction::Install,
                spec: Some(nevra),
            },
            HistoryOp::Erase(nevra) => Job {
                action: JobAction::Erase,
                spec: Some(nevra),
            },
        })
        .collect();

    let auto = HashMap::new();
    let ctx = GoalContext {
        pool: &pool,
        flags: SolverFlags::default(),
        protected: &[],
        running_kernel: None,
        auto_flags: &auto,
        installonly: &[],
        installonly_limit: 3,
        clean_requirements_on_remove: false,
        advisories: &[],
        security: Default::default(),
    };
    let txn = resolve(&ctx, &jobs).unwrap();
    let plan = classify(&pool, txn);

    let removed: Vec<String> = plan
        .of_class(StepClass::Remove)
        .map(|s| pool.package(s.id).nevra.to_string())
        .collect();
    let installed: Vec<String> = plan
        .of_class(StepClass::Install)
        .map(|s| pool.package(s.id).nevra.to_string())
        .collect();
    assert_eq!(removed, vec!["bar-2-1.x86_64"]);
    assert_eq!(installed, vec!["foo-1-1.x86_64"]);
}

#[test]
fn undo_then_redo_round_trips_the_installed_set() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = HistoryStore::open(&dir.path().join("history.db")).unwrap();

    store.begin("install a").unwrap();
    store.record_add("a-1-1.x86_64", false).unwrap();
    store.record_add("b-1-1.x86_64", true).unwrap();
    store.commit().unwrap();

    let undo = store.plan_undo(1).unwrap();
    let redo = store.plan_redo(1).unwrap();

    // Applying undo then redo touches the same NEVRAs in opposite
    // directions.
    let undo_erases: Vec<_> = undo
        .iter()
        .filter(|op| matches!(op, HistoryOp::Erase(_)))
        .collect();
    assert_eq!(undo_erases.len(), 2);
    let redo_installs: Vec<_> = redo
        .iter()
        .filter(|op| matches!(op, HistoryOp::Install(_)))
        .collect();
    assert_eq!(redo_installs.len(), 2);
}
