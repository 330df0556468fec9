//! Failure reporting: unresolvable requirements, protected packages,
//! and dependents blocking removal.

use std::collections::HashMap;

use ferrite::nevra::Nevra;
use ferrite::pool::Pool;
use ferrite::solver::{GoalContext, Job, JobAction, SolverFlags, resolve};

use crate::common::{installed_pkg, repo_pkg};

fn ctx<'a>(
    pool: &'a Pool,
    auto: &'a HashMap<String, bool>,
    flags: SolverFlags,
    protected: &'a [String],
    kernel: Option<Nevra>,
) -> GoalContext<'a> {
    GoalContext {
        pool,
        flags,
        protected,
        running_kernel: kernel,
        auto_flags: auto,
        installonly: &[],
        installonly_limit: 3,
        clean_requirements_on_remove: false,
        advisories: &[],
        security: Default::default(),
    }
}

#[test]
fn missing_dependency_is_unresolvable() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_repo("r", 50, vec![repo_pkg("app", "1-1", &["libmissing"], &[])]);

    let auto = HashMap::new();
    let jobs = vec![Job {
        action: JobAction::Install,
        spec: Some("app".to_string()),
    }];
    match resolve(
        &ctx(&pool, &auto, SolverFlags::default(), &[], None),
        &jobs,
    ) {
        Err(ferrite::Error::Unresolvable { problems }) => {
            assert!(!problems.is_empty());
            let rendered = problems
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            assert!(rendered.contains("libmissing") || rendered.contains("app"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn removing_a_needed_package_requires_allowerasing() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![
        installed_pkg("lib", "1-1", &[]),
        installed_pkg("consumer", "1-1", &["lib"]),
    ]);

    let auto = HashMap::new();
    let jobs = vec![Job {
        action: JobAction::Erase,
        spec: Some("lib".to_string()),
    }];

    // Without --allowerasing the dependent blocks the removal.
    match resolve(
        &ctx(&pool, &auto, SolverFlags::default(), &[], None),
        &jobs,
    ) {
        Err(ferrite::Error::Unresolvable { problems }) => {
            assert!(problems[0].message.contains("consumer"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    // With it, the dependent is erased as well.
    let flags = SolverFlags {
        allow_erasing: true,
        ..SolverFlags::default()
    };
    let txn = resolve(&ctx(&pool, &auto, flags, &[], None), &jobs).unwrap();
    let erased: Vec<&str> = txn.erases().map(|s| pool.package(s.id).name()).collect();
    assert!(erased.contains(&"lib"));
    assert!(erased.contains(&"consumer"));
}

#[test]
fn protected_package_removal_is_refused() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![installed_pkg("ferrite", "1-1", &[])]);

    let auto = HashMap::new();
    let protected = vec!["ferrite".to_string()];
    let jobs = vec![Job {
        action: JobAction::Erase,
        spec: Some("ferrite".to_string()),
    }];
    match resolve(
        &ctx(&pool, &auto, SolverFlags::default(), &protected, None),
        &jobs,
    ) {
        Err(ferrite::Error::Protected { names }) => {
            assert_eq!(names, vec!["ferrite-1-1.x86_64"]);
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn running_kernel_is_protected_unless_replaced() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_installed(vec![installed_pkg("kernel", "5.10-1", &[])]);

    let auto = HashMap::new();
    let kernel = Nevra::parse("kernel-5.10-1.x86_64");
    let jobs = vec![Job {
        action: JobAction::Erase,
        spec: Some("kernel".to_string()),
    }];
    match resolve(
        &ctx(&pool, &auto, SolverFlags::default(), &[], kernel),
        &jobs,
    ) {
        Err(ferrite::Error::Protected { .. }) => {}
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn skip_broken_drops_the_offending_job() {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_repo(
        "r",
        50,
        vec![
            repo_pkg("good", "1-1", &[], &[]),
            repo_pkg("broken", "1-1", &["libmissing"], &[]),
        ],
    );

    let auto = HashMap::new();
    let flags = SolverFlags {
        skip_broken: true,
        ..SolverFlags::default()
    };
    let jobs = vec![
        Job {
            action: JobAction::Install,
            spec: Some("good".to_string()),
        },
        Job {
            action: JobAction::Install,
            spec: Some("broken".to_string()),
        },
    ];
    let txn = resolve(&ctx(&pool, &auto, flags, &[], None), &jobs).unwrap();
    let names: Vec<&str> = txn
        .steps
        .iter()
        .map(|s| pool.package(s.id).name())
        .collect();
    assert_eq!(names, vec!["good"]);
}
