//! Full pipeline runs against a fake RPM backend: download, digest
//! verification, apply, history commit; plus the checksum-mismatch and
//! test-only paths.

use std::collections::HashMap;

use ferrite::cache::BlobStore;
use ferrite::config::MainConfig;
use ferrite::crypto::keyring::Keyring;
use ferrite::executor::{CancelFlag, ExecuteOptions, Executor};
use ferrite::history::HistoryStore;
use ferrite::lock::InstanceLock;
use ferrite::plan::{Plan, classify};
use ferrite::plugin::NoopPlugins;
use ferrite::pool::Pool;
use ferrite::repo::{FetchOptions, LoadedRepo, RepoLoader};
use ferrite::rpmdb::{BackendStep, FakeRpmBackend};
use ferrite::solver::{GoalContext, Job, JobAction, SolverFlags, resolve};

use crate::common::{Env, PkgSpec, RepoFixture, write_repo};

/// Load a fixture repo and resolve one job list into a plan.
async fn plan_for(
    env: &Env,
    fixture: &RepoFixture,
    jobs: &[Job],
) -> (Pool, Vec<LoadedRepo>, Plan) {
    let main = MainConfig::default();
    let store = BlobStore::new(env.cache_dir());
    let opts = FetchOptions::default();
    let loader = RepoLoader::new(&main, &store, &opts);
    let mut repo = ferrite::config::repo::RepoConfig::new("base");
    repo.base_urls = vec![fixture.base_url.clone()];
    let mut keyring = Keyring::new();
    let mut plugins = NoopPlugins;
    let loaded = loader.load(&repo, &mut keyring, &mut plugins).await.unwrap();

    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_repo("base", 50, loaded.packages.clone());

    let auto = HashMap::new();
    let ctx = GoalContext {
        pool: &pool,
        flags: SolverFlags::default(),
        protected: &[],
        running_kernel: None,
        auto_flags: &auto,
        installonly: &[],
        installonly_limit: 3,
        clean_requirements_on_remove: true,
        advisories: &[],
        security: Default::default(),
    };
    let txn = resolve(&ctx, jobs).unwrap();
    let plan = classify(&pool, txn);
    (pool, vec![loaded], plan)
}

fn install_jobs(spec: &str) -> Vec<Job> {
    vec![Job {
        action: JobAction::Install,
        spec: Some(spec.to_string()),
    }]
}

#[tokio::test]
async fn fresh_install_downloads_applies_and_records_history() {
    let fixture = write_repo(&[
        PkgSpec::new("a", "1-1").requires("b"),
        PkgSpec::new("b", "1-1"),
    ]);
    let env = Env::new();
    let (pool, repos, plan) = plan_for(&env, &fixture, &install_jobs("a")).await;

    let main = MainConfig::default();
    let lock = InstanceLock::open(&env.lock_path()).unwrap();
    let mut history = HistoryStore::open(&env.persist_dir().join("history.db")).unwrap();
    let mut backend = FakeRpmBackend::new();
    let mut plugins = NoopPlugins;

    let executor = Executor {
        pool: &pool,
        repos: &repos,
        main: &main,
        opts: ExecuteOptions::default(),
        cancel: CancelFlag::new(),
    };
    let mut seen = Vec::new();
    let committed = executor
        .execute(
            &plan,
            "install a",
            &lock,
            &mut history,
            &mut backend,
            &mut plugins,
            &mut |_| true,
            &mut |step: &BackendStep| {
                if let BackendStep::Install { nevra, .. } = step {
                    seen.push(nevra.name.clone());
                }
            },
        )
        .await
        .unwrap();

    // Dependency ordering survives into the backend.
    assert_eq!(seen, vec!["b", "a"]);
    assert_eq!(backend.installed.len(), 2);

    // History carries the user/auto distinction.
    let id = committed.unwrap();
    let record = history.get(id).unwrap();
    assert_eq!(record.cmdline, "install a");
    let mut added = record.added.clone();
    added.sort();
    assert_eq!(
        added,
        vec![
            ("a-1-1.x86_64".to_string(), false),
            ("b-1-1.x86_64".to_string(), true),
        ]
    );
    assert!(record.removed.is_empty());
}

#[tokio::test]
async fn checksum_mismatch_aborts_without_history_or_artifact() {
    let fixture = write_repo(&[
        PkgSpec::new("a", "1-1").forged_digest(
            "0000000000000000000000000000000000000000000000000000000000000000",
        ),
    ]);
    let env = Env::new();
    let (pool, repos, plan) = plan_for(&env, &fixture, &install_jobs("a")).await;

    let main = MainConfig::default();
    let lock = InstanceLock::open(&env.lock_path()).unwrap();
    let mut history = HistoryStore::open(&env.persist_dir().join("history.db")).unwrap();
    let mut backend = FakeRpmBackend::new();
    let mut plugins = NoopPlugins;

    let executor = Executor {
        pool: &pool,
        repos: &repos,
        main: &main,
        opts: ExecuteOptions::default(),
        cancel: CancelFlag::new(),
    };
    let err = executor
        .execute(
            &plan,
            "install a",
            &lock,
            &mut history,
            &mut backend,
            &mut plugins,
            &mut |_| true,
            &mut |_| {},
        )
        .await
        .unwrap_err();

    match &err {
        ferrite::Error::ChecksumMismatch { path, expected, computed, .. } => {
            assert!(path.display().to_string().contains("a-1-1.x86_64.rpm"));
            assert!(expected.starts_with("0000"));
            assert_ne!(expected, computed);
            // The corrupt download is not retained.
            assert!(!path.exists());
        }
        other => panic!("unexpected: {other:?}"),
    }

    // Nothing reached the backend or the history.
    assert!(backend.applied.is_empty());
    assert!(history.list(None, None, false).unwrap().is_empty());
}

#[tokio::test]
async fn test_only_touches_nothing() {
    let fixture = write_repo(&[PkgSpec::new("a", "1-1")]);
    let env = Env::new();
    let (pool, repos, plan) = plan_for(&env, &fixture, &install_jobs("a")).await;

    let main = MainConfig::default();
    let lock = InstanceLock::open(&env.lock_path()).unwrap();
    let mut history = HistoryStore::open(&env.persist_dir().join("history.db")).unwrap();
    let mut backend = FakeRpmBackend::new();
    let mut plugins = NoopPlugins;

    let executor = Executor {
        pool: &pool,
        repos: &repos,
        main: &main,
        opts: ExecuteOptions {
            test_only: true,
            ..ExecuteOptions::default()
        },
        cancel: CancelFlag::new(),
    };
    let committed = executor
        .execute(
            &plan,
            "install a",
            &lock,
            &mut history,
            &mut backend,
            &mut plugins,
            &mut |_| true,
            &mut |_| {},
        )
        .await
        .unwrap();

    assert!(committed.is_none());
    assert!(backend.installed.is_empty());
    assert!(history.list(None, None, false).unwrap().is_empty());
}

#[tokio::test]
async fn backend_failure_aborts_the_history_record() {
    let fixture = write_repo(&[PkgSpec::new("a", "1-1")]);
    let env = Env::new();
    let (pool, repos, plan) = plan_for(&env, &fixture, &install_jobs("a")).await;

    let main = MainConfig::default();
    let lock = InstanceLock::open(&env.lock_path()).unwrap();
    let mut history = HistoryStore::open(&env.persist_dir().join("history.db")).unwrap();
    let mut backend = FakeRpmBackend::new();
    backend.fail_on = Some("a".to_string());
    let mut plugins = NoopPlugins;

    let executor = Executor {
        pool: &pool,
        repos: &repos,
        main: &main,
        opts: ExecuteOptions::default(),
        cancel: CancelFlag::new(),
    };
    let err = executor
        .execute(
            &plan,
            "install a",
            &lock,
            &mut history,
            &mut backend,
            &mut plugins,
            &mut |_| true,
            &mut |_| {},
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ferrite::Error::Backend { .. }));
    assert!(history.list(None, None, false).unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_between_phases_is_interrupted() {
    let fixture = write_repo(&[PkgSpec::new("a", "1-1")]);
    let env = Env::new();
    let (pool, repos, plan) = plan_for(&env, &fixture, &install_jobs("a")).await;

    let main = MainConfig::default();
    let lock = InstanceLock::open(&env.lock_path()).unwrap();
    let mut history = HistoryStore::open(&env.persist_dir().join("history.db")).unwrap();
    let mut backend = FakeRpmBackend::new();
    let mut plugins = NoopPlugins;

    let cancel = CancelFlag::new();
    cancel.cancel();
    let executor = Executor {
        pool: &pool,
        repos: &repos,
        main: &main,
        opts: ExecuteOptions::default(),
        cancel,
    };
    let err = executor
        .execute(
            &plan,
            "install a",
            &lock,
            &mut history,
            &mut backend,
            &mut plugins,
            &mut |_| true,
            &mut |_| {},
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ferrite::Error::Interrupted));

    // The lock is released on the way out and can be taken again.
    let _guard = lock.acquire(ferrite::lock::LockMode::Write).unwrap();
}
