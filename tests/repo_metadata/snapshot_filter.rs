//! Snapshot cutoff applied during metadata loading: packages published
//! after the cutoff never reach the pool.

use ferrite::cache::BlobStore;
use ferrite::config::MainConfig;
use ferrite::config::repo::RepoConfig;
use ferrite::crypto::keyring::Keyring;
use ferrite::plugin::NoopPlugins;
use ferrite::pool::Pool;
use ferrite::repo::{FetchOptions, RepoLoader};
use ferrite::solver::{SelectScope, select};

use crate::common::{Env, PkgSpec, write_repo};

#[tokio::test]
async fn cutoff_hides_later_packages_from_queries() {
    let fixture = write_repo(&[
        PkgSpec::new("early", "1.0-1").file_time(100),
        PkgSpec::new("late", "2.0-1").file_time(200),
    ]);
    let env = Env::new();
    let mut repo = RepoConfig::new("base");
    repo.base_urls = vec![fixture.base_url.clone()];

    let main = MainConfig::default();
    let store = BlobStore::new(env.cache_dir());
    let opts = FetchOptions {
        snapshot_cutoff: Some(150),
        ..FetchOptions::default()
    };
    let loader = RepoLoader::new(&main, &store, &opts);
    let mut keyring = Keyring::new();
    let mut plugins = NoopPlugins;
    let loaded = loader.load(&repo, &mut keyring, &mut plugins).await.unwrap();

    assert_eq!(loaded.packages.len(), 1);
    assert_eq!(loaded.packages[0].nevra.name, "early");

    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    pool.add_repo("base", 50, loaded.packages.clone());

    assert!(select(&pool, "early", SelectScope::Available).is_ok());
    match select(&pool, "late", SelectScope::Available) {
        Err(ferrite::Error::NoMatch { spec }) => assert_eq!(spec, "late"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn cutoff_at_or_above_all_times_keeps_everything() {
    let fixture = write_repo(&[
        PkgSpec::new("early", "1.0-1").file_time(100),
        PkgSpec::new("late", "2.0-1").file_time(200),
    ]);
    let env = Env::new();
    let mut repo = RepoConfig::new("base");
    repo.base_urls = vec![fixture.base_url.clone()];

    let main = MainConfig::default();
    let store = BlobStore::new(env.cache_dir());
    let opts = FetchOptions {
        snapshot_cutoff: Some(200),
        ..FetchOptions::default()
    };
    let loader = RepoLoader::new(&main, &store, &opts);
    let mut keyring = Keyring::new();
    let mut plugins = NoopPlugins;
    let loaded = loader.load(&repo, &mut keyring, &mut plugins).await.unwrap();
    assert_eq!(loaded.packages.len(), 2);
}
