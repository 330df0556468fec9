//! Metadata loading over `file://` repos: parsing, the solv cache,
//! freshness, and cache-only mode.

use ferrite::cache::BlobStore;
use ferrite::config::MainConfig;
use ferrite::config::repo::RepoConfig;
use ferrite::crypto::keyring::Keyring;
use ferrite::plugin::NoopPlugins;
use ferrite::repo::{FetchOptions, RepoLoader};

use crate::common::{Env, PkgSpec, write_repo};

fn repo_config(id: &str, base_url: &str) -> RepoConfig {
    let mut repo = RepoConfig::new(id);
    repo.base_urls = vec![base_url.to_string()];
    repo
}

async fn load(
    env: &Env,
    repo: &RepoConfig,
    opts: FetchOptions,
) -> ferrite::Result<ferrite::repo::LoadedRepo> {
    let main = MainConfig::default();
    let store = BlobStore::new(env.cache_dir());
    let loader = RepoLoader::new(&main, &store, &opts);
    let mut keyring = Keyring::new();
    let mut plugins = NoopPlugins;
    loader.load(repo, &mut keyring, &mut plugins).await
}

#[tokio::test]
async fn first_load_parses_xml_and_writes_solv_cache() {
    let fixture = write_repo(&[
        PkgSpec::new("alpha", "1.0-1").requires("beta"),
        PkgSpec::new("beta", "2.0-1"),
    ]);
    let env = Env::new();
    let repo = repo_config("base", &fixture.base_url);

    let loaded = load(&env, &repo, FetchOptions::default()).await.unwrap();
    assert_eq!(loaded.packages.len(), 2);
    assert!(!loaded.from_solv_cache);
    assert_eq!(loaded.base_url, fixture.base_url);

    let alpha = loaded
        .packages
        .iter()
        .find(|p| p.nevra.name == "alpha")
        .unwrap();
    assert_eq!(alpha.requires.len(), 1);
    assert!(alpha.checksum.is_some());

    // The second load round-trips through the binary cache with an
    // identical package set.
    let reloaded = load(&env, &repo, FetchOptions::default()).await.unwrap();
    assert!(reloaded.from_solv_cache);
    assert_eq!(reloaded.packages, loaded.packages);
}

#[tokio::test]
async fn fresh_cache_shields_upstream_changes_until_refresh() {
    let fixture = write_repo(&[PkgSpec::new("alpha", "1.0-1")]);
    let env = Env::new();
    let repo = repo_config("base", &fixture.base_url);

    load(&env, &repo, FetchOptions::default()).await.unwrap();

    // Upstream publishes a new package; the cached metadata is still
    // fresh, so nothing changes without --refresh.
    fixture.rewrite(&[
        PkgSpec::new("alpha", "1.0-1"),
        PkgSpec::new("gamma", "1.0-1"),
    ]);
    let cached = load(&env, &repo, FetchOptions::default()).await.unwrap();
    assert_eq!(cached.packages.len(), 1);

    let refreshed = load(
        &env,
        &repo,
        FetchOptions {
            refresh: true,
            ..FetchOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(refreshed.packages.len(), 2);
    assert!(!refreshed.from_solv_cache);
}

#[tokio::test]
async fn cacheonly_without_cache_is_cache_disabled() {
    let fixture = write_repo(&[PkgSpec::new("alpha", "1.0-1")]);
    let env = Env::new();
    let repo = repo_config("base", &fixture.base_url);

    let opts = FetchOptions {
        cacheonly: true,
        ..FetchOptions::default()
    };
    match load(&env, &repo, opts).await {
        Err(ferrite::Error::CacheDisabled { repo }) => assert_eq!(repo, "base"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn cacheonly_with_cache_serves_offline() {
    let fixture = write_repo(&[PkgSpec::new("alpha", "1.0-1")]);
    let env = Env::new();
    let repo = repo_config("base", &fixture.base_url);

    load(&env, &repo, FetchOptions::default()).await.unwrap();

    // Even with the upstream gone, cache-only mode still answers.
    drop(fixture);
    let opts = FetchOptions {
        cacheonly: true,
        ..FetchOptions::default()
    };
    let loaded = load(&env, &repo, opts).await.unwrap();
    assert_eq!(loaded.packages.len(), 1);
}

#[tokio::test]
async fn repo_without_urls_fails_no_base_url() {
    let env = Env::new();
    let repo = RepoConfig::new("empty");
    match load(&env, &repo, FetchOptions::default()).await {
        Err(ferrite::Error::NoBaseUrl { repo }) => assert_eq!(repo, "empty"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn first_working_base_url_is_retained() {
    let fixture = write_repo(&[PkgSpec::new("alpha", "1.0-1")]);
    let env = Env::new();
    let mut repo = RepoConfig::new("base");
    repo.base_urls = vec![
        "file:///nonexistent/mirror".to_string(),
        fixture.base_url.clone(),
    ];

    let loaded = load(&env, &repo, FetchOptions::default()).await.unwrap();
    assert_eq!(loaded.base_url, fixture.base_url);
    assert_eq!(loaded.packages.len(), 1);
}
