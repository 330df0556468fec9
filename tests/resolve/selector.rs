//! Selector ladder behavior: NEVRA, name with arch and relation, glob,
//! capability, file path, case-insensitive retry.

use ferrite::nevra::Dependency;
use ferrite::pool::Pool;
use ferrite::solver::{SelectScope, select};

use crate::common::repo_pkg;

fn sample_pool() -> Pool {
    let mut pool = Pool::new();
    pool.set_arch("x86_64");
    let mut web = repo_pkg("WebServer", "2.4-1", &[], &[]);
    web.provides.push(Dependency::parse("httpd").unwrap());
    web.files.push("/usr/sbin/webserver".to_string());
    pool.add_repo(
        "r",
        50,
        vec![
            web,
            repo_pkg("tool", "1.0-1", &[], &[]),
            repo_pkg("tool-extra", "1.0-1", &[], &[]),
        ],
    );
    pool
}

#[test]
fn exact_nevra_wins_first() {
    let pool = sample_pool();
    let ids = select(&pool, "tool-1.0-1.x86_64", SelectScope::Available).unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(pool.package(ids[0]).name(), "tool");
}

#[test]
fn name_with_arch_and_relation() {
    let pool = sample_pool();
    let ids = select(&pool, "tool.x86_64", SelectScope::Available).unwrap();
    assert_eq!(ids.len(), 1);

    let ids = select(&pool, "tool >= 1.0", SelectScope::Available).unwrap();
    assert_eq!(ids.len(), 1);

    assert!(select(&pool, "tool > 1.0", SelectScope::Available).is_err());
}

#[test]
fn glob_matches_names() {
    let pool = sample_pool();
    let ids = select(&pool, "tool*", SelectScope::Available).unwrap();
    assert_eq!(ids.len(), 2);
}

#[test]
fn capability_and_file_path() {
    let pool = sample_pool();
    let ids = select(&pool, "httpd", SelectScope::Available).unwrap();
    assert_eq!(pool.package(ids[0]).name(), "WebServer");

    let ids = select(&pool, "/usr/sbin/webserver", SelectScope::Available).unwrap();
    assert_eq!(pool.package(ids[0]).name(), "WebServer");
}

#[test]
fn case_insensitive_retry_is_last() {
    let pool = sample_pool();
    let ids = select(&pool, "webserver", SelectScope::Available).unwrap();
    assert_eq!(pool.package(ids[0]).name(), "WebServer");
}

#[test]
fn no_match_reports_the_spec() {
    let pool = sample_pool();
    match select(&pool, "no-such-package", SelectScope::Available) {
        Err(ferrite::Error::NoMatch { spec }) => assert_eq!(spec, "no-such-package"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn excluded_packages_are_invisible_to_selection() {
    let mut pool = sample_pool();
    pool.apply_excludes(&["tool".to_string()]);
    let ids = select(&pool, "tool*", SelectScope::Available).unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(pool.package(ids[0]).name(), "tool-extra");
}
