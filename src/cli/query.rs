//! Read-only query commands.
//!
//! `list`, `info`, `search`, `provides`, `repolist`, `repoquery`,
//! `check-update` and `updateinfo`. These take the instance lock in
//! shared mode (via the session) and never mutate anything.

use serde_json::json;

use crate::app::Session;
use crate::error::{Error, Result};
use crate::nevra::Dependency;
use crate::pool::PackageId;
use crate::pool::query::{PackageQuery, Scope, newest_per_name_arch};
use crate::repo::updateinfo::Advisory;
use crate::util::glob_match;

/// Parse the optional leading scope word of `list`/`info` arguments.
fn split_scope(args: &[String]) -> (Scope, Vec<String>) {
    let Some(first) = args.first() else {
        return (Scope::All, Vec::new());
    };
    let scope = match first.as_str() {
        "installed" => Some(Scope::Installed),
        "available" => Some(Scope::Available),
        "all" => Some(Scope::All),
        "extras" => Some(Scope::Extras),
        "upgrades" | "updates" => Some(Scope::Upgrades),
        "downgrades" => Some(Scope::Downgrades),
        "duplicates" => Some(Scope::Duplicates),
        "userinstalled" => Some(Scope::UserInstalled),
        "recent" => Some(Scope::Recent),
        _ => None,
    };
    match scope {
        Some(scope) => (scope, args[1..].to_vec()),
        None => (Scope::All, args.to_vec()),
    }
}

/// What: The `list` command.
pub async fn run_list(session: &mut Session, args: &[String]) -> Result<i32> {
    session.load_metadata(true).await?;
    let (scope, patterns) = split_scope(args);
    let ids = PackageQuery::scope(scope).names(patterns).run(&session.pool);
    session.reporter.package_list(&session.pool, &ids);
    Ok(0)
}

/// What: The `info` command.
pub async fn run_info(session: &mut Session, args: &[String]) -> Result<i32> {
    session.load_metadata(true).await?;
    let (scope, patterns) = split_scope(args);
    let ids = PackageQuery::scope(scope).names(patterns).run(&session.pool);
    if ids.is_empty() {
        return Err(Error::NoMatch {
            spec: args.join(" "),
        });
    }
    session.reporter.package_info(&session.pool, &ids);
    Ok(0)
}

/// What: The `search` command: substring match over names and summaries.
pub async fn run_search(session: &mut Session, needles: &[String]) -> Result<i32> {
    session.load_metadata(true).await?;
    let pool = &session.pool;

    let mut name_hits: Vec<PackageId> = Vec::new();
    let mut summary_hits: Vec<PackageId> = Vec::new();
    let all = PackageQuery::scope(Scope::All).run(pool);
    for id in all {
        let pkg = pool.package(id);
        let name = pkg.name().to_ascii_lowercase();
        let summary = pkg.summary.to_ascii_lowercase();
        let in_name = needles.iter().any(|n| name.contains(&n.to_ascii_lowercase()));
        let in_summary = needles
            .iter()
            .any(|n| summary.contains(&n.to_ascii_lowercase()));
        if in_name {
            name_hits.push(id);
        } else if in_summary {
            summary_hits.push(id);
        }
    }

    if name_hits.is_empty() && summary_hits.is_empty() {
        return Err(Error::NoMatch {
            spec: needles.join(" "),
        });
    }

    let ordered: Vec<PackageId> = name_hits.into_iter().chain(summary_hits).collect();
    if session.reporter.mode() == crate::output::OutputMode::Json {
        session.reporter.package_list(pool, &ordered);
    } else {
        for id in ordered {
            let pkg = pool.package(id);
            session
                .reporter
                .line(&format!("{} : {}", pkg.name(), pkg.summary));
        }
    }
    Ok(0)
}

/// What: The `provides` command: who provides a capability or file.
pub async fn run_provides(session: &mut Session, spec: &str) -> Result<i32> {
    session.load_metadata(true).await?;
    let pool = &session.pool;

    let query = if spec.starts_with('/') {
        PackageQuery::scope(Scope::All).file(spec)
    } else {
        let dep = Dependency::parse(spec).ok_or_else(|| Error::NoMatch {
            spec: spec.to_string(),
        })?;
        PackageQuery::scope(Scope::All).provides(dep)
    };
    let ids = query.run(pool);
    if ids.is_empty() {
        return Err(Error::NoMatch {
            spec: spec.to_string(),
        });
    }
    if session.reporter.mode() == crate::output::OutputMode::Json {
        session.reporter.package_list(pool, &ids);
    } else {
        for id in ids {
            let pkg = pool.package(id);
            session
                .reporter
                .line(&format!("{} : {}", pkg.nevra, pkg.summary));
        }
    }
    Ok(0)
}

/// What: The `repolist` command.
pub fn run_repolist(session: &Session, which: Option<&str>) -> Result<i32> {
    let which = which.unwrap_or("enabled");
    let repos: Vec<_> = session
        .config
        .repos
        .iter()
        .filter(|r| match which {
            "enabled" => r.enabled,
            "disabled" => !r.enabled,
            "all" => true,
            _ => true,
        })
        .collect();

    let docs: Vec<serde_json::Value> = repos
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "name": r.name,
                "enabled": r.enabled,
                "priority": r.priority,
                "baseurls": r.base_urls,
            })
        })
        .collect();
    session.reporter.json(&serde_json::Value::Array(docs));

    session
        .reporter
        .line(&format!("{:<20} {:<40} {}", "repo id", "repo name", "status"));
    for repo in repos {
        session.reporter.line(&format!(
            "{:<20} {:<40} {}",
            repo.id,
            repo.name,
            if repo.enabled { "enabled" } else { "disabled" }
        ));
    }
    Ok(0)
}

/// What: The `repoquery` command.
#[allow(clippy::fn_params_excessive_bools)]
pub async fn run_repoquery(
    session: &mut Session,
    patterns: &[String],
    installed: bool,
    available: bool,
    requires: bool,
    provides: bool,
    files: bool,
    changelogs: bool,
) -> Result<i32> {
    session.load_metadata(true).await?;
    let scope = match (installed, available) {
        (true, false) => Scope::Installed,
        (false, true) => Scope::Available,
        _ => Scope::All,
    };
    let ids = PackageQuery::scope(scope)
        .names(patterns.to_vec())
        .run(&session.pool);

    let pool = &session.pool;
    for id in ids {
        let pkg = pool.package(id);
        if requires {
            for dep in pkg.requires.iter().chain(&pkg.requires_pre) {
                session.reporter.line(&dep.to_string());
            }
        } else if provides {
            for dep in &pkg.provides {
                session.reporter.line(&dep.to_string());
            }
        } else if files {
            for file in &pkg.files {
                session.reporter.line(file);
            }
        } else if changelogs {
            for entry in &pkg.changelogs {
                session.reporter.line(&format!(
                    "* {} {}\n{}",
                    crate::util::format_stamp(entry.time),
                    entry.author,
                    entry.text
                ));
            }
        } else {
            session.reporter.line(&pkg.nevra.to_string());
        }
    }
    Ok(0)
}

/// What: The `check-update` command.
///
/// Output:
/// - `100` when updates are pending, `0` otherwise.
pub async fn run_check_update(session: &mut Session, patterns: &[String]) -> Result<i32> {
    session.load_metadata(true).await?;
    let pool = &session.pool;
    let raw = PackageQuery::scope(Scope::Upgrades)
        .names(patterns.to_vec())
        .run(pool);
    let mut newest = newest_per_name_arch(pool, &raw);

    if session.opts.security.is_active() {
        let allowed = session.opts.security.allowed_nevras(&session.advisories);
        newest.retain(|&id| allowed.contains(&pool.package(id).nevra));
    }

    session.reporter.package_list(pool, &newest);
    Ok(if newest.is_empty() { 0 } else { 100 })
}

/// Advisories whose packages would update something installed.
fn applicable_advisories<'a>(session: &'a Session) -> Vec<&'a Advisory> {
    let pool = &session.pool;
    session
        .advisories
        .iter()
        .filter(|adv| {
            adv.packages.iter().any(|nevra| {
                pool.installed_by_name(&nevra.name)
                    .is_some_and(|id| pool.package(id).evr() < &nevra.evr)
            })
        })
        .filter(|adv| {
            let sec = &session.opts.security;
            if !sec.is_active() {
                return true;
            }
            (!sec.security_only || adv.kind() == crate::repo::updateinfo::AdvisoryKind::Security)
                && sec
                    .min_severity
                    .as_deref()
                    .is_none_or(|floor| adv.severity_at_least(floor))
                && (!sec.reboot_required || adv.reboot_suggested)
        })
        .collect()
}

/// What: The `updateinfo` command.
///
/// Inputs:
/// - `args`: Optional mode (`summary`, `list`, `info`) then name globs.
pub async fn run_updateinfo(session: &mut Session, args: &[String]) -> Result<i32> {
    session.load_metadata(true).await?;

    let (mode, patterns) = match args.first().map(String::as_str) {
        Some("summary") => ("summary", &args[1..]),
        Some("list") => ("list", &args[1..]),
        Some("info") => ("info", &args[1..]),
        _ => ("summary", args),
    };

    let mut advisories = applicable_advisories(session);
    if !patterns.is_empty() {
        advisories.retain(|adv| {
            adv.packages
                .iter()
                .any(|nevra| patterns.iter().any(|p| glob_match(p, &nevra.name)))
        });
    }

    match mode {
        "summary" => {
            let mut security = 0;
            let mut bugfix = 0;
            let mut enhancement = 0;
            let mut other = 0;
            for adv in &advisories {
                match adv.kind() {
                    crate::repo::updateinfo::AdvisoryKind::Security => security += 1,
                    crate::repo::updateinfo::AdvisoryKind::Bugfix => bugfix += 1,
                    crate::repo::updateinfo::AdvisoryKind::Enhancement => enhancement += 1,
                    _ => other += 1,
                }
            }
            session.reporter.json(&json!({
                "security": security,
                "bugfix": bugfix,
                "enhancement": enhancement,
                "other": other,
            }));
            session.reporter.line(&format!("{security} Security notice(s)"));
            session.reporter.line(&format!("{bugfix} Bugfix notice(s)"));
            session
                .reporter
                .line(&format!("{enhancement} Enhancement notice(s)"));
            if other > 0 {
                session.reporter.line(&format!("{other} Other notice(s)"));
            }
        }
        "list" => session.reporter.advisories(&advisories),
        _ => {
            session.reporter.advisories(&advisories);
            for adv in &advisories {
                session.reporter.line("");
                session.reporter.line(&adv.description);
            }
        }
    }
    Ok(0)
}
