//! Composable queries over the pool.
//!
//! A [`PackageQuery`] narrows the universe by scope (installed,
//! available, extras, upgrades, ...) and by predicates on name glob,
//! architecture, repo, provided capability, owned file and EVR relation.
//! Excluded packages are invisible to every scope except the installed
//! ones.

use std::collections::HashMap;

use crate::nevra::{CmpOp, Dependency, Evr};
use crate::pool::{Package, PackageId, Pool};
use crate::util::glob_match;

/// Seconds a package counts as "recent".
const RECENT_WINDOW_SECS: i64 = 7 * 24 * 3600;

/// Which subset of the pool a query starts from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scope {
    /// Installed plus visible available packages.
    #[default]
    All,
    /// Only the installed set.
    Installed,
    /// Only visible repo packages.
    Available,
    /// Installed packages with no available counterpart of the same name.
    Extras,
    /// Available packages newer than the installed version of their name.
    Upgrades,
    /// Available packages older than the installed version of their name.
    Downgrades,
    /// Installed names carrying more than one installed version.
    Duplicates,
    /// Installed packages recorded as user-requested.
    UserInstalled,
    /// Available packages published within the recent window.
    Recent,
}

/// A reusable query description.
#[derive(Clone, Debug, Default)]
pub struct PackageQuery {
    scope: Scope,
    name_globs: Vec<String>,
    arch: Option<String>,
    repo: Option<String>,
    provides: Option<Dependency>,
    file: Option<String>,
    evr: Option<(CmpOp, Evr)>,
}

impl PackageQuery {
    /// What: Start a query over a scope.
    #[must_use]
    pub fn scope(scope: Scope) -> Self {
        Self {
            scope,
            ..Self::default()
        }
    }

    /// Restrict to names matching any of the given globs.
    #[must_use]
    pub fn names(mut self, globs: impl IntoIterator<Item = String>) -> Self {
        self.name_globs.extend(globs);
        self
    }

    /// Restrict to one architecture.
    #[must_use]
    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    /// Restrict to one repo id.
    #[must_use]
    pub fn repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// Restrict to packages providing a capability.
    #[must_use]
    pub fn provides(mut self, dep: Dependency) -> Self {
        self.provides = Some(dep);
        self
    }

    /// Restrict to packages owning a file path.
    #[must_use]
    pub fn file(mut self, path: impl Into<String>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Restrict to packages whose EVR satisfies a relation.
    #[must_use]
    pub fn evr(mut self, op: CmpOp, evr: Evr) -> Self {
        self.evr = Some((op, evr));
        self
    }

    /// What: Run the query.
    ///
    /// Inputs:
    /// - `pool`: The universe to query.
    ///
    /// Output:
    /// - Matching ids sorted by name, then newest EVR first, then repo.
    #[must_use]
    pub fn run(&self, pool: &Pool) -> Vec<PackageId> {
        let mut ids: Vec<PackageId> = self
            .base_set(pool)
            .into_iter()
            .filter(|&id| self.matches(pool, id))
            .collect();
        ids.sort_by(|&a, &b| {
            let pa = pool.package(a);
            let pb = pool.package(b);
            pa.name()
                .cmp(pb.name())
                .then_with(|| pb.evr().cmp(pa.evr()))
                .then_with(|| pa.repo_id.cmp(&pb.repo_id))
        });
        ids
    }

    fn base_set(&self, pool: &Pool) -> Vec<PackageId> {
        match self.scope {
            Scope::All => pool
                .all_ids()
                .filter(|&id| pool.is_installed(id) || visible_available(pool, id))
                .collect(),
            Scope::Installed | Scope::UserInstalled | Scope::Duplicates | Scope::Extras => {
                pool.installed_ids().to_vec()
            }
            Scope::Available | Scope::Upgrades | Scope::Downgrades | Scope::Recent => pool
                .all_ids()
                .filter(|&id| visible_available(pool, id))
                .collect(),
        }
    }

    fn matches(&self, pool: &Pool, id: PackageId) -> bool {
        let pkg = pool.package(id);
        if !self.scope_matches(pool, id, pkg) {
            return false;
        }
        if !self.name_globs.is_empty()
            && !self
                .name_globs
                .iter()
                .any(|g| glob_match(g, pkg.name()))
        {
            return false;
        }
        if let Some(arch) = &self.arch {
            if pkg.arch() != arch {
                return false;
            }
        }
        if let Some(repo) = &self.repo {
            if &pkg.repo_id != repo {
                return false;
            }
        }
        if let Some(dep) = &self.provides {
            let satisfied = pkg.provides.iter().any(|p| dep.intersects(p))
                || (dep.name == pkg.nevra.name && dep.matches_evr(pkg.evr()));
            if !satisfied {
                return false;
            }
        }
        if let Some(file) = &self.file {
            if !pkg.files.iter().any(|f| f == file) {
                return false;
            }
        }
        if let Some((op, anchor)) = &self.evr {
            let rel = Dependency::versioned(pkg.nevra.name.clone(), *op, anchor.clone());
            if !rel.matches_evr(pkg.evr()) {
                return false;
            }
        }
        true
    }

    fn scope_matches(&self, pool: &Pool, _id: PackageId, pkg: &Package) -> bool {
        match self.scope {
            Scope::All | Scope::Installed | Scope::Available => true,
            Scope::Extras => pool
                .ids_by_name(pkg.name())
                .iter()
                .all(|&other| pool.is_installed(other)),
            Scope::Upgrades => pool
                .installed_by_name(pkg.name())
                .is_some_and(|inst| pkg.evr() > pool.package(inst).evr()),
            Scope::Downgrades => pool
                .installed_by_name(pkg.name())
                .is_some_and(|inst| pkg.evr() < pool.package(inst).evr()),
            Scope::Duplicates => {
                let versions: Vec<&Evr> = pool
                    .installed_all_by_name(pkg.name())
                    .iter()
                    .map(|&i| pool.package(i).evr())
                    .collect();
                versions.len() > 1
            }
            Scope::UserInstalled => pool.is_user_installed(pkg.name()),
            Scope::Recent => {
                let now = chrono::Utc::now().timestamp();
                pkg.file_time > 0 && now - pkg.file_time <= RECENT_WINDOW_SECS
            }
        }
    }
}

/// What: Reduce upgrade candidates to the newest per (name, arch).
///
/// Inputs:
/// - `pool`: The universe.
/// - `ids`: Raw query results.
///
/// Output:
/// - At most one id per (name, arch), the best-ranked candidate.
#[must_use]
pub fn newest_per_name_arch(pool: &Pool, ids: &[PackageId]) -> Vec<PackageId> {
    let mut best: HashMap<(String, String), PackageId> = HashMap::new();
    for &id in ids {
        let pkg = pool.package(id);
        let key = (pkg.name().to_string(), pkg.arch().to_string());
        best.entry(key)
            .and_modify(|cur| {
                if pool.compare_candidates(id, *cur) == std::cmp::Ordering::Greater {
                    *cur = id;
                }
            })
            .or_insert(id);
    }
    let mut out: Vec<PackageId> = best.into_values().collect();
    out.sort_by(|&a, &b| {
        pool.package(a)
            .name()
            .cmp(pool.package(b).name())
            .then_with(|| pool.package(a).arch().cmp(pool.package(b).arch()))
    });
    out
}

fn visible_available(pool: &Pool, id: PackageId) -> bool {
    !pool.is_installed(id)
        && !pool.is_excluded(id)
        && pool.arch_compatible(pool.package(id).arch())
}
