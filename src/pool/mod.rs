//! In-memory package universe.
//!
//! The pool owns every [`Package`] the session knows about: the installed
//! set, each enabled repository's packages, and any local `.rpm` files
//! given on the command line. Packages live in an arena indexed by
//! [`PackageId`]; secondary maps index name, provided capability and file
//! path. An exclusion mask (from `exclude=` configuration and
//! `--exclude`) hides available packages from queries and from the
//! solver; the installed set is never maskable.

pub mod query;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::ChecksumKind;
use crate::nevra::{Dependency, Evr, Nevra};
use crate::util::glob_match;

/// Repo id of the installed set.
pub const SYSTEM_REPO_ID: &str = "@System";
/// Repo id of local `.rpm` files passed on the command line.
pub const CMDLINE_REPO_ID: &str = "@commandline";

/// Stable handle of one package within its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub u32);

/// One changelog entry from the "other" metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Changelog {
    /// Author line.
    pub author: String,
    /// Unix timestamp of the entry.
    pub time: i64,
    /// Entry text.
    pub text: String,
}

/// Everything known about one package.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Package {
    /// Canonical identity.
    pub nevra: Nevra,
    /// Originating repo id, [`SYSTEM_REPO_ID`] or [`CMDLINE_REPO_ID`].
    pub repo_id: String,
    /// One-line summary.
    pub summary: String,
    /// Long description.
    pub description: String,
    /// Upstream URL.
    pub url: String,
    /// License tag.
    pub license: String,
    /// Installed size in bytes.
    pub install_size: u64,
    /// Download size in bytes.
    pub download_size: u64,
    /// Publication time from the repo metadata (`<time file=...>`).
    pub file_time: i64,
    /// Build time.
    pub build_time: i64,
    /// Location of the RPM relative to its repo base URL.
    pub location: String,
    /// Declared artifact checksum.
    pub checksum: Option<(ChecksumKind, String)>,
    /// Source RPM file name.
    pub source_rpm: String,
    /// Provided capabilities.
    pub provides: Vec<Dependency>,
    /// Required capabilities.
    pub requires: Vec<Dependency>,
    /// Pre-transaction requirements.
    pub requires_pre: Vec<Dependency>,
    /// Conflicting capabilities.
    pub conflicts: Vec<Dependency>,
    /// Obsoleted capabilities.
    pub obsoletes: Vec<Dependency>,
    /// Weak forward dependencies.
    pub recommends: Vec<Dependency>,
    /// Hints, never enforced.
    pub suggests: Vec<Dependency>,
    /// Weak reverse dependencies.
    pub supplements: Vec<Dependency>,
    /// Reverse hints, never enforced.
    pub enhances: Vec<Dependency>,
    /// Owned file paths.
    pub files: Vec<String>,
    /// Changelog entries when the "other" metadata was loaded.
    pub changelogs: Vec<Changelog>,
}

impl Package {
    /// What: Create a minimally filled package for a NEVRA.
    ///
    /// Inputs:
    /// - `nevra`: Identity.
    /// - `repo_id`: Originating repo.
    ///
    /// Output:
    /// - A package with empty metadata, ready for enrichment.
    #[must_use]
    pub fn new(nevra: Nevra, repo_id: impl Into<String>) -> Self {
        Self {
            nevra,
            repo_id: repo_id.into(),
            summary: String::new(),
            description: String::new(),
            url: String::new(),
            license: String::new(),
            install_size: 0,
            download_size: 0,
            file_time: 0,
            build_time: 0,
            location: String::new(),
            checksum: None,
            source_rpm: String::new(),
            provides: Vec::new(),
            requires: Vec::new(),
            requires_pre: Vec::new(),
            conflicts: Vec::new(),
            obsoletes: Vec::new(),
            recommends: Vec::new(),
            suggests: Vec::new(),
            supplements: Vec::new(),
            enhances: Vec::new(),
            files: Vec::new(),
            changelogs: Vec::new(),
        }
    }

    /// Package name shorthand.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.nevra.name
    }

    /// EVR shorthand.
    #[must_use]
    pub fn evr(&self) -> &Evr {
        &self.nevra.evr
    }

    /// Architecture shorthand.
    #[must_use]
    pub fn arch(&self) -> &str {
        &self.nevra.arch
    }

    /// What: The package's self-provide (`name = evr`).
    ///
    /// Output:
    /// - The implicit capability every package carries.
    #[must_use]
    pub fn self_provide(&self) -> Dependency {
        Dependency::versioned(
            self.nevra.name.clone(),
            crate::nevra::CmpOp::Eq,
            self.nevra.evr.clone(),
        )
    }
}

/// Registered repository metadata kept by the pool for tie-breaking.
#[derive(Clone, Debug)]
struct RepoEntry {
    id: String,
    priority: u32,
}

/// The package universe of one session.
#[derive(Debug, Default)]
pub struct Pool {
    packages: Vec<Package>,
    by_name: HashMap<String, Vec<PackageId>>,
    by_provides: HashMap<String, Vec<PackageId>>,
    by_file: HashMap<String, Vec<PackageId>>,
    installed: Vec<PackageId>,
    excluded: HashSet<PackageId>,
    repos: Vec<RepoEntry>,
    arch: String,
    rootdir: PathBuf,
    /// Names the history store says were installed by user request.
    user_installed: HashSet<String>,
}

impl Pool {
    /// What: Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// What: Set the architecture candidates are filtered by.
    pub fn set_arch(&mut self, arch: impl Into<String>) {
        self.arch = arch.into();
    }

    /// The configured architecture.
    #[must_use]
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// What: Set the install root the pool describes.
    pub fn set_rootdir(&mut self, rootdir: impl Into<PathBuf>) {
        self.rootdir = rootdir.into();
    }

    /// The install root.
    #[must_use]
    pub fn rootdir(&self) -> &std::path::Path {
        &self.rootdir
    }

    /// What: Record which package names are user-installed.
    ///
    /// Inputs:
    /// - `names`: Names with the auto flag unset in history.
    pub fn set_user_installed(&mut self, names: impl IntoIterator<Item = String>) {
        self.user_installed = names.into_iter().collect();
    }

    /// Whether a name is recorded as user-installed.
    #[must_use]
    pub fn is_user_installed(&self, name: &str) -> bool {
        self.user_installed.contains(name)
    }

    /// What: Ingest the installed set.
    ///
    /// Inputs:
    /// - `packages`: Packages enumerated from the RPM database; their
    ///   repo id is forced to [`SYSTEM_REPO_ID`].
    pub fn add_installed(&mut self, packages: Vec<Package>) {
        for mut pkg in packages {
            pkg.repo_id = SYSTEM_REPO_ID.to_string();
            let id = self.insert(pkg);
            self.installed.push(id);
        }
        debug!(count = self.installed.len(), "installed set loaded");
    }

    /// What: Ingest one repository's packages.
    ///
    /// Inputs:
    /// - `repo_id`: Repository id; stamped onto every package.
    /// - `priority`: Tie-break priority, lower wins.
    /// - `packages`: Parsed repo metadata.
    pub fn add_repo(&mut self, repo_id: &str, priority: u32, packages: Vec<Package>) {
        self.repos.push(RepoEntry {
            id: repo_id.to_string(),
            priority,
        });
        let mut count = 0usize;
        for mut pkg in packages {
            pkg.repo_id = repo_id.to_string();
            self.insert(pkg);
            count += 1;
        }
        debug!(repo = repo_id, count, "repository loaded into pool");
    }

    /// What: Ingest a local `.rpm` file's package as a one-member repo.
    pub fn add_cmdline(&mut self, mut pkg: Package) -> PackageId {
        pkg.repo_id = CMDLINE_REPO_ID.to_string();
        self.insert(pkg)
    }

    fn insert(&mut self, pkg: Package) -> PackageId {
        let id = PackageId(u32::try_from(self.packages.len()).expect("pool size fits u32"));
        self.by_name
            .entry(pkg.nevra.name.clone())
            .or_default()
            .push(id);
        for provide in &pkg.provides {
            self.by_provides
                .entry(provide.name.clone())
                .or_default()
                .push(id);
        }
        for file in &pkg.files {
            self.by_file.entry(file.clone()).or_default().push(id);
        }
        self.packages.push(pkg);
        id
    }

    /// Resolve an id to its package.
    #[must_use]
    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.0 as usize]
    }

    /// Number of packages in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the pool holds no packages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// All ids in arena order.
    pub fn all_ids(&self) -> impl Iterator<Item = PackageId> + '_ {
        (0..self.packages.len()).map(|i| PackageId(i as u32))
    }

    /// Ids of the installed subset.
    #[must_use]
    pub fn installed_ids(&self) -> &[PackageId] {
        &self.installed
    }

    /// Whether an id belongs to the installed subset.
    #[must_use]
    pub fn is_installed(&self, id: PackageId) -> bool {
        self.package(id).repo_id == SYSTEM_REPO_ID
    }

    /// Priority of a repo, for candidate tie-breaking.
    #[must_use]
    pub fn repo_priority(&self, repo_id: &str) -> u32 {
        self.repos
            .iter()
            .find(|r| r.id == repo_id)
            .map_or(crate::config::repo::DEFAULT_PRIORITY, |r| r.priority)
    }

    /// What: Compile exclusion globs into the package mask.
    ///
    /// Inputs:
    /// - `patterns`: Name globs from configuration and the command line.
    ///
    /// Output:
    /// - Number of packages newly masked.
    ///
    /// Details:
    /// - Installed packages are never masked; queries over the installed
    ///   scope always see the full set.
    pub fn apply_excludes(&mut self, patterns: &[String]) -> usize {
        let mut masked = 0;
        for id in 0..self.packages.len() {
            let id = PackageId(id as u32);
            if self.is_installed(id) || self.excluded.contains(&id) {
                continue;
            }
            let name = self.package(id).name();
            if patterns.iter().any(|p| glob_match(p, name)) {
                self.excluded.insert(id);
                masked += 1;
            }
        }
        if masked > 0 {
            debug!(masked, "packages masked by excludes");
        }
        masked
    }

    /// What: Mask available packages older than configured version floors.
    ///
    /// Inputs:
    /// - `minversions`: `name=evr` entries.
    pub fn apply_minversions(&mut self, minversions: &[String]) {
        for entry in minversions {
            let Some((name, evr)) = entry.split_once('=') else {
                continue;
            };
            let Some(floor) = Evr::parse(evr) else { continue };
            let Some(ids) = self.by_name.get(name) else {
                continue;
            };
            for id in ids.clone() {
                if !self.is_installed(id) && self.package(id).evr() < &floor {
                    self.excluded.insert(id);
                }
            }
        }
    }

    /// What: Mask one concrete package at runtime.
    pub fn exclude_id(&mut self, id: PackageId) {
        if !self.is_installed(id) {
            self.excluded.insert(id);
        }
    }

    /// Whether an id is masked.
    #[must_use]
    pub fn is_excluded(&self, id: PackageId) -> bool {
        self.excluded.contains(&id)
    }

    /// Ids sharing a package name, mask not applied.
    #[must_use]
    pub fn ids_by_name(&self, name: &str) -> &[PackageId] {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// Ids providing a capability name, mask not applied.
    #[must_use]
    pub fn ids_by_provides(&self, capability: &str) -> &[PackageId] {
        self.by_provides.get(capability).map_or(&[], Vec::as_slice)
    }

    /// Ids owning a file path, mask not applied.
    #[must_use]
    pub fn ids_by_file(&self, path: &str) -> &[PackageId] {
        self.by_file.get(path).map_or(&[], Vec::as_slice)
    }

    /// All capability names with at least one provider.
    pub fn provide_names(&self) -> impl Iterator<Item = &str> {
        self.by_provides.keys().map(String::as_str)
    }

    /// What: Arch compatibility test against the pool arch.
    ///
    /// Output:
    /// - `true` for `noarch`, the configured arch, or everything when no
    ///   arch was configured. Source packages never install.
    #[must_use]
    pub fn arch_compatible(&self, arch: &str) -> bool {
        if arch == "src" || arch == "nosrc" {
            return false;
        }
        arch == "noarch" || self.arch.is_empty() || arch == self.arch
    }

    /// What: Visible (unmasked, arch-compatible) candidate ids for a name.
    ///
    /// Output:
    /// - Available candidates; installed entries are not included.
    #[must_use]
    pub fn visible_candidates(&self, name: &str) -> Vec<PackageId> {
        self.ids_by_name(name)
            .iter()
            .copied()
            .filter(|&id| {
                !self.is_installed(id)
                    && !self.is_excluded(id)
                    && self.arch_compatible(self.package(id).arch())
            })
            .collect()
    }

    /// What: The newest installed package of a name, if any.
    #[must_use]
    pub fn installed_by_name(&self, name: &str) -> Option<PackageId> {
        self.ids_by_name(name)
            .iter()
            .copied()
            .filter(|&id| self.is_installed(id))
            .max_by(|&a, &b| self.package(a).evr().cmp(self.package(b).evr()))
    }

    /// All installed packages of a name, for installonly handling.
    #[must_use]
    pub fn installed_all_by_name(&self, name: &str) -> Vec<PackageId> {
        self.ids_by_name(name)
            .iter()
            .copied()
            .filter(|&id| self.is_installed(id))
            .collect()
    }

    /// What: Rank two candidates for selection.
    ///
    /// Output:
    /// - Ordering where `Greater` means `a` is the better pick: newest
    ///   EVR first, then lower repo priority number, then lexicographically
    ///   smaller repo id.
    #[must_use]
    pub fn compare_candidates(&self, a: PackageId, b: PackageId) -> std::cmp::Ordering {
        let pa = self.package(a);
        let pb = self.package(b);
        pa.evr()
            .cmp(pb.evr())
            .then_with(|| {
                self.repo_priority(&pb.repo_id)
                    .cmp(&self.repo_priority(&pa.repo_id))
            })
            .then_with(|| pb.repo_id.cmp(&pa.repo_id))
    }

    /// What: The best visible candidate for a name.
    #[must_use]
    pub fn best_candidate(&self, name: &str) -> Option<PackageId> {
        self.visible_candidates(name)
            .into_iter()
            .max_by(|&a, &b| self.compare_candidates(a, b))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::nevra::{CmpOp, Evr, Nevra};

    pub(crate) fn pkg(name: &str, evr: &str, arch: &str) -> Package {
        let evr = Evr::parse(evr).unwrap();
        let nevra = Nevra::new(name, evr, arch);
        let mut p = Package::new(nevra, "test");
        let self_provide = p.self_provide();
        p.provides.push(self_provide);
        p
    }

    #[test]
    fn indexes_track_name_provides_files() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        let mut a = pkg("a", "1-1", "x86_64");
        a.provides.push(Dependency::versioned(
            "libfoo",
            CmpOp::Eq,
            Evr::parse("1").unwrap(),
        ));
        a.files.push("/usr/bin/a".to_string());
        pool.add_repo("base", 50, vec![a]);

        assert_eq!(pool.ids_by_name("a").len(), 1);
        assert_eq!(pool.ids_by_provides("libfoo").len(), 1);
        assert_eq!(pool.ids_by_file("/usr/bin/a").len(), 1);
        assert!(pool.ids_by_name("b").is_empty());
    }

    #[test]
    fn excludes_never_mask_installed() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        pool.add_installed(vec![pkg("kernel", "5.10-1", "x86_64")]);
        pool.add_repo("base", 50, vec![pkg("kernel", "5.11-1", "x86_64")]);

        let masked = pool.apply_excludes(&["kernel*".to_string()]);
        assert_eq!(masked, 1);

        let installed = pool.installed_by_name("kernel").unwrap();
        assert!(!pool.is_excluded(installed));
        assert!(pool.visible_candidates("kernel").is_empty());
    }

    #[test]
    fn best_candidate_prefers_evr_then_priority_then_id() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        pool.add_repo("zeta", 50, vec![pkg("tool", "2.0-1", "x86_64")]);
        pool.add_repo("alpha", 50, vec![pkg("tool", "2.0-1", "x86_64")]);
        pool.add_repo("slow", 99, vec![pkg("tool", "2.0-1", "x86_64")]);
        pool.add_repo("old", 1, vec![pkg("tool", "1.0-1", "x86_64")]);

        let best = pool.best_candidate("tool").unwrap();
        // Newest EVR wins over the low-priority repo carrying 1.0; among
        // the 2.0 carriers priority 50 beats 99 and "alpha" beats "zeta".
        assert_eq!(pool.package(best).repo_id, "alpha");
    }

    #[test]
    fn arch_compatibility() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        assert!(pool.arch_compatible("noarch"));
        assert!(pool.arch_compatible("x86_64"));
        assert!(!pool.arch_compatible("aarch64"));
        assert!(!pool.arch_compatible("src"));
    }

    #[test]
    fn minversions_mask_older_candidates() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        pool.add_repo(
            "base",
            50,
            vec![pkg("ssl", "1.0-1", "x86_64"), pkg("ssl", "3.0-1", "x86_64")],
        );
        pool.apply_minversions(&["ssl=2.0".to_string()]);
        let visible = pool.visible_candidates("ssl");
        assert_eq!(visible.len(), 1);
        assert_eq!(pool.package(visible[0]).evr().version, "3.0");
    }
}
