//! Bridge between the package pool and the resolvo dependency engine.
//!
//! The resolvo name axis carries both package names and provided
//! capabilities: every pool package is a real solvable under its own
//! name, and every `Provides:` entry or owned file whose capability
//! differs from the package name becomes a virtual solvable that
//! requires its concrete provider at exact NEVRA. `Requires:` map to
//! requirements, `Conflicts:` and `Obsoletes:` to constrains with an
//! inverted match. Installed packages are favored so the engine keeps
//! the current version unless a job or conflict forces a change, and
//! masked packages surface through the excluded candidate list so
//! failed resolutions can name them.

use std::collections::{HashMap, HashSet};
use std::fmt;

use resolvo::utils::Pool as ResolvoPool;
use resolvo::{
    Candidates, Condition, ConditionalRequirement, Dependencies, HintDependenciesAvailable,
    KnownDependencies, NameId, Requirement, SolvableId, SolverCache, StringId, VersionSetId,
    VersionSetUnionId,
};

use crate::nevra::{CmpOp, Dependency};
use crate::pool::{PackageId, Pool};

/// What one resolvo solvable stands for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SolvableRecord {
    /// A concrete pool package.
    Real {
        /// Pool handle.
        id: PackageId,
        /// Pre-rendered NEVRA for display.
        label: String,
    },
    /// A capability provided by a pool package.
    Virtual {
        /// The providing package.
        owner: PackageId,
        /// The capability, rendered.
        capability: String,
    },
}

impl fmt::Display for SolvableRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real { label, .. } => f.write_str(label),
            Self::Virtual { capability, .. } => write!(f, "{capability} (virtual)"),
        }
    }
}

/// A version set over one capability name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MatchSpec {
    /// The relation to satisfy.
    pub dep: Dependency,
    /// Optional architecture pin for `name.arch` selections.
    pub arch: Option<String>,
    /// Invert the match; used to encode conflicts and obsoletes.
    pub negate: bool,
    /// Only match real packages of this name, never virtual providers.
    /// Obsoletes work on package names, not capabilities.
    pub names_only: bool,
}

impl MatchSpec {
    /// Plain requirement over a dependency relation.
    #[must_use]
    pub fn requirement(dep: Dependency) -> Self {
        Self {
            dep,
            arch: None,
            negate: false,
            names_only: false,
        }
    }

    /// Conflict constrain: forbids candidates intersecting the relation.
    #[must_use]
    pub fn conflict(dep: Dependency) -> Self {
        Self {
            dep,
            arch: None,
            negate: true,
            names_only: false,
        }
    }

    /// Obsolete constrain: forbids real packages matching the relation.
    #[must_use]
    pub fn obsolete(dep: Dependency) -> Self {
        Self {
            dep,
            arch: None,
            negate: true,
            names_only: true,
        }
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            write!(f, "not({})", self.dep)
        } else {
            write!(f, "{}", self.dep)
        }?;
        if let Some(arch) = &self.arch {
            write!(f, ".{arch}")?;
        }
        Ok(())
    }
}

impl resolvo::utils::VersionSet for MatchSpec {
    type V = SolvableRecord;
}

/// Dependency provider over one [`Pool`].
pub struct FerriteProvider<'p> {
    pool: &'p Pool,
    rpool: ResolvoPool<MatchSpec, String>,
    records: HashMap<NameId, Candidates>,
    dependencies: HashMap<SolvableId, KnownDependencies>,
    real_solvables: HashMap<PackageId, SolvableId>,
}

impl<'p> FerriteProvider<'p> {
    /// What: Build the provider from the pool.
    ///
    /// Inputs:
    /// - `pool`: The package universe.
    /// - `masked`: Extra package ids left out of the universe entirely;
    ///   used to force erases, since an absent candidate cannot appear
    ///   in any solution.
    ///
    /// Output:
    /// - A read-only provider suitable for `resolvo::Solver::new`.
    #[must_use]
    pub fn build(pool: &'p Pool, masked: &HashSet<PackageId>) -> Self {
        let rpool: ResolvoPool<MatchSpec, String> = ResolvoPool::default();
        let mut records: HashMap<NameId, Candidates> = HashMap::new();
        let mut dependencies: HashMap<SolvableId, KnownDependencies> = HashMap::new();
        let mut real_solvables: HashMap<PackageId, SolvableId> = HashMap::new();
        let mut virtual_deps: Vec<(SolvableId, PackageId)> = Vec::new();

        let excluded_reason = rpool.intern_string("excluded by configuration".to_string());

        for id in pool.all_ids() {
            if masked.contains(&id) {
                continue;
            }
            let pkg = pool.package(id);
            let installed = pool.is_installed(id);
            if !installed && !pool.arch_compatible(pkg.arch()) {
                continue;
            }
            let excluded = pool.is_excluded(id);

            let name_id = rpool.intern_package_name(pkg.name().to_string());
            let sid = rpool.intern_solvable(
                name_id,
                SolvableRecord::Real {
                    id,
                    label: pkg.nevra.to_string(),
                },
            );
            real_solvables.insert(id, sid);

            let entry = records.entry(name_id).or_insert_with(empty_candidates);
            if excluded {
                entry.excluded.push((sid, excluded_reason));
            } else {
                entry.candidates.push(sid);
                if installed {
                    // Favor the newest installed version of the name.
                    let better = entry.favored.is_none_or(|cur| {
                        match self_record(&rpool, cur) {
                            Some(cur_id) => {
                                pool.compare_candidates(id, cur_id) == std::cmp::Ordering::Greater
                            }
                            None => true,
                        }
                    });
                    if better {
                        entry.favored = Some(sid);
                    }
                }
            }

            if excluded {
                continue;
            }

            // Virtual solvables for provides and files whose capability
            // name differs from the package name.
            for provide in &pkg.provides {
                if provide.name == pkg.nevra.name {
                    continue;
                }
                let cap_name_id = rpool.intern_package_name(provide.name.clone());
                let vsid = rpool.intern_solvable(
                    cap_name_id,
                    SolvableRecord::Virtual {
                        owner: id,
                        capability: provide.to_string(),
                    },
                );
                records
                    .entry(cap_name_id)
                    .or_insert_with(empty_candidates)
                    .candidates
                    .push(vsid);
                virtual_deps.push((vsid, id));
            }
            for file in &pkg.files {
                let cap_name_id = rpool.intern_package_name(file.clone());
                let vsid = rpool.intern_solvable(
                    cap_name_id,
                    SolvableRecord::Virtual {
                        owner: id,
                        capability: file.clone(),
                    },
                );
                records
                    .entry(cap_name_id)
                    .or_insert_with(empty_candidates)
                    .candidates
                    .push(vsid);
                virtual_deps.push((vsid, id));
            }
        }

        // Dependencies of real solvables.
        for (&pkg_id, &sid) in &real_solvables {
            let pkg = pool.package(pkg_id);
            let mut known = KnownDependencies::default();
            for dep in pkg.requires.iter().chain(&pkg.requires_pre) {
                let dep_name = rpool.intern_package_name(dep.name.clone());
                let vs = rpool.intern_version_set(dep_name, MatchSpec::requirement(dep.clone()));
                known.requirements.push(ConditionalRequirement {
                    condition: None,
                    requirement: Requirement::Single(vs),
                });
            }
            for dep in &pkg.conflicts {
                let dep_name = rpool.intern_package_name(dep.name.clone());
                let vs = rpool.intern_version_set(dep_name, MatchSpec::conflict(dep.clone()));
                known.constrains.push(vs);
            }
            for dep in &pkg.obsoletes {
                let dep_name = rpool.intern_package_name(dep.name.clone());
                let vs = rpool.intern_version_set(dep_name, MatchSpec::obsolete(dep.clone()));
                known.constrains.push(vs);
            }
            dependencies.insert(sid, known);
        }

        // A virtual capability requires its concrete provider.
        for (vsid, owner) in virtual_deps {
            let pkg = pool.package(owner);
            let owner_name = rpool.intern_package_name(pkg.name().to_string());
            let spec = MatchSpec {
                dep: Dependency::versioned(
                    pkg.name().to_string(),
                    CmpOp::Eq,
                    pkg.evr().clone(),
                ),
                arch: Some(pkg.arch().to_string()),
                negate: false,
                names_only: true,
            };
            let vs = rpool.intern_version_set(owner_name, spec);
            dependencies.insert(
                vsid,
                KnownDependencies {
                    requirements: vec![ConditionalRequirement {
                        condition: None,
                        requirement: Requirement::Single(vs),
                    }],
                    constrains: Vec::new(),
                },
            );
        }

        Self {
            pool,
            rpool,
            records,
            dependencies,
            real_solvables,
        }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        self.pool
    }

    /// What: Build a requirement for a dependency relation.
    ///
    /// Inputs:
    /// - `dep`: The relation, capability or package name.
    /// - `arch`: Optional architecture pin.
    ///
    /// Output:
    /// - A requirement usable in the solve problem. Unknown names still
    ///   yield a requirement; the engine then reports them unsolvable.
    #[must_use]
    pub fn requirement(&self, dep: &Dependency, arch: Option<&str>) -> ConditionalRequirement {
        let name_id = self.rpool.intern_package_name(dep.name.clone());
        let spec = MatchSpec {
            dep: dep.clone(),
            arch: arch.map(str::to_string),
            negate: false,
            names_only: false,
        };
        let vs = self.rpool.intern_version_set(name_id, spec);
        ConditionalRequirement {
            condition: None,
            requirement: Requirement::Single(vs),
        }
    }

    /// The solvable of a concrete pool package, when it was interned.
    #[must_use]
    pub fn solvable_of(&self, id: PackageId) -> Option<SolvableId> {
        self.real_solvables.get(&id).copied()
    }

    /// The pool package behind a solution member, `None` for virtuals.
    #[must_use]
    pub fn package_of(&self, solvable: SolvableId) -> Option<PackageId> {
        match &self.rpool.resolve_solvable(solvable).record {
            SolvableRecord::Real { id, .. } => Some(*id),
            SolvableRecord::Virtual { .. } => None,
        }
    }

    fn spec_matches(&self, spec: &MatchSpec, solvable: SolvableId) -> bool {
        let base = match &self.rpool.resolve_solvable(solvable).record {
            SolvableRecord::Real { id, .. } => {
                let pkg = self.pool.package(*id);
                let arch_ok = spec
                    .arch
                    .as_deref()
                    .is_none_or(|arch| pkg.arch() == arch);
                arch_ok && spec.dep.matches_evr(pkg.evr())
            }
            SolvableRecord::Virtual { owner, .. } => {
                if spec.names_only {
                    false
                } else {
                    let pkg = self.pool.package(*owner);
                    let arch_ok = spec
                        .arch
                        .as_deref()
                        .is_none_or(|arch| pkg.arch() == arch);
                    let provide_match = pkg
                        .provides
                        .iter()
                        .filter(|p| p.name == spec.dep.name)
                        .any(|p| spec.dep.intersects(p));
                    let file_match = spec.dep.relation.is_none()
                        && pkg.files.iter().any(|f| *f == spec.dep.name);
                    arch_ok && (provide_match || file_match)
                }
            }
        };
        base != spec.negate
    }
}

fn empty_candidates() -> Candidates {
    Candidates {
        candidates: Vec::new(),
        favored: None,
        locked: None,
        hint_dependencies_available: HintDependenciesAvailable::All,
        excluded: Vec::new(),
    }
}

fn self_record(
    rpool: &ResolvoPool<MatchSpec, String>,
    solvable: SolvableId,
) -> Option<PackageId> {
    match &rpool.resolve_solvable(solvable).record {
        SolvableRecord::Real { id, .. } => Some(*id),
        SolvableRecord::Virtual { .. } => None,
    }
}

// --- Interner ---

impl resolvo::Interner for FerriteProvider<'_> {
    fn display_solvable(&self, solvable: SolvableId) -> impl fmt::Display + '_ {
        self.rpool.resolve_solvable(solvable).record.clone()
    }

    fn display_name(&self, name: NameId) -> impl fmt::Display + '_ {
        self.rpool.resolve_package_name(name).clone()
    }

    fn display_version_set(&self, version_set: VersionSetId) -> impl fmt::Display + '_ {
        self.rpool.resolve_version_set(version_set).clone()
    }

    fn display_string(&self, string_id: StringId) -> impl fmt::Display + '_ {
        self.rpool.resolve_string(string_id).to_string()
    }

    fn version_set_name(&self, version_set: VersionSetId) -> NameId {
        self.rpool.resolve_version_set_package_name(version_set)
    }

    fn solvable_name(&self, solvable: SolvableId) -> NameId {
        self.rpool.resolve_solvable(solvable).name
    }

    fn version_sets_in_union(
        &self,
        version_set_union: VersionSetUnionId,
    ) -> impl Iterator<Item = VersionSetId> {
        self.rpool.resolve_version_set_union(version_set_union)
    }

    fn resolve_condition(&self, condition: resolvo::ConditionId) -> Condition {
        self.rpool.resolve_condition(condition).clone()
    }
}

// --- DependencyProvider ---

impl resolvo::DependencyProvider for FerriteProvider<'_> {
    async fn get_candidates(&self, name: NameId) -> Option<Candidates> {
        self.records.get(&name).cloned()
    }

    async fn sort_candidates(&self, _solver: &SolverCache<Self>, solvables: &mut [SolvableId]) {
        // Real candidates beat virtual providers; among reals the pool's
        // candidate ranking (newest EVR, priority, repo id) decides.
        solvables.sort_by(|&a, &b| {
            let ra = &self.rpool.resolve_solvable(a).record;
            let rb = &self.rpool.resolve_solvable(b).record;
            match (ra, rb) {
                (SolvableRecord::Real { id: ia, .. }, SolvableRecord::Real { id: ib, .. }) => {
                    self.pool.compare_candidates(*ib, *ia)
                }
                (SolvableRecord::Real { .. }, SolvableRecord::Virtual { .. }) => {
                    std::cmp::Ordering::Less
                }
                (SolvableRecord::Virtual { .. }, SolvableRecord::Real { .. }) => {
                    std::cmp::Ordering::Greater
                }
                (
                    SolvableRecord::Virtual { owner: oa, .. },
                    SolvableRecord::Virtual { owner: ob, .. },
                ) => self.pool.compare_candidates(*ob, *oa),
            }
        });
    }

    async fn filter_candidates(
        &self,
        candidates: &[SolvableId],
        version_set: VersionSetId,
        inverse: bool,
    ) -> Vec<SolvableId> {
        let spec = self.rpool.resolve_version_set(version_set);
        candidates
            .iter()
            .copied()
            .filter(|&sid| self.spec_matches(spec, sid) ^ inverse)
            .collect()
    }

    async fn get_dependencies(&self, solvable: SolvableId) -> Dependencies {
        match self.dependencies.get(&solvable) {
            Some(known) => Dependencies::Known(known.clone()),
            None => Dependencies::Known(KnownDependencies::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::pkg;

    #[test]
    fn spec_matching_real_and_virtual() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        let mut provider_pkg = pkg("openssl", "3.0-1", "x86_64");
        provider_pkg.provides.push(Dependency::versioned(
            "libssl",
            CmpOp::Eq,
            crate::nevra::Evr::parse("3.0").unwrap(),
        ));
        pool.add_repo("base", 50, vec![provider_pkg]);

        let provider = FerriteProvider::build(&pool, &HashSet::new());

        // The capability name has exactly one (virtual) candidate.
        let cap_name = provider.rpool.intern_package_name("libssl".to_string());
        let cap_candidates = provider.records.get(&cap_name).unwrap();
        assert_eq!(cap_candidates.candidates.len(), 1);

        let vsid = cap_candidates.candidates[0];
        let req = MatchSpec::requirement(Dependency::parse("libssl >= 2.0").unwrap());
        assert!(provider.spec_matches(&req, vsid));
        let too_new = MatchSpec::requirement(Dependency::parse("libssl > 3.0").unwrap());
        assert!(!provider.spec_matches(&too_new, vsid));

        // Obsolete specs never match virtual providers.
        let obs = MatchSpec::obsolete(Dependency::parse("libssl").unwrap());
        // negate=true and the base match is forced false for virtuals.
        assert!(provider.spec_matches(&obs, vsid));
    }

    #[test]
    fn masked_packages_are_not_interned() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        pool.add_repo("base", 50, vec![pkg("a", "1-1", "x86_64")]);
        let id = pool.ids_by_name("a")[0];

        let mut masked = HashSet::new();
        masked.insert(id);
        let provider = FerriteProvider::build(&pool, &masked);
        assert!(provider.solvable_of(id).is_none());
    }

    #[test]
    fn excluded_packages_surface_as_excluded_candidates() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        pool.add_repo("base", 50, vec![pkg("a", "1-1", "x86_64")]);
        pool.apply_excludes(&["a".to_string()]);

        let provider = FerriteProvider::build(&pool, &HashSet::new());
        let name = provider.rpool.intern_package_name("a".to_string());
        let candidates = provider.records.get(&name).unwrap();
        assert!(candidates.candidates.is_empty());
        assert_eq!(candidates.excluded.len(), 1);
    }
}
