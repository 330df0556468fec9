//! Dependency resolution: from user requests to a transaction.
//!
//! A request is an ordered list of [`Job`]s plus session flags. Each job
//! spec runs through the selector ladder, the selected changes become a
//! resolvo problem (hard requirements for the changes, soft requirements
//! to keep the rest of the installed set), and the solved end state is
//! diffed against the installed set into ordered transaction steps.
//! Failures surface as structured [`problems::Problem`] lists after the
//! session's `skip_*` filters run.

pub mod problems;
pub mod provider;

use std::collections::{HashMap, HashSet};

use resolvo::{Problem as ResolvoProblem, Solver, UnsolvableOrCancelled};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::nevra::{CmpOp, Dependency, Nevra};
use crate::plan::{Step, StepAction, StepReason, Transaction, order_installs};
use crate::pool::{CMDLINE_REPO_ID, PackageId, Pool};
use crate::repo::updateinfo::{Advisory, AdvisoryKind};

use problems::{Problem, ProblemFilter, ProblemKind, filter_problems};
use provider::FerriteProvider;

/// Action of one solver job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobAction {
    /// Install new packages.
    Install,
    /// Erase installed packages.
    Erase,
    /// Move to a newer candidate; all packages when no spec is given.
    Upgrade,
    /// Move to an older candidate; all packages when no spec is given.
    Downgrade,
    /// Reinstall the exact installed version.
    Reinstall,
    /// Force every installed package to the repo-offered version.
    DistroSync,
    /// Erase orphaned auto-installed packages.
    AutoRemove,
}

/// One solver input job.
#[derive(Clone, Debug)]
pub struct Job {
    /// The action.
    pub action: JobAction,
    /// Package spec; `None` means "all" for actions that allow it.
    pub spec: Option<String>,
}

/// Session flags steering resolution.
#[derive(Clone, Copy, Debug, Default)]
pub struct SolverFlags {
    /// Insist on the newest candidate even when it conflicts.
    pub best: bool,
    /// Allow erasing installed packages to satisfy the request.
    pub allow_erasing: bool,
    /// Skip dependency resolution entirely; only the named packages.
    pub no_deps: bool,
    /// Drop unresolvable jobs and retry once.
    pub skip_broken: bool,
    /// Drop conflict problems from reports.
    pub skip_conflicts: bool,
    /// Drop obsolete problems from reports.
    pub skip_obsoletes: bool,
    /// Drop masked-candidate problems from reports.
    pub skip_disabled: bool,
}

/// Security restriction applied to upgrade candidate selection.
#[derive(Clone, Debug, Default)]
pub struct SecurityFilter {
    /// Restrict to security advisories.
    pub security_only: bool,
    /// Minimum severity name.
    pub min_severity: Option<String>,
    /// Restrict to advisories suggesting a reboot.
    pub reboot_required: bool,
}

impl SecurityFilter {
    /// Whether any restriction is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.security_only || self.min_severity.is_some() || self.reboot_required
    }

    /// NEVRAs allowed as upgrade targets under this filter.
    #[must_use]
    pub fn allowed_nevras(&self, advisories: &[Advisory]) -> HashSet<Nevra> {
        let mut allowed = HashSet::new();
        for adv in advisories {
            if self.security_only && adv.kind() != AdvisoryKind::Security {
                continue;
            }
            if let Some(floor) = &self.min_severity {
                if !adv.severity_at_least(floor) {
                    continue;
                }
            }
            if self.reboot_required && !adv.reboot_suggested {
                continue;
            }
            allowed.extend(adv.packages.iter().cloned());
        }
        allowed
    }
}

/// Everything resolution needs besides the jobs themselves.
pub struct GoalContext<'a> {
    /// The package universe.
    pub pool: &'a Pool,
    /// Session flags.
    pub flags: SolverFlags,
    /// Names whose removal requires a same-name replacement.
    pub protected: &'a [String],
    /// The running kernel, protected unless replaced.
    pub running_kernel: Option<Nevra>,
    /// Auto flag per installed name, from history.
    pub auto_flags: &'a HashMap<String, bool>,
    /// Names allowed to keep multiple installed versions.
    pub installonly: &'a [String],
    /// How many versions of an installonly name to keep.
    pub installonly_limit: u32,
    /// Erase orphaned dependencies alongside removals.
    pub clean_requirements_on_remove: bool,
    /// Advisory set for security-restricted upgrades.
    pub advisories: &'a [Advisory],
    /// Active security restriction, if any.
    pub security: SecurityFilter,
}

/// The selected changes before the engine runs.
#[derive(Debug, Default)]
struct ChangeSet {
    /// Hard requirements: exact candidate pins per name.
    pins: HashMap<String, PackageId>,
    /// Hard requirements expressed as relations (non-best upgrades).
    relations: Vec<(Dependency, Option<String>)>,
    /// Installed ids to erase, before closure.
    erases: HashSet<PackageId>,
    /// Whether an autoremove sweep was requested.
    autoremove: bool,
    /// Names pinned or related by a job, for soft-requirement masking.
    touched_names: HashSet<String>,
}

/// What: Resolve jobs into a transaction.
///
/// Inputs:
/// - `ctx`: Pool, flags and policy knobs.
/// - `jobs`: Ordered user requests.
///
/// Output:
/// - A [`Transaction`] with erases first and installs in dependency
///   order, or a structured failure per the session flags.
pub fn resolve(ctx: &GoalContext<'_>, jobs: &[Job]) -> Result<Transaction> {
    let mut dropped_jobs: HashSet<usize> = HashSet::new();

    for attempt in 0..2 {
        let changes = build_changes(ctx, jobs, &dropped_jobs)?;
        match solve_changes(ctx, &changes) {
            Ok(transaction) => {
                if attempt > 0 {
                    info!("resolution succeeded after dropping unresolvable jobs");
                }
                return Ok(transaction);
            }
            Err(Error::Unresolvable { problems }) if ctx.flags.skip_broken && attempt == 0 => {
                let offenders = offending_jobs(jobs, &problems);
                if offenders.is_empty() {
                    return Err(Error::Unresolvable { problems });
                }
                for idx in &offenders {
                    warn!(job = ?jobs[*idx].spec, "dropping unresolvable job");
                }
                dropped_jobs = offenders;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("resolution retries exhausted");
}

/// Jobs whose spec appears in any problem's package list or message.
fn offending_jobs(jobs: &[Job], problems: &[Problem]) -> HashSet<usize> {
    let mut offenders = HashSet::new();
    for (idx, job) in jobs.iter().enumerate() {
        let Some(spec) = &job.spec else { continue };
        let base = spec.split(['.', ' ', '<', '>', '=']).next().unwrap_or(spec);
        let hit = problems.iter().any(|p| {
            p.message.contains(base) || p.packages.iter().any(|n| n.contains(base))
        });
        if hit {
            offenders.insert(idx);
        }
    }
    offenders
}

// --- selector -----------------------------------------------------------

/// Where a spec should be looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectScope {
    /// Repo candidates (install, upgrade targets).
    Available,
    /// The installed set (erase, reinstall sources).
    Installed,
}

/// What: Resolve a user spec to concrete pool packages.
///
/// Inputs:
/// - `pool`: The universe.
/// - `spec`: The user string.
/// - `scope`: Installed or available candidates.
///
/// Output:
/// - Matching ids, or [`Error::NoMatch`] when every rung misses.
///
/// Details:
/// - Rungs, in order: exact NEVRA; name with optional `.arch` suffix
///   and optional EVR relation; name glob; capability or file path;
///   case-insensitive name retry (with a diagnostic).
pub fn select(pool: &Pool, spec: &str, scope: SelectScope) -> Result<Vec<PackageId>> {
    let universe: Vec<PackageId> = match scope {
        SelectScope::Installed => pool.installed_ids().to_vec(),
        SelectScope::Available => pool
            .all_ids()
            .filter(|&id| {
                !pool.is_installed(id)
                    && !pool.is_excluded(id)
                    && pool.arch_compatible(pool.package(id).arch())
            })
            .collect(),
    };

    // 1. Exact NEVRA.
    if let Some(nevra) = Nevra::parse(spec) {
        let hits: Vec<PackageId> = universe
            .iter()
            .copied()
            .filter(|&id| pool.package(id).nevra == nevra)
            .collect();
        if !hits.is_empty() {
            return Ok(hits);
        }
    }

    // 2. Name, optional .arch suffix, optional EVR relation.
    if let Some(hits) = select_name_arch_relation(pool, &universe, spec, false) {
        return Ok(hits);
    }

    // 3. Name glob.
    if spec.contains(['*', '?', '[']) {
        let hits: Vec<PackageId> = universe
            .iter()
            .copied()
            .filter(|&id| crate::util::glob_match(spec, pool.package(id).name()))
            .collect();
        if !hits.is_empty() {
            return Ok(hits);
        }
    }

    // 4. Capability, including file paths.
    if let Some(dep) = Dependency::parse(spec) {
        let by_cap: Vec<PackageId> = universe
            .iter()
            .copied()
            .filter(|&id| {
                let pkg = pool.package(id);
                pkg.provides.iter().any(|p| dep.intersects(p))
                    || (dep.relation.is_none() && pkg.files.iter().any(|f| *f == dep.name))
            })
            .collect();
        if !by_cap.is_empty() {
            return Ok(by_cap);
        }
    }

    // 5. Case-insensitive retry.
    if let Some(hits) = select_name_arch_relation(pool, &universe, spec, true) {
        info!(spec, "matched case-insensitively");
        return Ok(hits);
    }

    Err(Error::NoMatch {
        spec: spec.to_string(),
    })
}

fn select_name_arch_relation(
    pool: &Pool,
    universe: &[PackageId],
    spec: &str,
    case_insensitive: bool,
) -> Option<Vec<PackageId>> {
    // Split off an EVR relation: "name >= 1.2".
    let mut parts = spec.splitn(3, char::is_whitespace).filter(|s| !s.is_empty());
    let head = parts.next()?;
    let relation = match (parts.next(), parts.next()) {
        (Some(op), Some(evr)) => Some((CmpOp::parse(op)?, crate::nevra::Evr::parse(evr)?)),
        (None, None) => None,
        _ => return None,
    };

    let name_matches = |candidate: &str, wanted: &str| {
        if case_insensitive {
            candidate.eq_ignore_ascii_case(wanted)
        } else {
            candidate == wanted
        }
    };

    let collect = |name: &str, arch: Option<&str>| -> Vec<PackageId> {
        universe
            .iter()
            .copied()
            .filter(|&id| {
                let pkg = pool.package(id);
                name_matches(pkg.name(), name)
                    && arch.is_none_or(|a| pkg.arch() == a)
                    && relation
                        .as_ref()
                        .is_none_or(|(op, evr)| {
                            Dependency::versioned(pkg.name().to_string(), *op, evr.clone())
                                .matches_evr(pkg.evr())
                        })
            })
            .collect()
    };

    // Plain name first, then name.arch.
    let hits = collect(head, None);
    if !hits.is_empty() {
        return Some(hits);
    }
    if let Some((name, arch)) = head.rsplit_once('.') {
        let hits = collect(name, Some(arch));
        if !hits.is_empty() {
            return Some(hits);
        }
    }
    None
}

// --- change building ----------------------------------------------------

fn build_changes(
    ctx: &GoalContext<'_>,
    jobs: &[Job],
    dropped: &HashSet<usize>,
) -> Result<ChangeSet> {
    let pool = ctx.pool;
    let mut changes = ChangeSet::default();

    for (idx, job) in jobs.iter().enumerate() {
        if dropped.contains(&idx) {
            continue;
        }
        match job.action {
            JobAction::Install => build_install(ctx, &mut changes, job)?,
            JobAction::Erase => {
                let spec = job.spec.as_deref().ok_or_else(|| {
                    Error::User("erase requires at least one package spec".to_string())
                })?;
                for id in select(pool, spec, SelectScope::Installed)? {
                    changes.erases.insert(id);
                    changes
                        .touched_names
                        .insert(pool.package(id).name().to_string());
                }
            }
            JobAction::Upgrade => build_upgrade(ctx, &mut changes, job)?,
            JobAction::Downgrade => build_downgrade(ctx, &mut changes, job)?,
            JobAction::Reinstall => build_reinstall(ctx, &mut changes, job)?,
            JobAction::DistroSync => build_distro_sync(ctx, &mut changes)?,
            JobAction::AutoRemove => {
                changes.autoremove = true;
                if let Some(spec) = job.spec.as_deref() {
                    for id in select(pool, spec, SelectScope::Installed)? {
                        changes.erases.insert(id);
                        changes
                            .touched_names
                            .insert(pool.package(id).name().to_string());
                    }
                }
            }
        }
    }

    Ok(changes)
}

fn build_install(ctx: &GoalContext<'_>, changes: &mut ChangeSet, job: &Job) -> Result<()> {
    let pool = ctx.pool;
    let spec = job
        .spec
        .as_deref()
        .ok_or_else(|| Error::User("install requires at least one package spec".to_string()))?;
    let selection = select(pool, spec, SelectScope::Available)?;

    // One pin per name: the best-ranked candidate of the selection.
    let mut by_name: HashMap<&str, PackageId> = HashMap::new();
    for id in &selection {
        let name = pool.package(*id).name();
        by_name
            .entry(name)
            .and_modify(|cur| {
                if pool.compare_candidates(*id, *cur) == std::cmp::Ordering::Greater {
                    *cur = *id;
                }
            })
            .or_insert(*id);
    }

    for (name, id) in by_name {
        let candidate = pool.package(id);
        if let Some(installed) = pool.installed_by_name(name) {
            let installed_pkg = pool.package(installed);
            if installed_pkg.evr() == candidate.evr() && candidate.repo_id != CMDLINE_REPO_ID {
                return Err(Error::AlreadyInstalled {
                    nevra: installed_pkg.nevra.to_string(),
                });
            }
        }
        changes.pins.insert(name.to_string(), id);
        changes.touched_names.insert(name.to_string());
    }
    Ok(())
}

fn build_upgrade(ctx: &GoalContext<'_>, changes: &mut ChangeSet, job: &Job) -> Result<()> {
    let pool = ctx.pool;
    let security_allowed = ctx
        .security
        .is_active()
        .then(|| ctx.security.allowed_nevras(ctx.advisories));

    let names: Vec<String> = match job.spec.as_deref() {
        Some(spec) => select(pool, spec, SelectScope::Installed)?
            .into_iter()
            .map(|id| pool.package(id).name().to_string())
            .collect(),
        None => pool
            .installed_ids()
            .iter()
            .map(|&id| pool.package(id).name().to_string())
            .collect(),
    };

    let explicit = job.spec.is_some();
    let single = names.len() == 1;
    let mut upgraded_any = false;
    for name in names {
        let Some(installed) = pool.installed_by_name(&name) else {
            continue;
        };
        let installed_evr = pool.package(installed).evr().clone();
        let same_name_path = pool
            .best_candidate(&name)
            .filter(|&best| pool.package(best).evr() > &installed_evr);
        let Some(best) = same_name_path.or_else(|| find_obsoleter(pool, installed)) else {
            if explicit && single {
                return Err(Error::NoUpgradePath { name });
            }
            continue;
        };
        if pool.package(best).name() != name {
            // An obsoleter replaces the installed package under its own
            // name; the old name gets no soft requirement so the
            // engine's constrains can push it out.
            if let Some(allowed) = &security_allowed {
                if !allowed.contains(&pool.package(best).nevra) {
                    continue;
                }
            }
            upgraded_any = true;
            changes.touched_names.insert(name);
            let obsoleter_name = pool.package(best).name().to_string();
            changes.touched_names.insert(obsoleter_name.clone());
            changes.pins.insert(obsoleter_name, best);
            continue;
        }
        if let Some(allowed) = &security_allowed {
            if !allowed.contains(&pool.package(best).nevra) {
                debug!(name, "upgrade skipped by security filter");
                continue;
            }
        }
        upgraded_any = true;
        changes.touched_names.insert(name.clone());
        if ctx.flags.best {
            changes.pins.insert(name, best);
        } else {
            changes
                .relations
                .push((
                    Dependency::versioned(name, CmpOp::Gt, installed_evr),
                    None,
                ));
        }
    }

    if explicit && !upgraded_any {
        return Err(Error::NoUpgradePath {
            name: job.spec.clone().unwrap_or_default(),
        });
    }
    Ok(())
}

/// The best visible candidate obsoleting an installed package.
fn find_obsoleter(pool: &Pool, installed: PackageId) -> Option<PackageId> {
    let target = pool.package(installed);
    pool.all_ids()
        .filter(|&id| {
            !pool.is_installed(id)
                && !pool.is_excluded(id)
                && pool.arch_compatible(pool.package(id).arch())
        })
        .filter(|&id| {
            pool.package(id)
                .obsoletes
                .iter()
                .any(|obs| obs.name == target.nevra.name && obs.matches_evr(target.evr()))
        })
        .max_by(|&a, &b| pool.compare_candidates(a, b))
}

fn build_downgrade(ctx: &GoalContext<'_>, changes: &mut ChangeSet, job: &Job) -> Result<()> {
    let pool = ctx.pool;
    let names: Vec<String> = match job.spec.as_deref() {
        Some(spec) => select(pool, spec, SelectScope::Installed)?
            .into_iter()
            .map(|id| pool.package(id).name().to_string())
            .collect(),
        None => pool
            .installed_ids()
            .iter()
            .map(|&id| pool.package(id).name().to_string())
            .collect(),
    };

    let explicit = job.spec.is_some() && names.len() == 1;
    for name in names {
        let Some(installed) = pool.installed_by_name(&name) else {
            continue;
        };
        let installed_evr = pool.package(installed).evr().clone();
        // Newest candidate strictly older than the installed version.
        let target = pool
            .visible_candidates(&name)
            .into_iter()
            .filter(|&id| pool.package(id).evr() < &installed_evr)
            .max_by(|&a, &b| pool.compare_candidates(a, b));
        match target {
            Some(id) => {
                changes.touched_names.insert(name.clone());
                changes.pins.insert(name, id);
            }
            None if explicit => return Err(Error::NoDowngradePath { name }),
            None => {}
        }
    }
    Ok(())
}

fn build_reinstall(ctx: &GoalContext<'_>, changes: &mut ChangeSet, job: &Job) -> Result<()> {
    let pool = ctx.pool;
    let spec = job
        .spec
        .as_deref()
        .ok_or_else(|| Error::User("reinstall requires at least one package spec".to_string()))?;
    for id in select(pool, spec, SelectScope::Installed)? {
        let pkg = pool.package(id);
        let same = pool
            .visible_candidates(pkg.name())
            .into_iter()
            .find(|&cand| pool.package(cand).evr() == pkg.evr());
        let Some(candidate) = same else {
            return Err(Error::NoMatch {
                spec: format!("{} (no repo candidate at the installed version)", pkg.nevra),
            });
        };
        changes.touched_names.insert(pkg.name().to_string());
        changes.pins.insert(pkg.name().to_string(), candidate);
    }
    Ok(())
}

fn build_distro_sync(ctx: &GoalContext<'_>, changes: &mut ChangeSet) -> Result<()> {
    let pool = ctx.pool;
    for &installed in pool.installed_ids() {
        let name = pool.package(installed).name().to_string();
        let Some(best) = pool.best_candidate(&name) else {
            continue;
        };
        if pool.package(best).evr() != pool.package(installed).evr() {
            changes.touched_names.insert(name.clone());
            changes.pins.insert(name, best);
        }
    }
    Ok(())
}

// --- solving ------------------------------------------------------------

fn solve_changes(ctx: &GoalContext<'_>, changes: &ChangeSet) -> Result<Transaction> {
    let pool = ctx.pool;

    // Erase closure among the installed set.
    let erase_closure = erase_closure(ctx, &changes.erases)?;
    check_protected(ctx, &erase_closure, changes)?;

    // Mask erased names out of the universe entirely: absent candidates
    // cannot sneak back into the solution.
    let mut masked: HashSet<PackageId> = HashSet::new();
    for &id in &erase_closure {
        masked.insert(id);
        for &cand in pool.ids_by_name(pool.package(id).name()) {
            masked.insert(cand);
        }
    }

    if ctx.flags.no_deps {
        return Ok(no_deps_transaction(ctx, changes, &erase_closure));
    }

    let provider = FerriteProvider::build(pool, &masked);

    let mut requirements = Vec::new();
    for (name, &pin) in &changes.pins {
        let pkg = pool.package(pin);
        let dep = Dependency::versioned(name.clone(), CmpOp::Eq, pkg.evr().clone());
        requirements.push(provider.requirement(&dep, Some(pkg.arch())));
    }
    for (dep, arch) in &changes.relations {
        requirements.push(provider.requirement(dep, arch.as_deref()));
    }

    // Soft requirements keep the untouched installed set in place.
    let mut soft = Vec::new();
    for &installed in pool.installed_ids() {
        if erase_closure.contains(&installed) {
            continue;
        }
        if changes
            .touched_names
            .contains(pool.package(installed).name())
        {
            continue;
        }
        if let Some(sid) = provider.solvable_of(installed) {
            soft.push(sid);
        }
    }

    let problem = ResolvoProblem::new()
        .requirements(requirements)
        .soft_requirements(soft);
    let mut solver = Solver::new(provider);
    let solution = match solver.solve(problem) {
        Ok(solution) => solution,
        Err(UnsolvableOrCancelled::Unsolvable(conflict)) => {
            let rendered = conflict.display_user_friendly(&solver).to_string();
            let raw = problems_from_rendered(&rendered);
            let filter = ProblemFilter {
                skip_conflicts: ctx.flags.skip_conflicts,
                skip_obsoletes: ctx.flags.skip_obsoletes,
                skip_disabled: ctx.flags.skip_disabled,
            };
            let mut filtered = filter_problems(pool, raw.clone(), filter);
            if filtered.is_empty() {
                filtered = raw;
            }
            return Err(Error::Unresolvable { problems: filtered });
        }
        Err(UnsolvableOrCancelled::Cancelled(_)) => return Err(Error::Interrupted),
    };

    let provider = solver.provider();
    let mut present: HashSet<PackageId> = HashSet::new();
    for sid in solution {
        if let Some(id) = provider.package_of(sid) {
            present.insert(id);
        }
    }

    Ok(diff_to_transaction(ctx, changes, &erase_closure, &present))
}

/// Installed dependents that would be broken by the erase set.
fn erase_closure(
    ctx: &GoalContext<'_>,
    erases: &HashSet<PackageId>,
) -> Result<HashSet<PackageId>> {
    let pool = ctx.pool;
    let mut closure: HashSet<PackageId> = erases.clone();

    loop {
        let mut grew = false;
        for &installed in pool.installed_ids() {
            if closure.contains(&installed) {
                continue;
            }
            let pkg = pool.package(installed);
            let broken = pkg
                .requires
                .iter()
                .chain(&pkg.requires_pre)
                .any(|req| requirement_only_satisfied_by(pool, req, &closure));
            if broken {
                if !ctx.flags.allow_erasing {
                    let victims: Vec<String> = closure
                        .iter()
                        .map(|&id| pool.package(id).nevra.to_string())
                        .collect();
                    return Err(Error::Unresolvable {
                        problems: vec![Problem {
                            kind: ProblemKind::PkgRequires,
                            message: format!(
                                "installed package {} requires '{}' provided only by packages being removed (use --allowerasing to remove dependents)",
                                pkg.nevra,
                                pkg.requires
                                    .iter()
                                    .chain(&pkg.requires_pre)
                                    .find(|req| requirement_only_satisfied_by(pool, req, &closure))
                                    .map(ToString::to_string)
                                    .unwrap_or_default(),
                            ),
                            packages: victims,
                        }],
                    });
                }
                closure.insert(installed);
                grew = true;
            }
        }
        if !grew {
            return Ok(closure);
        }
    }
}

/// Whether a requirement's only installed providers sit in the erase set.
fn requirement_only_satisfied_by(
    pool: &Pool,
    req: &Dependency,
    erased: &HashSet<PackageId>,
) -> bool {
    let mut any_provider = false;
    let mut all_erased = true;
    let candidates = pool
        .ids_by_provides(&req.name)
        .iter()
        .chain(pool.ids_by_name(&req.name))
        .chain(pool.ids_by_file(&req.name));
    for &id in candidates {
        if !pool.is_installed(id) {
            continue;
        }
        let pkg = pool.package(id);
        let satisfies = pkg.provides.iter().any(|p| req.intersects(p))
            || (req.relation.is_none() && pkg.files.iter().any(|f| *f == req.name));
        if satisfies {
            any_provider = true;
            if !erased.contains(&id) {
                all_erased = false;
            }
        }
    }
    any_provider && all_erased
}

fn check_protected(
    ctx: &GoalContext<'_>,
    erase_closure: &HashSet<PackageId>,
    changes: &ChangeSet,
) -> Result<()> {
    let pool = ctx.pool;
    let mut hit: Vec<String> = Vec::new();
    for &id in erase_closure {
        let pkg = pool.package(id);
        let name = pkg.name();
        let protected_name = ctx.protected.iter().any(|p| p == name);
        let is_running_kernel = ctx
            .running_kernel
            .as_ref()
            .is_some_and(|kernel| kernel == &pkg.nevra);
        if (protected_name || is_running_kernel) && !changes.pins.contains_key(name) {
            hit.push(pkg.nevra.to_string());
        }
    }
    if hit.is_empty() {
        Ok(())
    } else {
        hit.sort();
        Err(Error::Protected { names: hit })
    }
}

/// Transaction for `--nodeps`: only the named changes, no engine run.
fn no_deps_transaction(
    ctx: &GoalContext<'_>,
    changes: &ChangeSet,
    erase_closure: &HashSet<PackageId>,
) -> Transaction {
    let pool = ctx.pool;
    let mut steps = Vec::new();
    for &id in erase_closure {
        steps.push(Step {
            action: StepAction::Erase,
            id,
            reason: StepReason::Job,
        });
    }
    for &pin in changes.pins.values() {
        if let Some(installed) = pool.installed_by_name(pool.package(pin).name()) {
            if pool.package(installed).evr() != pool.package(pin).evr() {
                steps.push(Step {
                    action: StepAction::Erase,
                    id: installed,
                    reason: StepReason::Replaced,
                });
            }
        }
        steps.push(Step {
            action: StepAction::Install,
            id: pin,
            reason: StepReason::Job,
        });
    }
    Transaction { steps }
}

/// Diff the solved end state against the installed set.
fn diff_to_transaction(
    ctx: &GoalContext<'_>,
    changes: &ChangeSet,
    erase_closure: &HashSet<PackageId>,
    present: &HashSet<PackageId>,
) -> Transaction {
    let pool = ctx.pool;
    let mut steps = Vec::new();
    let mut erased_ids: HashSet<PackageId> = HashSet::new();

    // Requested erases first.
    for &id in erase_closure {
        let reason = if changes.erases.contains(&id) {
            StepReason::Job
        } else {
            StepReason::Dependency
        };
        steps.push(Step {
            action: StepAction::Erase,
            id,
            reason,
        });
        erased_ids.insert(id);
    }

    // Installed packages displaced by the solution.
    for &installed in pool.installed_ids() {
        if erased_ids.contains(&installed) || present.contains(&installed) {
            continue;
        }
        let pkg = pool.package(installed);
        let replacement_same_name = present
            .iter()
            .any(|&id| !pool.is_installed(id) && pool.package(id).name() == pkg.name());
        if replacement_same_name {
            // Installonly names keep their old versions; the surplus
            // prune below handles the limit.
            if ctx.installonly.iter().any(|n| n == pkg.name()) {
                continue;
            }
            // The classifier turns this into Upgrade/Downgrade/Reinstall.
            steps.push(Step {
                action: StepAction::Erase,
                id: installed,
                reason: StepReason::Replaced,
            });
            erased_ids.insert(installed);
            continue;
        }
        // Gone without a same-name replacement: either obsoleted by an
        // incoming package or dropped as a soft requirement.
        let obsoleted_by = present.iter().copied().find(|&id| {
            !pool.is_installed(id)
                && pool.package(id).obsoletes.iter().any(|obs| {
                    obs.name == pkg.nevra.name && obs.matches_evr(pkg.evr())
                })
        });
        if obsoleted_by.is_some() {
            steps.push(Step {
                action: StepAction::Erase,
                id: installed,
                reason: StepReason::Obsoleted,
            });
            erased_ids.insert(installed);
        }
        // Otherwise the package simply stays; its soft requirement was
        // not part of this transaction's scope.
    }

    // New packages.
    for &id in present {
        if pool.is_installed(id) {
            continue;
        }
        let name = pool.package(id).name();
        let reason = if changes.pins.contains_key(name)
            || changes
                .relations
                .iter()
                .any(|(dep, _)| dep.name == name)
        {
            StepReason::Job
        } else {
            StepReason::Dependency
        };
        steps.push(Step {
            action: StepAction::Install,
            id,
            reason,
        });
    }

    // Installonly surplus: keep at most installonly_limit versions,
    // erasing the oldest beyond it.
    for name in ctx.installonly {
        let incoming = steps
            .iter()
            .filter(|s| {
                s.action == StepAction::Install && pool.package(s.id).name() == name.as_str()
            })
            .count();
        if incoming == 0 {
            continue;
        }
        let mut kept: Vec<PackageId> = pool
            .installed_all_by_name(name)
            .into_iter()
            .filter(|id| !erased_ids.contains(id))
            .collect();
        kept.sort_by(|&a, &b| pool.package(a).evr().cmp(pool.package(b).evr()));
        let total = kept.len() + incoming;
        let limit = ctx.installonly_limit.max(1) as usize;
        for &old in kept.iter().take(total.saturating_sub(limit)) {
            if erased_ids.insert(old) {
                steps.push(Step {
                    action: StepAction::Erase,
                    id: old,
                    reason: StepReason::Job,
                });
            }
        }
    }

    // Orphan sweep: auto-installed packages left without a retained
    // user-level requirer.
    let sweep = ctx.clean_requirements_on_remove
        && (changes.autoremove || !changes.erases.is_empty());
    if sweep {
        let installs: Vec<PackageId> = steps
            .iter()
            .filter(|s| s.action == StepAction::Install)
            .map(|s| s.id)
            .collect();
        for id in crate::plan::orphaned_after(pool, ctx.auto_flags, &erased_ids, &installs) {
            if erased_ids.insert(id) {
                steps.push(Step {
                    action: StepAction::Erase,
                    id,
                    reason: StepReason::Unneeded,
                });
            }
        }
    }

    let mut transaction = Transaction { steps };
    order_installs(pool, &mut transaction);
    transaction
}

/// Fold the engine's rendered conflict into structured problems.
fn problems_from_rendered(rendered: &str) -> Vec<Problem> {
    let mut problems = Vec::new();
    for line in rendered.lines() {
        // Strip tree-drawing bullets and indentation from the engine's
        // rendered explanation.
        let start = line
            .find(|c: char| c.is_alphanumeric() || c == '/')
            .unwrap_or(line.len());
        let line = line[start..].trim();
        if line.is_empty() || line.ends_with("is unsolvable.") || line.ends_with(':') {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        let kind = if lower.contains("excluded") {
            ProblemKind::PkgNotInstallable
        } else if lower.contains("conflict") {
            ProblemKind::PkgConflicts
        } else if lower.contains("obsolete") {
            ProblemKind::PkgObsoletes
        } else if lower.contains("no candidates") || lower.contains("nothing provides") {
            ProblemKind::JobNothingProvides
        } else if lower.contains("requires") || lower.contains("cannot be installed") {
            ProblemKind::PkgRequires
        } else {
            ProblemKind::Other
        };
        problems.push(Problem {
            kind,
            message: line.to_string(),
            packages: Vec::new(),
        });
    }
    if problems.is_empty() {
        problems.push(Problem {
            kind: ProblemKind::Other,
            message: rendered.trim().to_string(),
            packages: Vec::new(),
        });
    }
    problems
}
