//! Transaction steps and their classification.
//!
//! The solver produces a [`Transaction`]: erase steps first, then
//! install steps in dependency order. The classifier walks that step
//! list against the installed set and assigns each step one of the
//! user-facing categories (install, upgrade, downgrade, reinstall,
//! obsoleted, removed-by-downgrade, remove, unneeded). Erases that merely
//! clear the way for a same-name install are folded into that install's
//! category, except for downgrades where the spec'd category is
//! reported.

use std::collections::{HashMap, HashSet};

use crate::pool::{PackageId, Pool};

/// Primitive step action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepAction {
    /// Install the target package.
    Install,
    /// Erase the target package.
    Erase,
}

/// Why a step entered the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepReason {
    /// Directly requested by a job.
    Job,
    /// Pulled in (or pushed out) by dependency resolution.
    Dependency,
    /// Displaced by a same-name install.
    Replaced,
    /// Erased because an incoming package obsoletes it.
    Obsoleted,
    /// Auto-installed dependency left without a user-level requirer.
    Unneeded,
}

/// One transaction step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    /// Install or erase.
    pub action: StepAction,
    /// The target package.
    pub id: PackageId,
    /// Why the step exists.
    pub reason: StepReason,
}

/// The solver's ordered output.
#[derive(Clone, Debug, Default)]
pub struct Transaction {
    /// Steps, erases before installs.
    pub steps: Vec<Step>,
}

impl Transaction {
    /// Whether the transaction changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Install steps in order.
    pub fn installs(&self) -> impl Iterator<Item = &Step> {
        self.steps
            .iter()
            .filter(|s| s.action == StepAction::Install)
    }

    /// Erase steps in order.
    pub fn erases(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.action == StepAction::Erase)
    }
}

/// User-facing category of one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepClass {
    /// Fresh install of a name+arch not previously present.
    Install,
    /// Same name, strictly newer EVR.
    Upgrade,
    /// Same name, strictly older EVR.
    Downgrade,
    /// Same name, equal EVR.
    Reinstall,
    /// Erased by another package's obsoletes.
    Obsoleted,
    /// Erased to make room for a downgrade.
    RemovedByDowngrade,
    /// User-requested erase.
    Remove,
    /// Orphaned auto-installed dependency.
    Unneeded,
}

impl StepClass {
    /// Display label used in plan output.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
            Self::Reinstall => "reinstall",
            Self::Obsoleted => "obsoleted",
            Self::RemovedByDowngrade => "removed (downgrade)",
            Self::Remove => "remove",
            Self::Unneeded => "unneeded",
        }
    }
}

/// One classified step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassifiedStep {
    /// The target package.
    pub id: PackageId,
    /// Its category.
    pub class: StepClass,
    /// Auto flag recorded in history for installs.
    pub auto: bool,
}

/// A fully classified plan, ready for display and execution.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    /// The raw ordered transaction; authoritative for history.
    pub transaction: Transaction,
    /// Classified view; folded erases are omitted.
    pub classified: Vec<ClassifiedStep>,
}

impl Plan {
    /// Whether the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transaction.is_empty()
    }

    /// Classified steps of one category.
    pub fn of_class(&self, class: StepClass) -> impl Iterator<Item = &ClassifiedStep> {
        self.classified.iter().filter(move |s| s.class == class)
    }

    /// Total download size of the install steps.
    #[must_use]
    pub fn download_size(&self, pool: &Pool) -> u64 {
        self.transaction
            .installs()
            .map(|s| pool.package(s.id).download_size)
            .sum()
    }
}

/// What: Classify a transaction against the installed set.
///
/// Inputs:
/// - `pool`: The universe the steps index into.
/// - `transaction`: The solver output.
///
/// Output:
/// - A [`Plan`] whose classified list partitions every visible step
///   into exactly one category.
///
/// Details:
/// - `Replaced` erases are folded into their same-name install and only
///   surface as `RemovedByDowngrade` when that install is a downgrade.
#[must_use]
pub fn classify(pool: &Pool, transaction: Transaction) -> Plan {
    let mut classified = Vec::new();

    // Installed EVR per name, for comparing incoming versions.
    let installed_evr = |name: &str| {
        pool.installed_by_name(name)
            .map(|id| pool.package(id).evr().clone())
    };

    // Classify installs first so replaced erases can consult them.
    let mut install_class: HashMap<String, StepClass> = HashMap::new();
    for step in transaction.installs() {
        let pkg = pool.package(step.id);
        let class = match installed_evr(pkg.name()) {
            None => StepClass::Install,
            Some(evr) => match pkg.evr().cmp(&evr) {
                std::cmp::Ordering::Greater => StepClass::Upgrade,
                std::cmp::Ordering::Less => StepClass::Downgrade,
                std::cmp::Ordering::Equal => StepClass::Reinstall,
            },
        };
        install_class.insert(pkg.name().to_string(), class);
        classified.push(ClassifiedStep {
            id: step.id,
            class,
            auto: step.reason == StepReason::Dependency,
        });
    }

    for step in transaction.erases() {
        let pkg = pool.package(step.id);
        let class = match step.reason {
            StepReason::Obsoleted => Some(StepClass::Obsoleted),
            StepReason::Unneeded => Some(StepClass::Unneeded),
            StepReason::Job | StepReason::Dependency => Some(StepClass::Remove),
            StepReason::Replaced => match install_class.get(pkg.name()) {
                Some(StepClass::Downgrade) => Some(StepClass::RemovedByDowngrade),
                // Folded into the install's category.
                _ => None,
            },
        };
        if let Some(class) = class {
            classified.push(ClassifiedStep {
                id: step.id,
                class,
                auto: false,
            });
        }
    }

    Plan {
        transaction,
        classified,
    }
}

/// What: Reorder a transaction's install steps into dependency order.
///
/// Inputs:
/// - `pool`: The universe.
/// - `transaction`: Mutated in place; erases keep their position ahead
///   of every install.
///
/// Details:
/// - Kahn's topological sort over "A requires a capability B provides"
///   edges among the install steps; cycles fall back to the original
///   order for their members. Ties resolve by NEVRA for determinism.
pub fn order_installs(pool: &Pool, transaction: &mut Transaction) {
    let erases: Vec<Step> = transaction.erases().copied().collect();
    let installs: Vec<Step> = transaction.installs().copied().collect();
    if installs.len() <= 1 {
        transaction.steps = erases.into_iter().chain(installs).collect();
        return;
    }

    let ids: Vec<PackageId> = installs.iter().map(|s| s.id).collect();
    let id_set: HashSet<PackageId> = ids.iter().copied().collect();

    // provider -> dependents edges.
    let mut dependents: HashMap<PackageId, Vec<PackageId>> = HashMap::new();
    let mut in_degree: HashMap<PackageId, usize> = ids.iter().map(|&id| (id, 0)).collect();

    for &dependent in &ids {
        let pkg = pool.package(dependent);
        for req in pkg.requires.iter().chain(&pkg.requires_pre) {
            for &provider in pool
                .ids_by_provides(&req.name)
                .iter()
                .chain(pool.ids_by_file(&req.name))
            {
                if provider == dependent || !id_set.contains(&provider) {
                    continue;
                }
                let provider_pkg = pool.package(provider);
                let satisfies = provider_pkg.provides.iter().any(|p| req.intersects(p))
                    || (req.relation.is_none()
                        && provider_pkg.files.iter().any(|f| *f == req.name));
                if satisfies {
                    let entry = dependents.entry(provider).or_default();
                    if !entry.contains(&dependent) {
                        entry.push(dependent);
                        *in_degree.entry(dependent).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    let mut ready: Vec<PackageId> = ids
        .iter()
        .copied()
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();
    ready.sort_by(|&a, &b| pool.package(a).nevra.to_string().cmp(&pool.package(b).nevra.to_string()));

    let mut order: Vec<PackageId> = Vec::with_capacity(ids.len());
    while !ready.is_empty() {
        let id = ready.remove(0);
        order.push(id);
        if let Some(deps) = dependents.get(&id) {
            let mut next = Vec::new();
            for &dep in deps {
                if let Some(degree) = in_degree.get_mut(&dep) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(dep);
                    }
                }
            }
            next.sort_by(|&a, &b| {
                pool.package(a)
                    .nevra
                    .to_string()
                    .cmp(&pool.package(b).nevra.to_string())
            });
            ready.extend(next);
            ready.sort_by(|&a, &b| {
                pool.package(a)
                    .nevra
                    .to_string()
                    .cmp(&pool.package(b).nevra.to_string())
            });
        }
    }

    // Cycle members keep their original relative order at the end.
    let ordered_set: HashSet<PackageId> = order.iter().copied().collect();
    for &id in &ids {
        if !ordered_set.contains(&id) {
            order.push(id);
        }
    }

    let by_id: HashMap<PackageId, Step> = installs.iter().map(|s| (s.id, *s)).collect();
    transaction.steps = erases
        .into_iter()
        .chain(order.into_iter().filter_map(|id| by_id.get(&id).copied()))
        .collect();
}

/// What: Compute orphaned auto-installed packages after a change.
///
/// Inputs:
/// - `pool`: The universe.
/// - `auto_flags`: Auto flag per installed name from history.
/// - `erased`: Ids leaving the installed set.
/// - `installs`: Ids entering it.
///
/// Output:
/// - Installed ids that are auto-installed and, after the change, have
///   no remaining requirer; computed to a fixed point so chains of
///   orphans fall together.
#[must_use]
pub fn orphaned_after(
    pool: &Pool,
    auto_flags: &HashMap<String, bool>,
    erased: &HashSet<PackageId>,
    installs: &[PackageId],
) -> Vec<PackageId> {
    let mut removed: HashSet<PackageId> = erased.clone();
    let mut orphans = Vec::new();

    loop {
        let mut grew = false;
        for &candidate in pool.installed_ids() {
            if removed.contains(&candidate) {
                continue;
            }
            let pkg = pool.package(candidate);
            if !auto_flags.get(pkg.name()).copied().unwrap_or(false) {
                continue;
            }
            let needed = pool
                .installed_ids()
                .iter()
                .copied()
                .filter(|id| *id != candidate && !removed.contains(id))
                .chain(installs.iter().copied())
                .any(|requirer| requires_package(pool, requirer, candidate));
            if !needed {
                removed.insert(candidate);
                orphans.push(candidate);
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }

    orphans
}

/// Whether `requirer` depends on anything `target` provides.
fn requires_package(pool: &Pool, requirer: PackageId, target: PackageId) -> bool {
    let requirer_pkg = pool.package(requirer);
    let target_pkg = pool.package(target);
    requirer_pkg
        .requires
        .iter()
        .chain(&requirer_pkg.requires_pre)
        .any(|req| {
            target_pkg.provides.iter().any(|p| req.intersects(p))
                || (req.relation.is_none()
                    && target_pkg.files.iter().any(|f| *f == req.name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nevra::Dependency;
    use crate::pool::tests::pkg;

    fn id_of(pool: &Pool, name: &str, repo: &str) -> PackageId {
        pool.ids_by_name(name)
            .iter()
            .copied()
            .find(|&id| pool.package(id).repo_id == repo)
            .unwrap()
    }

    #[test]
    fn classifier_partitions_steps() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        pool.add_installed(vec![
            pkg("up", "1.0-1", "x86_64"),
            pkg("down", "2.0-1", "x86_64"),
            pkg("re", "1.0-1", "x86_64"),
            pkg("gone", "1.0-1", "x86_64"),
            pkg("orphan", "1.0-1", "x86_64"),
            pkg("victim", "1.0-1", "x86_64"),
        ]);
        pool.add_repo(
            "base",
            50,
            vec![
                pkg("up", "2.0-1", "x86_64"),
                pkg("down", "1.0-1", "x86_64"),
                pkg("re", "1.0-1", "x86_64"),
                pkg("fresh", "1.0-1", "x86_64"),
            ],
        );

        let steps = vec![
            Step {
                action: StepAction::Erase,
                id: id_of(&pool, "gone", "@System"),
                reason: StepReason::Job,
            },
            Step {
                action: StepAction::Erase,
                id: id_of(&pool, "victim", "@System"),
                reason: StepReason::Obsoleted,
            },
            Step {
                action: StepAction::Erase,
                id: id_of(&pool, "orphan", "@System"),
                reason: StepReason::Unneeded,
            },
            Step {
                action: StepAction::Erase,
                id: id_of(&pool, "up", "@System"),
                reason: StepReason::Replaced,
            },
            Step {
                action: StepAction::Erase,
                id: id_of(&pool, "down", "@System"),
                reason: StepReason::Replaced,
            },
            Step {
                action: StepAction::Install,
                id: id_of(&pool, "up", "base"),
                reason: StepReason::Job,
            },
            Step {
                action: StepAction::Install,
                id: id_of(&pool, "down", "base"),
                reason: StepReason::Job,
            },
            Step {
                action: StepAction::Install,
                id: id_of(&pool, "re", "base"),
                reason: StepReason::Job,
            },
            Step {
                action: StepAction::Install,
                id: id_of(&pool, "fresh", "base"),
                reason: StepReason::Dependency,
            },
        ];

        let plan = classify(&pool, Transaction { steps });

        let class_of = |name: &str, repo: &str| {
            plan.classified
                .iter()
                .find(|s| {
                    let p = pool.package(s.id);
                    p.name() == name && p.repo_id == repo
                })
                .map(|s| s.class)
        };

        assert_eq!(class_of("fresh", "base"), Some(StepClass::Install));
        assert_eq!(class_of("up", "base"), Some(StepClass::Upgrade));
        assert_eq!(class_of("down", "base"), Some(StepClass::Downgrade));
        assert_eq!(class_of("re", "base"), Some(StepClass::Reinstall));
        assert_eq!(class_of("gone", "@System"), Some(StepClass::Remove));
        assert_eq!(class_of("victim", "@System"), Some(StepClass::Obsoleted));
        assert_eq!(class_of("orphan", "@System"), Some(StepClass::Unneeded));
        // The upgrade's replaced erase is folded; the downgrade's shows.
        assert_eq!(
            class_of("down", "@System"),
            Some(StepClass::RemovedByDowngrade)
        );
        assert_eq!(class_of("up", "@System"), None);

        // Auto flag follows the step reason.
        let fresh = plan
            .classified
            .iter()
            .find(|s| pool.package(s.id).name() == "fresh")
            .unwrap();
        assert!(fresh.auto);
    }

    #[test]
    fn install_order_puts_dependencies_first() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        let mut app = pkg("app", "1-1", "x86_64");
        app.requires.push(Dependency::parse("libfoo").unwrap());
        let mut lib = pkg("libfoo", "1-1", "x86_64");
        lib.provides.push(Dependency::parse("libfoo").unwrap());
        pool.add_repo("base", 50, vec![app, lib]);

        let mut txn = Transaction {
            steps: vec![
                Step {
                    action: StepAction::Install,
                    id: id_of(&pool, "app", "base"),
                    reason: StepReason::Job,
                },
                Step {
                    action: StepAction::Install,
                    id: id_of(&pool, "libfoo", "base"),
                    reason: StepReason::Dependency,
                },
            ],
        };
        order_installs(&pool, &mut txn);
        let names: Vec<&str> = txn
            .steps
            .iter()
            .map(|s| pool.package(s.id).name())
            .collect();
        assert_eq!(names, vec!["libfoo", "app"]);
    }

    #[test]
    fn orphan_chains_fall_together() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        let mut a = pkg("a", "1-1", "x86_64");
        a.requires.push(Dependency::parse("b").unwrap());
        let mut b = pkg("b", "1-1", "x86_64");
        b.requires.push(Dependency::parse("c").unwrap());
        let c = pkg("c", "1-1", "x86_64");
        pool.add_installed(vec![a, b, c]);

        let auto: HashMap<String, bool> =
            [("b".to_string(), true), ("c".to_string(), true)].into();

        // Erasing a orphans b, which orphans c.
        let erased: HashSet<PackageId> = [pool.installed_by_name("a").unwrap()].into();
        let orphans = orphaned_after(&pool, &auto, &erased, &[]);
        let names: Vec<&str> = orphans.iter().map(|&id| pool.package(id).name()).collect();
        assert_eq!(names, vec!["b", "c"]);

        // With nothing erased, b is still required by a.
        let orphans = orphaned_after(&pool, &auto, &HashSet::new(), &[]);
        assert!(orphans.is_empty());
    }
}
