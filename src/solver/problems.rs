//! Structured solver problems and their post-filtering.
//!
//! When resolution fails, the engine's explanation is folded into a list
//! of [`Problem`]s, each with a rule kind and the packages involved. The
//! `skip_*` session flags then filter the list: some kinds are dropped
//! outright, and requirement problems whose capability is actually
//! present in an enabled repo are demoted because another problem will
//! name the real cause.

use std::fmt;

use crate::pool::Pool;

/// Rule kind of one solver problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProblemKind {
    /// A required capability has no installable provider.
    PkgRequires,
    /// Two packages in the proposed set conflict.
    PkgConflicts,
    /// A package conflicts with a capability it provides itself.
    PkgSelfConflict,
    /// An incoming package obsoletes a requested one.
    PkgObsoletes,
    /// The candidate exists but is masked or arch-incompatible.
    PkgNotInstallable,
    /// A job's spec matched no candidate at all.
    JobNothingProvides,
    /// Anything the engine reported that does not classify further.
    Other,
}

/// One problem reported by dependency resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Problem {
    /// The rule kind.
    pub kind: ProblemKind,
    /// Human-readable description, one line.
    pub message: String,
    /// NEVRA strings of the packages involved.
    pub packages: Vec<String>,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Filtering flags coming from the session.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProblemFilter {
    /// Drop conflict-kind problems.
    pub skip_conflicts: bool,
    /// Drop obsolete-kind problems.
    pub skip_obsoletes: bool,
    /// Drop not-installable problems for masked candidates.
    pub skip_disabled: bool,
}

/// What: Apply the session filters to a raw problem list.
///
/// Inputs:
/// - `pool`: Used to demote requirement problems whose capability is
///   provided by some visible repo package.
/// - `problems`: Raw list from resolution.
/// - `filter`: The session flags.
///
/// Output:
/// - The remaining problems, original order preserved.
#[must_use]
pub fn filter_problems(pool: &Pool, problems: Vec<Problem>, filter: ProblemFilter) -> Vec<Problem> {
    problems
        .into_iter()
        .filter(|problem| match problem.kind {
            ProblemKind::PkgConflicts | ProblemKind::PkgSelfConflict => !filter.skip_conflicts,
            ProblemKind::PkgObsoletes => !filter.skip_obsoletes,
            ProblemKind::PkgNotInstallable => !filter.skip_disabled,
            ProblemKind::PkgRequires => !capability_present(pool, problem),
            _ => true,
        })
        .collect()
}

/// A requirement problem is demoted when the capability it names is
/// provided by any visible repo package: the breakage is then transitive
/// and a different problem carries the real cause.
fn capability_present(pool: &Pool, problem: &Problem) -> bool {
    let Some(capability) = problem.message.split('\'').nth(1) else {
        return false;
    };
    let name = capability.split_whitespace().next().unwrap_or(capability);
    pool.ids_by_provides(name)
        .iter()
        .chain(pool.ids_by_name(name))
        .any(|&id| !pool.is_installed(id) && !pool.is_excluded(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::pkg;

    fn problem(kind: ProblemKind, message: &str) -> Problem {
        Problem {
            kind,
            message: message.to_string(),
            packages: vec![],
        }
    }

    #[test]
    fn skip_flags_drop_their_kinds() {
        let pool = Pool::new();
        let problems = vec![
            problem(ProblemKind::PkgConflicts, "a conflicts with b"),
            problem(ProblemKind::PkgObsoletes, "a obsoletes b"),
            problem(ProblemKind::PkgNotInstallable, "a is masked"),
            problem(ProblemKind::Other, "something else"),
        ];

        let kept = filter_problems(
            &pool,
            problems.clone(),
            ProblemFilter {
                skip_conflicts: true,
                skip_obsoletes: true,
                skip_disabled: true,
            },
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].kind, ProblemKind::Other);

        let kept = filter_problems(&pool, problems, ProblemFilter::default());
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn requires_problem_demoted_when_capability_visible() {
        let mut pool = Pool::new();
        pool.set_arch("x86_64");
        pool.add_repo("base", 50, vec![pkg("libfoo", "1.0-1", "x86_64")]);

        let present = problem(
            ProblemKind::PkgRequires,
            "nothing provides 'libfoo' needed by bar-1-1.x86_64",
        );
        let absent = problem(
            ProblemKind::PkgRequires,
            "nothing provides 'libmissing' needed by bar-1-1.x86_64",
        );

        let kept = filter_problems(&pool, vec![present, absent], ProblemFilter::default());
        assert_eq!(kept.len(), 1);
        assert!(kept[0].message.contains("libmissing"));
    }
}
