//! Commands that change the installed set.
//!
//! All alteration commands funnel through [`run_jobs`]: load metadata,
//! resolve, show the plan, confirm, execute, report. `check` and
//! `check-local` reuse the same session plumbing without executing a
//! transaction.

use std::path::Path;

use tracing::info;

use crate::app::Session;
use crate::error::{Error, Result};
use crate::executor::{CancelFlag, Executor};
use crate::plan::classify;
use crate::rpmdb::BackendStep;
use crate::solver::{GoalContext, Job, JobAction, resolve};

/// What: Resolve and execute a set of jobs.
///
/// Inputs:
/// - `session`: A built session; metadata is loaded here.
/// - `jobs`: The user's requests, in order.
/// - `cmdline`: Recorded into history on success.
///
/// Output:
/// - Process exit code.
pub async fn run_jobs(session: &mut Session, mut jobs: Vec<Job>, cmdline: String) -> Result<i32> {
    session.load_metadata(true).await?;
    absorb_local_rpms(session, &mut jobs)?;

    let running_kernel = session.backend.running_kernel();
    let clean_requirements =
        session.config.main.clean_requirements_on_remove && !session.opts.no_autoremove;
    let ctx = GoalContext {
        pool: &session.pool,
        flags: session.opts.solver,
        protected: &session.config.main.protected_packages,
        running_kernel,
        auto_flags: &session.auto_flags,
        installonly: &session.config.main.installonlypkgs,
        installonly_limit: session.config.main.installonly_limit,
        clean_requirements_on_remove: clean_requirements,
        advisories: &session.advisories,
        security: session.opts.security.clone(),
    };

    let transaction = resolve(&ctx, &jobs)?;
    let plan = classify(&session.pool, transaction);
    session.reporter.plan(&session.pool, &plan);
    if plan.is_empty() {
        return Ok(0);
    }

    if !session.reporter.confirm("Is this ok") {
        session.reporter.line("Operation aborted.");
        return Ok(0);
    }

    let executor = Executor {
        pool: &session.pool,
        repos: &session.repos,
        main: &session.config.main,
        opts: session.execute_options(),
        cancel: CancelFlag::new(),
    };

    let reporter = session.reporter.clone();
    let mut ask = |prompt: &str| reporter.confirm(prompt);
    let mut progress = |step: &BackendStep| match step {
        BackendStep::Install { nevra, .. } => {
            reporter.line(&format!("Installed: {nevra}"));
        }
        BackendStep::Erase { nevra } => {
            reporter.line(&format!("Removed: {nevra}"));
        }
    };

    let committed = executor
        .execute(
            &plan,
            &cmdline,
            &session.lock,
            &mut session.history,
            session.backend.as_mut(),
            session.plugins.as_mut(),
            &mut ask,
            &mut progress,
        )
        .await?;

    match committed {
        Some(id) => {
            info!(transaction = id, "transaction complete");
            session.reporter.line("Complete!");
        }
        None => session.reporter.line("Done (no transaction recorded)."),
    }
    Ok(0)
}

/// Replace local `.rpm` file specs with their pool identities.
fn absorb_local_rpms(session: &mut Session, jobs: &mut [Job]) -> Result<()> {
    for job in jobs.iter_mut() {
        if job.action != JobAction::Install {
            continue;
        }
        let Some(spec) = job.spec.clone() else { continue };
        let path = Path::new(&spec);
        if path.extension().is_some_and(|ext| ext == "rpm") && path.is_file() {
            let pkg = crate::rpmdb::package_from_rpm_file(path)?;
            let nevra = pkg.nevra.to_string();
            session.pool.add_cmdline(pkg);
            job.spec = Some(nevra);
        }
    }
    Ok(())
}

/// What: Verify dependency consistency of the installed set.
///
/// Output:
/// - `0` when consistent, `1` with one line per violation otherwise.
pub async fn run_check(session: &mut Session) -> Result<i32> {
    session.load_metadata(true).await?;
    let pool = &session.pool;
    let mut violations = Vec::new();

    for &id in pool.installed_ids() {
        let pkg = pool.package(id);
        for req in pkg.requires.iter().chain(&pkg.requires_pre) {
            if req.name.starts_with("rpmlib(") {
                continue;
            }
            let satisfied = pool.installed_ids().iter().any(|&other| {
                let provider = pool.package(other);
                provider.provides.iter().any(|p| req.intersects(p))
                    || (req.relation.is_none() && provider.files.iter().any(|f| *f == req.name))
            });
            if !satisfied {
                violations.push(format!("{} requires {req}", pkg.nevra));
            }
        }
        for conflict in &pkg.conflicts {
            let hit = pool.installed_ids().iter().any(|&other| {
                other != id
                    && pool
                        .package(other)
                        .provides
                        .iter()
                        .any(|p| conflict.intersects(p))
            });
            if hit {
                violations.push(format!("{} conflicts with {conflict}", pkg.nevra));
            }
        }
    }

    if violations.is_empty() {
        session.reporter.line("Check completed, no problems found.");
        Ok(0)
    } else {
        for line in &violations {
            session.reporter.line(line);
        }
        Ok(1)
    }
}

/// What: Check every `.rpm` in a directory for installability.
///
/// Inputs:
/// - `dir`: Directory scanned non-recursively for `.rpm` files.
///
/// Output:
/// - `0` when all resolve; the solver's error otherwise.
pub async fn run_check_local(session: &mut Session, dir: &Path) -> Result<i32> {
    session.load_metadata(true).await?;

    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut jobs = Vec::new();
    let mut count = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "rpm") {
            let pkg = crate::rpmdb::package_from_rpm_file(&path)?;
            let nevra = pkg.nevra.to_string();
            session.pool.add_cmdline(pkg);
            jobs.push(Job {
                action: JobAction::Install,
                spec: Some(nevra),
            });
            count += 1;
        }
    }
    if jobs.is_empty() {
        return Err(Error::User(format!(
            "no rpm files found in {}",
            dir.display()
        )));
    }

    let running_kernel = session.backend.running_kernel();
    let ctx = GoalContext {
        pool: &session.pool,
        flags: session.opts.solver,
        protected: &session.config.main.protected_packages,
        running_kernel,
        auto_flags: &session.auto_flags,
        installonly: &session.config.main.installonlypkgs,
        installonly_limit: session.config.main.installonly_limit,
        clean_requirements_on_remove: false,
        advisories: &session.advisories,
        security: Default::default(),
    };
    resolve(&ctx, &jobs)?;
    session
        .reporter
        .line(&format!("{count} local package(s) resolve cleanly."));
    Ok(0)
}

/// Build one job per spec for a simple action.
#[must_use]
pub fn jobs_for(action: JobAction, specs: &[String]) -> Vec<Job> {
    if specs.is_empty() {
        vec![Job { action, spec: None }]
    } else {
        specs
            .iter()
            .map(|spec| Job {
                action,
                spec: Some(spec.clone()),
            })
            .collect()
    }
}

