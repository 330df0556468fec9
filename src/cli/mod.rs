//! Command-line entry point and dispatch.
//!
//! Parses the surface defined in [`definition`], builds a [`Session`],
//! takes the instance lock in the mode the command needs (shared for
//! queries, exclusive inside the executor for mutations) and maps
//! errors onto the exit-code contract: `0` success, `100` for pending
//! updates from `check-update`, `1` otherwise.

pub mod alter;
pub mod definition;
pub mod history_cmd;
pub mod maintenance;
pub mod query;

use clap::Parser;

use crate::app::{Session, init_logging};
use crate::error::Result;
use crate::lock::LockMode;
use crate::output::{Assume, Reporter};
use crate::solver::JobAction;

use definition::{Args, Command, HistoryCommand};

/// What: Run the CLI to completion.
///
/// Output:
/// - The process exit code.
pub async fn run() -> i32 {
    let args = Args::parse();
    let opts = args.session_options();
    let reporter = Reporter::new(opts.output, Assume::No);
    let cmdline = std::env::args().skip(1).collect::<Vec<_>>().join(" ");

    match dispatch(args, cmdline).await {
        Ok(code) => code,
        Err(e) => {
            reporter.error(&e.to_string());
            e.exit_code()
        }
    }
}

async fn dispatch(args: Args, cmdline: String) -> Result<i32> {
    let opts = args.session_options();
    let verbose = opts.verbose;
    let quiet = opts.quiet;

    let mut session = Session::build(opts)?;
    let log_dir = session.config.main.rooted(&session.config.main.persistdir);
    let _log_guard = init_logging(verbose, quiet, &log_dir);

    // Read-only commands proceed under the shared lock; mutating
    // commands acquire the exclusive lock inside the executor.
    //
    // The guard is taken off a cloned `Arc` handle rather than
    // `session.lock` directly so it doesn't keep `session` borrowed
    // immutably for the rest of this function, which needs `&mut
    // session` for dispatch.
    let lock_handle = std::sync::Arc::clone(&session.lock);
    let read_guard = if is_read_only(&args.command) {
        Some(lock_handle.acquire(LockMode::Read)?)
    } else {
        None
    };

    let code = match args.command {
        Command::Install { packages } => {
            let jobs = alter::jobs_for(JobAction::Install, &packages);
            alter::run_jobs(&mut session, jobs, cmdline).await?
        }
        Command::Remove { packages } => {
            let jobs = alter::jobs_for(JobAction::Erase, &packages);
            alter::run_jobs(&mut session, jobs, cmdline).await?
        }
        Command::Upgrade { packages } => {
            let jobs = alter::jobs_for(JobAction::Upgrade, &packages);
            alter::run_jobs(&mut session, jobs, cmdline).await?
        }
        Command::Downgrade { packages } => {
            let jobs = alter::jobs_for(JobAction::Downgrade, &packages);
            alter::run_jobs(&mut session, jobs, cmdline).await?
        }
        Command::Reinstall { packages } => {
            let jobs = alter::jobs_for(JobAction::Reinstall, &packages);
            alter::run_jobs(&mut session, jobs, cmdline).await?
        }
        Command::DistroSync => {
            let jobs = alter::jobs_for(JobAction::DistroSync, &[]);
            alter::run_jobs(&mut session, jobs, cmdline).await?
        }
        Command::Autoremove { packages } => {
            let jobs = alter::jobs_for(JobAction::AutoRemove, &packages);
            alter::run_jobs(&mut session, jobs, cmdline).await?
        }
        Command::List { args } => query::run_list(&mut session, &args).await?,
        Command::Info { args } => query::run_info(&mut session, &args).await?,
        Command::Search { needles } => query::run_search(&mut session, &needles).await?,
        Command::Provides { spec } => query::run_provides(&mut session, &spec).await?,
        Command::Repolist { which } => query::run_repolist(&session, which.as_deref())?,
        Command::Repoquery {
            patterns,
            installed,
            available,
            requires,
            provides,
            files,
            changelogs,
        } => {
            query::run_repoquery(
                &mut session,
                &patterns,
                installed,
                available,
                requires,
                provides,
                files,
                changelogs,
            )
            .await?
        }
        Command::Makecache => maintenance::run_makecache(&mut session).await?,
        Command::Clean { kinds } => maintenance::run_clean(&session, &kinds)?,
        Command::Check => alter::run_check(&mut session).await?,
        Command::CheckLocal { dir } => alter::run_check_local(&mut session, &dir).await?,
        Command::CheckUpdate { patterns } => {
            query::run_check_update(&mut session, &patterns).await?
        }
        Command::Updateinfo { args } => query::run_updateinfo(&mut session, &args).await?,
        Command::History { sub } => match sub.unwrap_or(HistoryCommand::List) {
            HistoryCommand::List => history_cmd::run_list(&session)?,
            HistoryCommand::Init => history_cmd::run_init(&session)?,
            HistoryCommand::Rollback { id } => {
                history_cmd::run_rollback(&mut session, id).await?
            }
            HistoryCommand::Undo { id } => history_cmd::run_undo(&mut session, id).await?,
            HistoryCommand::Redo { id } => history_cmd::run_redo(&mut session, id).await?,
        },
        Command::Mark { action, packages } => {
            history_cmd::run_mark(&session, &action, &packages)?
        }
    };

    drop(read_guard);
    Ok(code)
}

/// Commands that never mutate the system.
fn is_read_only(command: &Command) -> bool {
    matches!(
        command,
        Command::List { .. }
            | Command::Info { .. }
            | Command::Search { .. }
            | Command::Provides { .. }
            | Command::Repolist { .. }
            | Command::Repoquery { .. }
            | Command::Check
            | Command::CheckLocal { .. }
            | Command::CheckUpdate { .. }
            | Command::Updateinfo { .. }
    )
}
