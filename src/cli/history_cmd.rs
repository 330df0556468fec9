//! `history` and `mark` commands.
//!
//! Listing reads the store directly; undo, redo and rollback translate
//! stored records into solver jobs and reuse the normal alteration
//! pipeline, so replayed transactions resolve, confirm and execute like
//! any other request.

use crate::app::Session;
use crate::cli::alter;
use crate::error::{Error, Result};
use crate::history::HistoryOp;
use crate::solver::{Job, JobAction};

/// What: The `history list` command.
pub fn run_list(session: &Session) -> Result<i32> {
    let records = session.history.list(None, None, true)?;
    session.reporter.history(&records);
    Ok(0)
}

/// What: The `history init` command; the schema is created on open.
pub fn run_init(session: &Session) -> Result<i32> {
    // Opening the session already initialized the database.
    session.reporter.line("History database initialized.");
    let _ = session;
    Ok(0)
}

/// What: The `history undo` command.
pub async fn run_undo(session: &mut Session, id: i64) -> Result<i32> {
    let ops = session.history.plan_undo(id)?;
    replay(session, ops, format!("history undo {id}")).await
}

/// What: The `history redo` command.
pub async fn run_redo(session: &mut Session, id: i64) -> Result<i32> {
    let ops = session.history.plan_redo(id)?;
    replay(session, ops, format!("history redo {id}")).await
}

/// What: The `history rollback` command.
pub async fn run_rollback(session: &mut Session, id: i64) -> Result<i32> {
    let ops = session.history.plan_rollback(id)?;
    replay(session, ops, format!("history rollback {id}")).await
}

async fn replay(session: &mut Session, ops: Vec<HistoryOp>, cmdline: String) -> Result<i32> {
    if ops.is_empty() {
        session.reporter.line("Nothing to do.");
        return Ok(0);
    }
    let jobs: Vec<Job> = ops
        .into_iter()
        .map(|op| match op {
            HistoryOp::Install(nevra) => Job {
                action: JobAction::Install,
                spec: Some(nevra),
            },
            HistoryOp::Erase(nevra) => Job {
                action: JobAction::Erase,
                spec: Some(nevra),
            },
        })
        .collect();
    alter::run_jobs(session, jobs, cmdline).await
}

/// What: The `mark` command.
///
/// Inputs:
/// - `action`: `install` marks user-installed, `remove` marks
///   auto-installed (eligible for autoremove).
pub fn run_mark(session: &Session, action: &str, packages: &[String]) -> Result<i32> {
    let auto = match action {
        "install" => false,
        "remove" => true,
        other => {
            return Err(Error::User(format!(
                "mark action must be 'install' or 'remove', got '{other}'"
            )));
        }
    };
    for name in packages {
        session.history.mark(name, auto)?;
        session.reporter.line(&format!(
            "{name} marked as {}.",
            if auto { "auto-installed" } else { "user-installed" }
        ));
    }
    Ok(0)
}
