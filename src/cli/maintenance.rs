//! Cache maintenance commands: `makecache` and `clean`.

use crate::app::Session;
use crate::cache::CleanKind;
use crate::error::{Error, Result};
use crate::lock::LockMode;

/// What: The `makecache` command.
///
/// Details:
/// - Loads metadata for every enabled repo without touching the RPM
///   database; freshness rules still apply unless `--refresh` is set.
pub async fn run_makecache(session: &mut Session) -> Result<i32> {
    session.load_metadata(false).await?;
    let total: usize = session.repos.iter().map(|r| r.packages.len()).sum();
    session.reporter.json(&serde_json::json!({
        "repos": session.repos.len(),
        "packages": total,
    }));
    session
        .reporter
        .line(&format!("Metadata cache created for {} repo(s).", session.repos.len()));
    Ok(0)
}

/// What: The `clean` command.
///
/// Inputs:
/// - `kinds`: Category words; unknown words are a usage error.
pub fn run_clean(session: &Session, kinds: &[String]) -> Result<i32> {
    let parsed: Vec<CleanKind> = kinds
        .iter()
        .map(|word| {
            CleanKind::parse(word).ok_or_else(|| {
                Error::User(format!(
                    "unknown clean category '{word}' (expected packages, metadata, dbcache, keys, expire-cache or all)"
                ))
            })
        })
        .collect::<Result<_>>()?;

    // Cache mutation takes the exclusive lock like any other write.
    let _guard = session.lock.acquire(LockMode::Write)?;
    let removed = session.store.clean(&parsed)?;
    session.reporter.json(&serde_json::json!({ "removed": removed }));
    session
        .reporter
        .line(&format!("{removed} cache item(s) removed."));
    Ok(0)
}
