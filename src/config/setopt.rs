//! `--setopt` command-line overlays.
//!
//! A setopt is `key=value` for the main configuration or
//! `<repo-glob>.key=value` for repository options. Overlays are parsed up
//! front and applied after the files are read, so they win over any file
//! content.

use std::path::Path;

use crate::config::repo::RepoConfig;
use crate::error::{Error, Result};
use crate::util::glob_match;

/// One parsed `--setopt` argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetOpt {
    /// Repo id glob; `None` targets the `[main]` configuration.
    pub repo: Option<String>,
    /// Option key.
    pub key: String,
    /// Raw value.
    pub value: String,
}

impl SetOpt {
    /// What: Parse a raw `--setopt` argument.
    ///
    /// Inputs:
    /// - `raw`: `key=value` or `repo.key=value`.
    ///
    /// Output:
    /// - The parsed overlay, or [`Error::User`] when the `=` is missing
    ///   or the key is empty.
    ///
    /// Details:
    /// - Only the first `.` before the `=` separates a repo scope, so
    ///   main keys containing dots stay expressible by quoting the repo
    ///   part is never needed in practice.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((key_part, value)) = raw.split_once('=') else {
            return Err(Error::User(format!(
                "--setopt '{raw}' is not of the form key=value"
            )));
        };
        let key_part = key_part.trim();
        if key_part.is_empty() {
            return Err(Error::User(format!("--setopt '{raw}' has an empty key")));
        }
        let (repo, key) = match key_part.split_once('.') {
            Some((repo, key)) if !repo.is_empty() && !key.is_empty() => {
                (Some(repo.to_string()), key.to_string())
            }
            _ => (None, key_part.to_string()),
        };
        Ok(Self {
            repo,
            key,
            value: value.trim().to_string(),
        })
    }
}

/// What: Apply repo-scoped overlays onto the loaded repo configs.
///
/// Inputs:
/// - `opts`: All parsed setopts; main-scoped entries are ignored here.
/// - `repos`: Loaded repo configs, mutated in place.
///
/// Output:
/// - `Ok(())`, or the repo config's own validation error for bad values.
///
/// Details:
/// - The repo part is a glob, so `--setopt *.gpgcheck=0` fans out.
/// - An overlay matching no repo id is reported as
///   [`Error::RepoNotFound`] to catch typos.
pub fn apply_repo_setopts(opts: &[SetOpt], repos: &mut [RepoConfig]) -> Result<()> {
    let origin = Path::new("<setopt>");
    for opt in opts {
        let Some(pattern) = &opt.repo else { continue };
        let mut matched = false;
        for repo in repos.iter_mut() {
            if glob_match(pattern, &repo.id) {
                matched = true;
                repo.apply_key(origin, &opt.key, &opt.value)?;
            }
        }
        if !matched {
            return Err(Error::RepoNotFound {
                id: pattern.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_main_and_repo_scopes() {
        let main = SetOpt::parse("gpgcheck=1").unwrap();
        assert_eq!(main.repo, None);
        assert_eq!(main.key, "gpgcheck");
        assert_eq!(main.value, "1");

        let scoped = SetOpt::parse("base.priority=5").unwrap();
        assert_eq!(scoped.repo.as_deref(), Some("base"));
        assert_eq!(scoped.key, "priority");
    }

    #[test]
    fn rejects_malformed() {
        assert!(SetOpt::parse("no-equals").is_err());
        assert!(SetOpt::parse("=value").is_err());
    }

    #[test]
    fn repo_glob_fans_out() {
        let mut repos = vec![RepoConfig::new("base"), RepoConfig::new("base-debug")];
        let opts = vec![SetOpt::parse("base*.priority=7").unwrap()];
        apply_repo_setopts(&opts, &mut repos).unwrap();
        assert_eq!(repos[0].priority, 7);
        assert_eq!(repos[1].priority, 7);
    }

    #[test]
    fn unmatched_repo_scope_is_reported() {
        let mut repos = vec![RepoConfig::new("base")];
        let opts = vec![SetOpt::parse("nosuch.priority=7").unwrap()];
        assert!(apply_repo_setopts(&opts, &mut repos).is_err());
    }
}
