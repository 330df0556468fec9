//! Typed repository configuration.
//!
//! One [`RepoConfig`] per `[section]` of a `.repo` file. URLs are stored
//! raw; variable substitution happens when the config is resolved against
//! the session [`Vars`](super::vars::Vars) table, so `--releasever`
//! overrides take effect without re-reading files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ini::{IniSection, parse_bool, read_ini};
use crate::config::vars::Vars;
use crate::error::{Error, Result};
use crate::util::glob_match;

/// Default repo priority; lower numbers win ties.
pub const DEFAULT_PRIORITY: u32 = 50;
/// Default metadata expiry in seconds (48 hours).
pub const DEFAULT_METADATA_EXPIRE: u64 = 172_800;
/// Default per-transfer retry count.
pub const DEFAULT_RETRIES: u32 = 10;

/// Configuration of a single repository.
#[derive(Clone, Debug)]
pub struct RepoConfig {
    /// Unique repository id (the section name).
    pub id: String,
    /// Human-readable name; falls back to the id.
    pub name: String,
    /// Ordered base URLs, tried first to last.
    pub base_urls: Vec<String>,
    /// Metalink URL, resolved by an external collaborator.
    pub metalink: Option<String>,
    /// Mirrorlist URL, resolved by an external collaborator.
    pub mirrorlist: Option<String>,
    /// Whether the repo participates in operations.
    pub enabled: bool,
    /// Verify signatures of downloaded packages.
    pub gpgcheck: bool,
    /// Verify the detached signature of the repomd file.
    pub repo_gpgcheck: bool,
    /// URLs of armored public keys for this repo.
    pub gpg_keys: Vec<String>,
    /// Verify TLS peer certificates.
    pub ssl_verify: bool,
    /// CA bundle override.
    pub ssl_ca_cert: Option<PathBuf>,
    /// Client certificate for mutual TLS.
    pub ssl_client_cert: Option<PathBuf>,
    /// Client key for mutual TLS.
    pub ssl_client_key: Option<PathBuf>,
    /// Basic-auth user.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// Tie-break priority; lower wins.
    pub priority: u32,
    /// Per-transfer timeout in seconds; `0` means the client default.
    pub timeout: u64,
    /// Minimum transfer rate in bytes/second before a transfer aborts.
    pub minrate: u64,
    /// Bandwidth cap in bytes/second; `0` means unlimited.
    pub throttle: u64,
    /// Transfer retry count.
    pub retries: u32,
    /// Seconds the cached repomd stays fresh.
    pub metadata_expire: u64,
    /// Drop the repo for the run instead of failing on fetch errors.
    pub skip_if_unavailable: bool,
    /// Skip the filelists artifact.
    pub skip_md_filelists: bool,
    /// Skip the updateinfo artifact.
    pub skip_md_updateinfo: bool,
    /// Skip the "other" (changelog) artifact.
    pub skip_md_other: bool,
    /// Per-repo package exclusion globs.
    pub exclude: Vec<String>,
}

impl RepoConfig {
    /// What: Build a config with defaults for a given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_urls: Vec::new(),
            metalink: None,
            mirrorlist: None,
            enabled: true,
            gpgcheck: false,
            repo_gpgcheck: false,
            gpg_keys: Vec::new(),
            ssl_verify: true,
            ssl_ca_cert: None,
            ssl_client_cert: None,
            ssl_client_key: None,
            username: None,
            password: None,
            priority: DEFAULT_PRIORITY,
            timeout: 0,
            minrate: 0,
            throttle: 0,
            retries: DEFAULT_RETRIES,
            metadata_expire: DEFAULT_METADATA_EXPIRE,
            skip_if_unavailable: false,
            skip_md_filelists: false,
            skip_md_updateinfo: false,
            skip_md_other: false,
            exclude: Vec::new(),
        }
    }

    /// What: Apply one raw key/value onto the config.
    ///
    /// Inputs:
    /// - `path`: Source file, for error messages.
    /// - `key`, `value`: The raw pair from the INI reader.
    ///
    /// Output:
    /// - `Ok(())`; unknown keys are logged and ignored so newer repo
    ///   files stay loadable.
    pub fn apply_key(&mut self, path: &Path, key: &str, value: &str) -> Result<()> {
        let bad = |detail: String| Error::Config {
            path: path.to_path_buf(),
            detail,
        };
        match key {
            "name" => self.name = value.to_string(),
            "baseurl" => {
                self.base_urls = value.split_whitespace().map(str::to_string).collect();
            }
            "metalink" => self.metalink = some_nonempty(value),
            "mirrorlist" => self.mirrorlist = some_nonempty(value),
            "enabled" => {
                self.enabled = parse_bool(value)
                    .ok_or_else(|| bad(format!("invalid boolean '{value}' for enabled")))?;
            }
            "gpgcheck" => {
                self.gpgcheck = parse_bool(value)
                    .ok_or_else(|| bad(format!("invalid boolean '{value}' for gpgcheck")))?;
            }
            "repo_gpgcheck" => {
                self.repo_gpgcheck = parse_bool(value)
                    .ok_or_else(|| bad(format!("invalid boolean '{value}' for repo_gpgcheck")))?;
            }
            "gpgkey" => {
                self.gpg_keys = value.split_whitespace().map(str::to_string).collect();
            }
            "sslverify" => {
                self.ssl_verify = parse_bool(value)
                    .ok_or_else(|| bad(format!("invalid boolean '{value}' for sslverify")))?;
            }
            "sslcacert" => self.ssl_ca_cert = some_nonempty(value).map(PathBuf::from),
            "sslclientcert" => self.ssl_client_cert = some_nonempty(value).map(PathBuf::from),
            "sslclientkey" => self.ssl_client_key = some_nonempty(value).map(PathBuf::from),
            "username" => self.username = some_nonempty(value),
            "password" => self.password = some_nonempty(value),
            "priority" => {
                self.priority = value
                    .parse()
                    .map_err(|_| bad(format!("invalid priority '{value}'")))?;
            }
            "timeout" => {
                self.timeout = value
                    .parse()
                    .map_err(|_| bad(format!("invalid timeout '{value}'")))?;
            }
            "minrate" => {
                self.minrate = value
                    .parse()
                    .map_err(|_| bad(format!("invalid minrate '{value}'")))?;
            }
            "throttle" => {
                self.throttle = value
                    .parse()
                    .map_err(|_| bad(format!("invalid throttle '{value}'")))?;
            }
            "retries" => {
                self.retries = value
                    .parse()
                    .map_err(|_| bad(format!("invalid retries '{value}'")))?;
            }
            "metadata_expire" => {
                self.metadata_expire = parse_expire(value)
                    .ok_or_else(|| bad(format!("invalid metadata_expire '{value}'")))?;
            }
            "skip_if_unavailable" => {
                self.skip_if_unavailable = parse_bool(value).ok_or_else(|| {
                    bad(format!("invalid boolean '{value}' for skip_if_unavailable"))
                })?;
            }
            "skip_md_filelists" => {
                self.skip_md_filelists = parse_bool(value).unwrap_or(false);
            }
            "skip_md_updateinfo" => {
                self.skip_md_updateinfo = parse_bool(value).unwrap_or(false);
            }
            "skip_md_other" => {
                self.skip_md_other = parse_bool(value).unwrap_or(false);
            }
            "exclude" => {
                self.exclude = value.split_whitespace().map(str::to_string).collect();
            }
            other => {
                debug!(repo = %self.id, key = other, "ignoring unknown repo key");
            }
        }
        Ok(())
    }

    /// What: Build a config from one parsed INI section.
    pub fn from_section(path: &Path, section: &IniSection) -> Result<Self> {
        let mut repo = Self::new(section.name.clone());
        for (key, value, _line) in &section.entries {
            repo.apply_key(path, key, value)?;
        }
        Ok(repo)
    }

    /// What: Expand variables in all URL-bearing fields.
    ///
    /// Inputs:
    /// - `vars`: The session variable table.
    ///
    /// Output:
    /// - A copy with `$releasever` and friends substituted.
    pub fn resolved(&self, vars: &Vars) -> Result<Self> {
        let mut out = self.clone();
        out.base_urls = self
            .base_urls
            .iter()
            .map(|u| vars.substitute(u))
            .collect::<Result<_>>()?;
        out.metalink = self.metalink.as_deref().map(|u| vars.substitute(u)).transpose()?;
        out.mirrorlist = self
            .mirrorlist
            .as_deref()
            .map(|u| vars.substitute(u))
            .transpose()?;
        out.gpg_keys = self
            .gpg_keys
            .iter()
            .map(|u| vars.substitute(u))
            .collect::<Result<_>>()?;
        Ok(out)
    }
}

pub(crate) fn some_nonempty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse `metadata_expire` values: plain seconds, `never`, or `NNN[smhd]`.
fn parse_expire(value: &str) -> Option<u64> {
    if value.eq_ignore_ascii_case("never") {
        return Some(u64::MAX);
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let (num, unit) = value.split_at(value.len().checked_sub(1)?);
    let num: u64 = num.parse().ok()?;
    match unit {
        "s" => Some(num),
        "m" => Some(num * 60),
        "h" => Some(num * 3600),
        "d" => Some(num * 86_400),
        _ => None,
    }
}

/// What: Load every `.repo` file in a directory.
///
/// Inputs:
/// - `dir`: The repos directory; missing directories yield no repos.
///
/// Output:
/// - All repo configs in (file name, section) order.
///
/// Details:
/// - Files are visited in sorted name order so results are stable.
/// - A repository id appearing twice anywhere in the set is a
///   configuration error.
pub fn load_repo_dir(dir: &Path) -> Result<Vec<RepoConfig>> {
    let mut repos: Vec<RepoConfig> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(repos),
        Err(e) => return Err(Error::io(dir, e)),
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "repo"))
        .collect();
    paths.sort();

    for path in paths {
        for section in read_ini(&path)? {
            let repo = RepoConfig::from_section(&path, &section)?;
            if !seen.insert(repo.id.clone()) {
                return Err(Error::DuplicateRepoId { id: repo.id });
            }
            repos.push(repo);
        }
    }
    Ok(repos)
}

/// What: Apply `--enablerepo`/`--disablerepo`/`--repo` selections.
///
/// Inputs:
/// - `repos`: The loaded configs, mutated in place.
/// - `enable_globs` / `disable_globs`: Patterns from the command line,
///   applied in that order.
/// - `only`: When non-empty, exactly these ids stay enabled.
///
/// Output:
/// - `Ok(())`, or [`Error::RepoNotFound`] when an `only` id matches
///   nothing.
pub fn apply_repo_selection(
    repos: &mut [RepoConfig],
    enable_globs: &[String],
    disable_globs: &[String],
    only: &[String],
) -> Result<()> {
    for repo in repos.iter_mut() {
        if enable_globs.iter().any(|g| glob_match(g, &repo.id)) {
            repo.enabled = true;
        }
        if disable_globs.iter().any(|g| glob_match(g, &repo.id)) {
            repo.enabled = false;
        }
    }
    if !only.is_empty() {
        for id in only {
            if !repos.iter().any(|r| glob_match(id, &r.id)) {
                return Err(Error::RepoNotFound { id: id.clone() });
            }
        }
        for repo in repos.iter_mut() {
            repo.enabled = only.iter().any(|id| glob_match(id, &repo.id));
        }
    }
    Ok(())
}
