//! Session assembly.
//!
//! A [`Session`] wires one command invocation together: configuration
//! with overlays, logging, the blob store, the instance lock, the
//! history store, the RPM backend, and (for commands that need it) the
//! package pool built from the installed set plus every enabled
//! repository's metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cache::BlobStore;
use crate::config::repo::{RepoConfig, apply_repo_selection};
use crate::config::setopt::SetOpt;
use crate::config::vars::Vars;
use crate::config::{Config, DEFAULT_CONF_PATH};
use crate::crypto::keyring::Keyring;
use crate::error::{Error, Result};
use crate::executor::ExecuteOptions;
use crate::fetch::IpPolicy;
use crate::history::HistoryStore;
use crate::lock::InstanceLock;
use crate::output::{Assume, OutputMode, Reporter};
use crate::plugin::{NoopPlugins, PluginEvent, PluginHandler};
use crate::pool::Pool;
use crate::repo::updateinfo::Advisory;
use crate::repo::{FetchOptions, LoadedRepo, RepoLoader};
use crate::rpmdb::{RpmBackend, RpmExecBackend};
use crate::solver::{SecurityFilter, SolverFlags};

/// Raw session options, filled by the CLI layer.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    /// Configuration file override (`-c`).
    pub conf_path: Option<PathBuf>,
    /// Install root override.
    pub installroot: Option<PathBuf>,
    /// Release version override.
    pub releasever: Option<String>,
    /// Raw `--setopt` arguments.
    pub setopts: Vec<String>,
    /// `--enablerepo` globs.
    pub enable_repos: Vec<String>,
    /// `--disablerepo` globs.
    pub disable_repos: Vec<String>,
    /// `--repo` restrictions.
    pub only_repos: Vec<String>,
    /// Extra `--exclude` globs.
    pub excludes: Vec<String>,
    /// Ignore every configured exclude.
    pub disable_excludes: bool,
    /// Force a metadata refresh.
    pub refresh: bool,
    /// Never touch the network.
    pub cacheonly: bool,
    /// Snapshot cutoff for repo metadata.
    pub snapshot: Option<i64>,
    /// Disable all GPG checking.
    pub no_gpgcheck: bool,
    /// Skip package signature verification.
    pub skip_signature: bool,
    /// Skip digest verification.
    pub skip_digest: bool,
    /// Output mode.
    pub output: OutputMode,
    /// Confirmation policy.
    pub assume: Assume,
    /// Address family preference.
    pub ip: IpPolicy,
    /// Solver flags.
    pub solver: SolverFlags,
    /// Security restriction for upgrades.
    pub security: SecurityFilter,
    /// Stop after downloading.
    pub download_only: bool,
    /// Alternative download destination.
    pub download_dir: Option<PathBuf>,
    /// Test-only transaction.
    pub test_only: bool,
    /// Suppress the autoremove sweep on removals.
    pub no_autoremove: bool,
    /// Verbose logging.
    pub verbose: bool,
    /// Quiet logging.
    pub quiet: bool,
}

/// One fully wired command session.
pub struct Session {
    /// Loaded configuration after overlays.
    pub config: Config,
    /// Session options.
    pub opts: SessionOptions,
    /// Output context.
    pub reporter: Reporter,
    /// Blob store rooted at the cache dir.
    pub store: BlobStore,
    /// Instance lock handle.
    pub lock: Arc<InstanceLock>,
    /// History store.
    pub history: HistoryStore,
    /// The RPM backend.
    pub backend: Box<dyn RpmBackend>,
    /// Plugin event sink.
    pub plugins: Box<dyn PluginHandler>,
    /// Session keyring of imported repo keys.
    pub keyring: Keyring,
    /// The package pool; empty until [`Session::load_metadata`] runs.
    pub pool: Pool,
    /// Loaded repos backing the pool.
    pub repos: Vec<LoadedRepo>,
    /// Advisories across all loaded repos.
    pub advisories: Vec<Advisory>,
    /// Auto flags from history.
    pub auto_flags: HashMap<String, bool>,
}

impl Session {
    /// What: Build a session from options.
    ///
    /// Output:
    /// - A session with configuration, lock, history and backend ready;
    ///   the pool stays empty until metadata is loaded.
    pub fn build(opts: SessionOptions) -> Result<Self> {
        let setopts = opts
            .setopts
            .iter()
            .map(|raw| SetOpt::parse(raw))
            .collect::<Result<Vec<_>>>()?;

        let conf_path = opts
            .conf_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONF_PATH));
        let mut config = Config::load(&conf_path, &setopts)?;

        if let Some(root) = &opts.installroot {
            config.main.installroot = root.clone();
        }
        if let Some(releasever) = &opts.releasever {
            config.main.releasever = Some(releasever.clone());
        }
        apply_repo_selection(
            &mut config.repos,
            &opts.enable_repos,
            &opts.disable_repos,
            &opts.only_repos,
        )?;
        if config.main.gpgcheck {
            for repo in &mut config.repos {
                repo.gpgcheck = true;
            }
        }
        if opts.no_gpgcheck {
            for repo in &mut config.repos {
                repo.gpgcheck = false;
                repo.repo_gpgcheck = false;
            }
        }

        let reporter = Reporter::new(opts.output, opts.assume);
        let cachedir = config.main.rooted(&config.main.cachedir);
        let persistdir = config.main.rooted(&config.main.persistdir);
        let store = BlobStore::new(&cachedir);
        let history = HistoryStore::open(&persistdir.join("history.db"))?;

        let lock_path = config.main.lock_path();
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let lock = Arc::new(InstanceLock::open(&lock_path)?);

        let backend: Box<dyn RpmBackend> =
            Box::new(RpmExecBackend::new(config.main.installroot.clone()));
        let mut plugins: Box<dyn PluginHandler> = Box::new(NoopPlugins);
        if config.main.plugins {
            plugins.handle(PluginEvent::Init)?;
        }

        let auto_flags = history.auto_flags()?;

        Ok(Self {
            config,
            opts,
            reporter,
            store,
            lock,
            history,
            backend,
            plugins,
            keyring: Keyring::new(),
            pool: Pool::new(),
            repos: Vec::new(),
            advisories: Vec::new(),
            auto_flags,
        })
    }

    /// What: Resolve the variable table for URL substitution.
    ///
    /// Details:
    /// - `$releasever` falls back to the version of the installed
    ///   package providing `distroverpkg` when not configured.
    pub fn vars(&mut self) -> Result<Vars> {
        let releasever = match &self.config.main.releasever {
            Some(v) => v.clone(),
            None => {
                let detected = self.detect_releasever()?;
                self.config.main.releasever = Some(detected.clone());
                detected
            }
        };
        let mut vars = Vars::builtin(&releasever, &self.config.main.basearch);
        let varsdir = self.config.main.rooted(&self.config.main.varsdir);
        vars.load_dir(&varsdir)?;
        Ok(vars)
    }

    fn detect_releasever(&self) -> Result<String> {
        let distroverpkg = &self.config.main.distroverpkg;
        let installed = self.backend.installed()?;
        for pkg in &installed {
            let provides_it = pkg.nevra.name == *distroverpkg
                || pkg.provides.iter().any(|p| &p.name == distroverpkg);
            if provides_it {
                return Ok(pkg.nevra.evr.version.clone());
            }
        }
        debug!(distroverpkg, "no release provider installed");
        Ok(String::new())
    }

    /// What: Load the installed set and all enabled repo metadata into
    /// the pool.
    ///
    /// Inputs:
    /// - `with_installed`: Skip the RPM database for commands that only
    ///   look at repos.
    ///
    /// Details:
    /// - Repos are processed in configuration order. A repo failing with
    ///   `skip_if_unavailable=1` is dropped with a warning; otherwise
    ///   the failure propagates.
    pub async fn load_metadata(&mut self, with_installed: bool) -> Result<()> {
        let vars = self.vars()?;
        self.pool.set_arch(self.config.main.basearch.clone());
        self.pool.set_rootdir(self.config.main.installroot.clone());

        if with_installed {
            let installed = self.backend.installed()?;
            self.pool.add_installed(installed);
        }

        let fetch_opts = FetchOptions {
            refresh: self.opts.refresh,
            cacheonly: self.opts.cacheonly,
            snapshot_cutoff: self.opts.snapshot,
            skip_signatures: self.opts.no_gpgcheck || self.opts.skip_signature,
            ip: self.opts.ip,
        };

        let enabled: Vec<RepoConfig> = self
            .config
            .enabled_repos()
            .map(|repo| repo.resolved(&vars))
            .collect::<Result<_>>()?;
        if enabled.is_empty() {
            warn!("no enabled repositories");
        }

        for mut repo in enabled {
            self.plugins
                .handle(PluginEvent::RepoReadConfig { repo: &mut repo })?;
            let loader = RepoLoader::new(&self.config.main, &self.store, &fetch_opts);
            match loader
                .load(&repo, &mut self.keyring, self.plugins.as_mut())
                .await
            {
                Ok(loaded) => {
                    self.pool.add_repo(
                        &loaded.config.id,
                        loaded.config.priority,
                        loaded.packages.clone(),
                    );
                    self.advisories.extend(loaded.advisories.iter().cloned());
                    self.repos.push(loaded);
                }
                Err(e) if repo.skip_if_unavailable && is_repo_recoverable(&e) => {
                    warn!(repo = %repo.id, error = %e, "repository skipped");
                }
                Err(e) => return Err(e),
            }
        }

        if !self.opts.disable_excludes {
            let mut patterns = self.config.main.excludes.clone();
            patterns.extend(self.opts.excludes.iter().cloned());
            for repo in &self.repos {
                patterns.extend(repo.config.exclude.iter().cloned());
            }
            self.pool.apply_excludes(&patterns);
        }
        self.pool.apply_minversions(&self.config.main.minversions);

        let user_installed: Vec<String> = self
            .auto_flags
            .iter()
            .filter(|(_, auto)| !**auto)
            .map(|(name, _)| name.clone())
            .collect();
        self.pool.set_user_installed(user_installed);

        Ok(())
    }

    /// Execution options derived from the session.
    #[must_use]
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            test_only: self.opts.test_only,
            download_only: self.opts.download_only,
            download_dir: self.opts.download_dir.clone(),
            no_gpgcheck: self.opts.no_gpgcheck,
            skip_signature: self.opts.skip_signature,
            skip_digest: self.opts.skip_digest,
            interactive: matches!(self.opts.assume, Assume::Ask),
            ip: self.opts.ip,
        }
    }
}

/// Whether a repo-level failure is recoverable under
/// `skip_if_unavailable`.
fn is_repo_recoverable(e: &Error) -> bool {
    matches!(
        e,
        Error::Network { .. }
            | Error::NoBaseUrl { .. }
            | Error::ChecksumMismatch { .. }
            | Error::BadSignature { .. }
            | Error::NoKey { .. }
            | Error::CacheDisabled { .. }
            | Error::CacheCorrupt { .. }
    )
}

/// What: Install the tracing subscriber for one process.
///
/// Inputs:
/// - `verbose` / `quiet`: Console filter level shortcuts.
/// - `log_dir`: Directory receiving `ferrite.log`; skipped when not
///   writable.
///
/// Output:
/// - The appender guard; hold it for the process lifetime.
///
/// Details:
/// - `FERRITE_LOG` overrides the console level entirely.
pub fn init_logging(
    verbose: bool,
    quiet: bool,
    log_dir: &Path,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("FERRITE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if std::fs::create_dir_all(log_dir).is_ok() {
        let appender = tracing_appender::rolling::never(log_dir, "ferrite.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_creates_stores_under_configured_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("ferrite.conf");
        std::fs::write(
            &conf,
            format!(
                "[main]\ncachedir={}\npersistdir={}\n",
                dir.path().join("cache").display(),
                dir.path().join("persist").display()
            ),
        )
        .unwrap();
        let opts = SessionOptions {
            conf_path: Some(conf),
            installroot: Some(dir.path().to_path_buf()),
            ..SessionOptions::default()
        };
        let session = Session::build(opts).unwrap();
        assert!(session.pool.is_empty());
        // Configured dirs are interpreted relative to the install root.
        let history_db = session
            .config
            .main
            .rooted(&session.config.main.persistdir)
            .join("history.db");
        assert!(history_db.exists());
    }

    #[test]
    fn nogpgcheck_clears_repo_flags() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("ferrite.conf");
        std::fs::write(
            &conf,
            format!(
                "[main]\ncachedir={}\npersistdir={}\n[r]\nname=R\ngpgcheck=1\nrepo_gpgcheck=1\n",
                dir.path().join("cache").display(),
                dir.path().join("persist").display()
            ),
        )
        .unwrap();
        let opts = SessionOptions {
            conf_path: Some(conf),
            installroot: Some(dir.path().to_path_buf()),
            no_gpgcheck: true,
            ..SessionOptions::default()
        };
        let session = Session::build(opts).unwrap();
        assert!(!session.config.repos[0].gpgcheck);
        assert!(!session.config.repos[0].repo_gpgcheck);
    }
}
