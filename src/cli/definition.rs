//! Command-line surface.
//!
//! Global flags apply to every subcommand; per-command arguments stay on
//! the subcommand. Conversion into [`SessionOptions`] happens here so
//! the command handlers only ever see typed session state.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::app::SessionOptions;
use crate::fetch::IpPolicy;
use crate::output::{Assume, OutputMode};
use crate::solver::{SecurityFilter, SolverFlags};

/// An RPM package manager with SAT dependency resolution.
#[derive(Parser, Debug)]
#[command(name = "ferrite", version, about, disable_help_subcommand = true)]
pub struct Args {
    /// The command to run.
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file path.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Operate under this install root.
    #[arg(long, global = true)]
    pub installroot: Option<PathBuf>,

    /// Override `$releasever`.
    #[arg(long, global = true)]
    pub releasever: Option<String>,

    /// Set a config option: `key=value` or `repo.key=value`.
    #[arg(long = "setopt", global = true)]
    pub setopt: Vec<String>,

    /// Enable repos matching a glob.
    #[arg(long = "enablerepo", global = true)]
    pub enablerepo: Vec<String>,

    /// Disable repos matching a glob.
    #[arg(long = "disablerepo", global = true)]
    pub disablerepo: Vec<String>,

    /// Use only these repos.
    #[arg(long = "repo", alias = "repoid", global = true)]
    pub repo: Vec<String>,

    /// Disable all GPG signature checking.
    #[arg(long, global = true)]
    pub nogpgcheck: bool,

    /// Skip package signature verification.
    #[arg(long = "skipsignature", global = true)]
    pub skipsignature: bool,

    /// Skip artifact digest verification.
    #[arg(long = "skipdigest", global = true)]
    pub skipdigest: bool,

    /// Force expiry of cached metadata.
    #[arg(long, global = true)]
    pub refresh: bool,

    /// Run entirely from the cache.
    #[arg(long = "cacheonly", short = 'C', global = true)]
    pub cacheonly: bool,

    /// Only load repo metadata published before this Unix time.
    #[arg(long = "snapshottime", global = true)]
    pub snapshottime: Option<i64>,

    /// Assume yes for all prompts.
    #[arg(short = 'y', long = "assumeyes", global = true)]
    pub assumeyes: bool,

    /// Assume no for all prompts.
    #[arg(long = "assumeno", global = true)]
    pub assumeno: bool,

    /// Errors only.
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Debug logging.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Emit one JSON document instead of human output.
    #[arg(long, global = true)]
    pub json: bool,

    /// Download packages without installing them.
    #[arg(long = "downloadonly", global = true)]
    pub downloadonly: bool,

    /// Directory for downloaded packages.
    #[arg(long = "downloaddir", global = true)]
    pub downloaddir: Option<PathBuf>,

    /// Exclude packages matching a glob.
    #[arg(long = "exclude", global = true)]
    pub exclude: Vec<String>,

    /// Ignore all configured excludes.
    #[arg(long = "disableexcludes", global = true)]
    pub disableexcludes: bool,

    /// Resolve hosts to IPv4 only.
    #[arg(short = '4', global = true)]
    pub ipv4: bool,

    /// Resolve hosts to IPv6 only.
    #[arg(short = '6', global = true)]
    pub ipv6: bool,

    /// Insist on the newest candidates.
    #[arg(long, global = true)]
    pub best: bool,

    /// Allow erasing installed packages to resolve conflicts.
    #[arg(long = "allowerasing", global = true)]
    pub allowerasing: bool,

    /// Drop unresolvable jobs instead of failing.
    #[arg(long = "skip-broken", global = true)]
    pub skip_broken: bool,

    /// Restrict upgrades to security advisories.
    #[arg(long, global = true)]
    pub security: bool,

    /// Restrict upgrades to advisories at or above this severity.
    #[arg(long = "sec-severity", global = true)]
    pub sec_severity: Option<String>,

    /// Restrict upgrades to advisories suggesting a reboot.
    #[arg(long = "reboot-required", global = true)]
    pub reboot_required: bool,

    /// Validate the transaction without changing anything.
    #[arg(long = "testonly", global = true)]
    pub testonly: bool,

    /// Keep no-longer-needed dependencies installed.
    #[arg(long = "noautoremove", global = true)]
    pub noautoremove: bool,
}

/// All subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install packages.
    Install {
        /// Package specs.
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Remove installed packages.
    #[command(alias = "erase")]
    Remove {
        /// Package specs.
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Upgrade packages, or everything when none are named.
    #[command(alias = "update")]
    Upgrade {
        /// Package specs.
        packages: Vec<String>,
    },
    /// Downgrade packages, or everything when none are named.
    Downgrade {
        /// Package specs.
        packages: Vec<String>,
    },
    /// Reinstall the exact installed versions.
    Reinstall {
        /// Package specs.
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Synchronize every installed package to the repo version.
    #[command(name = "distro-sync")]
    DistroSync,
    /// Remove orphaned auto-installed packages.
    Autoremove {
        /// Optional packages to remove alongside the sweep.
        packages: Vec<String>,
    },
    /// List packages by scope and pattern.
    List {
        /// Optional scope word, then name globs.
        args: Vec<String>,
    },
    /// Detailed package information.
    Info {
        /// Optional scope word, then name globs.
        args: Vec<String>,
    },
    /// Search package names and summaries.
    Search {
        /// Search needles.
        #[arg(required = true)]
        needles: Vec<String>,
    },
    /// Find packages providing a capability or file.
    #[command(alias = "whatprovides")]
    Provides {
        /// Capability or file path.
        spec: String,
    },
    /// List configured repositories.
    Repolist {
        /// `enabled` (default), `disabled` or `all`.
        which: Option<String>,
    },
    /// Query packages with structured filters.
    Repoquery {
        /// Name globs.
        patterns: Vec<String>,
        /// Restrict to installed packages.
        #[arg(long)]
        installed: bool,
        /// Restrict to available packages.
        #[arg(long)]
        available: bool,
        /// Show the requires of each match.
        #[arg(long)]
        requires: bool,
        /// Show the provides of each match.
        #[arg(long)]
        provides: bool,
        /// Show the file list of each match.
        #[arg(long = "list")]
        files: bool,
        /// Show the changelogs of each match.
        #[arg(long)]
        changelogs: bool,
    },
    /// Download metadata for all enabled repos.
    Makecache,
    /// Remove cached data.
    Clean {
        /// Categories: packages, metadata, dbcache, keys, expire-cache, all.
        #[arg(required = true)]
        kinds: Vec<String>,
    },
    /// Verify dependency consistency of the installed set.
    Check,
    /// Check local RPM files for installability.
    #[command(name = "check-local")]
    CheckLocal {
        /// Directory of `.rpm` files.
        dir: PathBuf,
    },
    /// Report pending updates; exits 100 when any exist.
    #[command(name = "check-update")]
    CheckUpdate {
        /// Optional name globs.
        patterns: Vec<String>,
    },
    /// Show advisory information.
    Updateinfo {
        /// `summary` (default), `list` or `info`, then name globs.
        args: Vec<String>,
    },
    /// Inspect or replay the transaction history.
    History {
        /// Subcommand; defaults to `list`.
        #[command(subcommand)]
        sub: Option<HistoryCommand>,
    },
    /// Change a package's user/auto flag.
    Mark {
        /// `install` (user) or `remove` (auto).
        action: String,
        /// Package names.
        #[arg(required = true)]
        packages: Vec<String>,
    },
}

/// `history` subcommands.
#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// List transactions.
    List,
    /// Initialize an empty history database.
    Init,
    /// Undo every transaction newer than the given id.
    Rollback {
        /// Anchor transaction id (0 for "before the first").
        id: i64,
    },
    /// Invert one transaction.
    Undo {
        /// Transaction id.
        id: i64,
    },
    /// Re-apply one transaction.
    Redo {
        /// Transaction id.
        id: i64,
    },
}

impl Args {
    /// What: Fold the global flags into session options.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            conf_path: self.config.clone(),
            installroot: self.installroot.clone(),
            releasever: self.releasever.clone(),
            setopts: self.setopt.clone(),
            enable_repos: self.enablerepo.clone(),
            disable_repos: self.disablerepo.clone(),
            only_repos: self.repo.clone(),
            excludes: self.exclude.clone(),
            disable_excludes: self.disableexcludes,
            refresh: self.refresh,
            cacheonly: self.cacheonly,
            snapshot: self.snapshottime,
            no_gpgcheck: self.nogpgcheck,
            skip_signature: self.skipsignature,
            skip_digest: self.skipdigest,
            output: if self.json {
                OutputMode::Json
            } else if self.quiet {
                OutputMode::Quiet
            } else {
                OutputMode::Normal
            },
            assume: if self.assumeno {
                Assume::No
            } else if self.assumeyes || self.json {
                Assume::Yes
            } else {
                Assume::Ask
            },
            ip: if self.ipv4 {
                IpPolicy::V4
            } else if self.ipv6 {
                IpPolicy::V6
            } else {
                IpPolicy::Any
            },
            solver: SolverFlags {
                best: self.best,
                allow_erasing: self.allowerasing,
                no_deps: false,
                skip_broken: self.skip_broken,
                skip_conflicts: false,
                skip_obsoletes: false,
                skip_disabled: false,
            },
            security: SecurityFilter {
                security_only: self.security,
                min_severity: self.sec_severity.clone(),
                reboot_required: self.reboot_required,
            },
            download_only: self.downloadonly,
            download_dir: self.downloaddir.clone(),
            test_only: self.testonly,
            no_autoremove: self.noautoremove,
            verbose: self.verbose,
            quiet: self.quiet,
        }
    }
}
