//! Configuration loading and the typed `[main]` model.
//!
//! The INI reader ([`ini`]) produces raw sections; [`MainConfig`] and
//! [`RepoConfig`](repo::RepoConfig) interpret them. Repo definitions may
//! live both in the main conf file (any section other than `[main]`) and
//! in `.repo` files under the repos directories. `--setopt` overlays are
//! applied last and win.

pub mod ini;
pub mod repo;
pub mod setopt;
pub mod vars;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

use ini::{IniSection, parse_bool, read_ini};
use repo::RepoConfig;
use repo::some_nonempty as nonempty;
use setopt::SetOpt;

/// Default configuration file location.
pub const DEFAULT_CONF_PATH: &str = "/etc/ferrite/ferrite.conf";

/// Typed view of the `[main]` configuration section.
#[derive(Clone, Debug)]
pub struct MainConfig {
    /// Root directory all other paths are resolved under.
    pub installroot: PathBuf,
    /// Cache root for repository metadata and packages.
    pub cachedir: PathBuf,
    /// Durable state directory (history database).
    pub persistdir: PathBuf,
    /// Directories scanned for `.repo` files.
    pub reposdir: Vec<PathBuf>,
    /// Directory holding URL substitution variables.
    pub varsdir: PathBuf,
    /// Package whose version provides `$releasever` when unset.
    pub distroverpkg: String,
    /// Release version; resolved from the installed set when `None`.
    pub releasever: Option<String>,
    /// Base architecture for candidate filtering.
    pub basearch: String,
    /// Default package signature checking for repos that do not say.
    pub gpgcheck: bool,
    /// Packages that may have multiple versions installed at once.
    pub installonlypkgs: Vec<String>,
    /// How many installonly versions to keep.
    pub installonly_limit: u32,
    /// Erase no-longer-needed auto-installed dependencies on remove.
    pub clean_requirements_on_remove: bool,
    /// Packages whose removal is refused without a replacement.
    pub protected_packages: Vec<String>,
    /// Global package exclusion globs.
    pub excludes: Vec<String>,
    /// `name=evr` floors; older candidates are masked from the pool.
    pub minversions: Vec<String>,
    /// Whether plugin event callbacks fire.
    pub plugins: bool,
    /// HTTP(S) proxy URL.
    pub proxy: Option<String>,
    /// Proxy user.
    pub proxy_username: Option<String>,
    /// Proxy password.
    pub proxy_password: Option<String>,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            installroot: PathBuf::from("/"),
            cachedir: PathBuf::from("/var/cache/ferrite"),
            persistdir: PathBuf::from("/var/lib/ferrite"),
            reposdir: vec![
                PathBuf::from("/etc/yum.repos.d"),
                PathBuf::from("/etc/ferrite/repos.d"),
            ],
            varsdir: PathBuf::from("/etc/ferrite/vars"),
            distroverpkg: "system-release".to_string(),
            releasever: None,
            basearch: default_basearch().to_string(),
            gpgcheck: false,
            installonlypkgs: vec![
                "kernel".to_string(),
                "kernel-core".to_string(),
                "kernel-modules".to_string(),
            ],
            installonly_limit: 3,
            clean_requirements_on_remove: true,
            protected_packages: vec!["ferrite".to_string()],
            excludes: Vec::new(),
            minversions: Vec::new(),
            plugins: false,
            proxy: None,
            proxy_username: None,
            proxy_password: None,
        }
    }
}

/// Map the compile-time architecture to an RPM basearch name.
fn default_basearch() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "i686",
        "arm" => "armhfp",
        other => other,
    }
}

impl MainConfig {
    /// What: Apply one raw `[main]` key/value.
    ///
    /// Inputs:
    /// - `path`: Source file for error messages.
    /// - `key`, `value`: The raw pair.
    ///
    /// Output:
    /// - `Ok(())`; unknown keys are logged and ignored.
    pub fn apply_key(&mut self, path: &Path, key: &str, value: &str) -> Result<()> {
        let bad = |detail: String| Error::Config {
            path: path.to_path_buf(),
            detail,
        };
        match key {
            "installroot" => self.installroot = PathBuf::from(value),
            "cachedir" => self.cachedir = PathBuf::from(value),
            "persistdir" => self.persistdir = PathBuf::from(value),
            "reposdir" | "repodir" => {
                self.reposdir = value.split_whitespace().map(PathBuf::from).collect();
            }
            "varsdir" => self.varsdir = PathBuf::from(value),
            "distroverpkg" => self.distroverpkg = value.to_string(),
            "releasever" => self.releasever = Some(value.to_string()),
            "basearch" | "arch" => self.basearch = value.to_string(),
            "gpgcheck" => {
                self.gpgcheck = parse_bool(value)
                    .ok_or_else(|| bad(format!("invalid boolean '{value}' for gpgcheck")))?;
            }
            "installonlypkgs" => {
                self.installonlypkgs = value.split_whitespace().map(str::to_string).collect();
            }
            "installonly_limit" => {
                self.installonly_limit = value
                    .parse()
                    .map_err(|_| bad(format!("invalid installonly_limit '{value}'")))?;
            }
            "clean_requirements_on_remove" => {
                self.clean_requirements_on_remove = parse_bool(value).ok_or_else(|| {
                    bad(format!(
                        "invalid boolean '{value}' for clean_requirements_on_remove"
                    ))
                })?;
            }
            "protected_packages" => {
                self.protected_packages = value.split_whitespace().map(str::to_string).collect();
            }
            "excludes" | "exclude" => {
                self.excludes = value.split_whitespace().map(str::to_string).collect();
            }
            "minversions" => {
                self.minversions = value.split_whitespace().map(str::to_string).collect();
            }
            "plugins" => {
                self.plugins = parse_bool(value).unwrap_or(false);
            }
            "proxy" => self.proxy = nonempty(value),
            "proxy_username" => self.proxy_username = nonempty(value),
            "proxy_password" => self.proxy_password = nonempty(value),
            // Plugin path keys are accepted for compatibility; the event
            // interface does not load shared objects.
            "pluginpath" | "pluginconfpath" => {}
            other => {
                debug!(key = other, "ignoring unknown main config key");
            }
        }
        Ok(())
    }

    /// What: Prefix a configured path with the install root.
    ///
    /// Inputs:
    /// - `path`: An absolute path from the configuration.
    ///
    /// Output:
    /// - The path re-rooted under `installroot` (identity when the root
    ///   is `/`).
    #[must_use]
    pub fn rooted(&self, path: &Path) -> PathBuf {
        if self.installroot == Path::new("/") {
            return path.to_path_buf();
        }
        match path.strip_prefix("/") {
            Ok(rel) => self.installroot.join(rel),
            Err(_) => self.installroot.join(path),
        }
    }

    /// Lock file location under the install root.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.rooted(Path::new("/var/run")).join(crate::lock::LOCK_FILE_NAME)
    }
}

/// Everything loaded from configuration files plus overlays.
#[derive(Clone, Debug)]
pub struct Config {
    /// The `[main]` model.
    pub main: MainConfig,
    /// All repo definitions, file order, conf-file sections first.
    pub repos: Vec<RepoConfig>,
}

impl Config {
    /// What: Load the full configuration.
    ///
    /// Inputs:
    /// - `conf_path`: Main configuration file; a missing file yields
    ///   defaults rather than an error so bare environments work.
    /// - `setopts`: Parsed `--setopt` overlays, applied last.
    ///
    /// Output:
    /// - The main model plus all repo definitions, with duplicate repo
    ///   ids rejected across the conf file and every repos directory.
    pub fn load(conf_path: &Path, setopts: &[SetOpt]) -> Result<Self> {
        let mut main = MainConfig::default();
        let mut repos: Vec<RepoConfig> = Vec::new();

        match std::fs::metadata(conf_path) {
            Ok(_) => {
                for section in read_ini(conf_path)? {
                    if section.name == "main" {
                        apply_main_section(&mut main, conf_path, &section)?;
                    } else {
                        repos.push(RepoConfig::from_section(conf_path, &section)?);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %conf_path.display(), "no configuration file, using defaults");
            }
            Err(e) => return Err(Error::io(conf_path, e)),
        }

        // Main-scope setopts may redirect reposdir, so apply them before
        // scanning for .repo files.
        for opt in setopts {
            if opt.repo.is_none() {
                main.apply_key(Path::new("<setopt>"), &opt.key, &opt.value)?;
            }
        }

        for dir in &main.reposdir {
            let rooted = main.rooted(dir);
            for repo in repo::load_repo_dir(&rooted)? {
                if repos.iter().any(|r| r.id == repo.id) {
                    return Err(Error::DuplicateRepoId { id: repo.id });
                }
                repos.push(repo);
            }
        }

        setopt::apply_repo_setopts(setopts, &mut repos)?;

        Ok(Self { main, repos })
    }

    /// Enabled repos in configuration order.
    #[must_use]
    pub fn enabled_repos(&self) -> impl Iterator<Item = &RepoConfig> {
        self.repos.iter().filter(|r| r.enabled)
    }
}

fn apply_main_section(main: &mut MainConfig, path: &Path, section: &IniSection) -> Result<()> {
    for (key, value, _line) in &section.entries {
        main.apply_key(path, key, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_main_and_inline_repos() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("ferrite.conf");
        std::fs::write(
            &conf,
            "[main]\ngpgcheck=1\ninstallonly_limit=2\nexcludes=foo* bar\n\n[local]\nname=Local\nbaseurl=file:///srv/repo\nenabled=1\n",
        )
        .unwrap();

        let cfg = Config::load(&conf, &[]).unwrap();
        assert!(cfg.main.gpgcheck);
        assert_eq!(cfg.main.installonly_limit, 2);
        assert_eq!(cfg.main.excludes, vec!["foo*", "bar"]);
        assert_eq!(cfg.repos.len(), 1);
        assert_eq!(cfg.repos[0].id, "local");
    }

    #[test]
    fn missing_conf_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("nope.conf"), &[]).unwrap();
        assert_eq!(cfg.main.installonly_limit, 3);
        assert!(cfg.repos.is_empty());
    }

    #[test]
    fn setopt_overrides_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("ferrite.conf");
        std::fs::write(&conf, "[main]\ngpgcheck=1\n[local]\nname=L\nenabled=1\n").unwrap();

        let opts = vec![
            SetOpt::parse("gpgcheck=0").unwrap(),
            SetOpt::parse("local.enabled=0").unwrap(),
        ];
        let cfg = Config::load(&conf, &opts).unwrap();
        assert!(!cfg.main.gpgcheck);
        assert!(!cfg.repos[0].enabled);
    }

    #[test]
    fn rooted_rebases_absolute_paths() {
        let mut main = MainConfig::default();
        main.installroot = PathBuf::from("/mnt/sysimage");
        assert_eq!(
            main.rooted(Path::new("/var/cache/ferrite")),
            PathBuf::from("/mnt/sysimage/var/cache/ferrite")
        );
    }
}
