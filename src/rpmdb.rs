//! RPM database backend.
//!
//! The backend is the opaque boundary to the actual RPM machinery:
//! enumerate what is installed, test a transaction, apply ordered
//! install and erase steps under an install root. The production
//! implementation drives the system `rpm` binary with a stable query
//! format (`LC_ALL=C`, unit-separator delimited fields); local `.rpm`
//! files are read with the `rpm` crate, which also verifies embedded
//! package signatures. A [`FakeRpmBackend`] stands in for tests and dry
//! experiments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::nevra::{CmpOp, Dependency, Evr, Nevra};
use crate::pool::Package;

/// How an install step drives the RPM transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallMode {
    /// Plain install; used for installonly packages (`rpm -i`).
    Install,
    /// Upgrade replacing the older version (`rpm -U`).
    Upgrade,
    /// Downgrade (`rpm -U --oldpackage`).
    Downgrade,
    /// Reinstall of the same version (`rpm -U --replacepkgs`).
    Reinstall,
}

/// One ordered backend step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendStep {
    /// Install the RPM file at this path.
    Install {
        /// Path of the verified RPM artifact.
        path: PathBuf,
        /// Transaction mode.
        mode: InstallMode,
        /// Identity, for progress reporting.
        nevra: Nevra,
    },
    /// Erase this installed package.
    Erase {
        /// Identity of the installed package.
        nevra: Nevra,
    },
}

/// Progress callback invoked per completed step.
pub type ProgressFn<'a> = dyn FnMut(&BackendStep) + 'a;

/// The opaque RPM backend boundary.
pub trait RpmBackend {
    /// What: Enumerate the installed package set.
    fn installed(&self) -> Result<Vec<Package>>;

    /// What: Apply ordered steps as one transaction.
    ///
    /// Inputs:
    /// - `steps`: Erases first, installs in dependency order.
    /// - `test_only`: Validate without mutating.
    /// - `progress`: Invoked after each completed step.
    fn apply(
        &mut self,
        steps: &[BackendStep],
        test_only: bool,
        progress: &mut ProgressFn<'_>,
    ) -> Result<()>;

    /// What: The currently running kernel, if determinable.
    fn running_kernel(&self) -> Option<Nevra>;
}

/// Production backend driving the system `rpm` binary.
pub struct RpmExecBackend {
    root: PathBuf,
}

/// Field separator in query formats.
const FIELD_SEP: char = '\u{1f}';
/// Item separator within array fields.
const ITEM_SEP: char = '\u{1e}';

impl RpmExecBackend {
    /// What: Create a backend for an install root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn rpm_command(&self) -> Command {
        let mut cmd = Command::new("rpm");
        cmd.env("LC_ALL", "C").env("LANG", "C");
        if self.root != Path::new("/") {
            cmd.arg("--root").arg(&self.root);
        }
        cmd
    }

    fn query(&self, queryformat: &str) -> Result<String> {
        let out = self
            .rpm_command()
            .args(["-qa", "--qf", queryformat])
            .output()
            .map_err(|e| Error::io("rpm", e))?;
        if !out.status.success() {
            return Err(Error::Backend {
                detail: format!(
                    "rpm -qa failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            });
        }
        String::from_utf8(out.stdout).map_err(|e| Error::Backend {
            detail: format!("rpm -qa produced invalid UTF-8: {e}"),
        })
    }
}

impl RpmBackend for RpmExecBackend {
    fn installed(&self) -> Result<Vec<Package>> {
        let scalar_qf = format!(
            "%{{NAME}}{s}%{{EPOCHNUM}}{s}%{{VERSION}}{s}%{{RELEASE}}{s}%{{ARCH}}{s}%{{SIZE}}{s}%{{SUMMARY}}\n",
            s = FIELD_SEP
        );
        let deps_qf = format!(
            "%{{NEVRA}}{s}[%{{PROVIDENEVRS}}{i}]{s}[%{{REQUIRENEVRS}}{i}]{s}[%{{CONFLICTNEVRS}}{i}]{s}[%{{OBSOLETENEVRS}}{i}]{s}[%{{FILENAMES}}{i}]\n",
            s = FIELD_SEP,
            i = ITEM_SEP
        );

        let mut packages = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for line in self.query(&scalar_qf)?.lines() {
            let fields: Vec<&str> = line.split(FIELD_SEP).collect();
            if fields.len() < 7 {
                continue;
            }
            let epoch = fields[1].parse::<u32>().unwrap_or(0);
            let nevra = Nevra::new(
                fields[0],
                Evr::new(epoch, fields[2], fields[3]),
                fields[4],
            );
            let mut pkg = Package::new(nevra, crate::pool::SYSTEM_REPO_ID);
            pkg.install_size = fields[5].parse().unwrap_or(0);
            pkg.summary = fields[6].to_string();
            index.insert(pkg.nevra.to_string(), packages.len());
            packages.push(pkg);
        }

        for line in self.query(&deps_qf)?.lines() {
            let fields: Vec<&str> = line.split(FIELD_SEP).collect();
            if fields.len() < 6 {
                continue;
            }
            let Some(&slot) = index.get(fields[0]) else {
                continue;
            };
            let pkg = &mut packages[slot];
            pkg.provides = parse_dep_list(fields[1]);
            pkg.requires = parse_dep_list(fields[2]);
            pkg.conflicts = parse_dep_list(fields[3]);
            pkg.obsoletes = parse_dep_list(fields[4]);
            pkg.files = fields[5]
                .split(ITEM_SEP)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
        }

        debug!(count = packages.len(), "installed set enumerated");
        Ok(packages)
    }

    fn apply(
        &mut self,
        steps: &[BackendStep],
        test_only: bool,
        progress: &mut ProgressFn<'_>,
    ) -> Result<()> {
        let erase_names: Vec<String> = steps
            .iter()
            .filter_map(|s| match s {
                BackendStep::Erase { nevra } => Some(nevra.to_string()),
                BackendStep::Install { .. } => None,
            })
            .collect();

        if !erase_names.is_empty() {
            let mut cmd = self.rpm_command();
            cmd.arg("-e").arg("--allmatches");
            if test_only {
                cmd.arg("--test");
            }
            cmd.args(&erase_names);
            run_backend_command(cmd, "erase")?;
            for step in steps {
                if matches!(step, BackendStep::Erase { .. }) {
                    progress(step);
                }
            }
        }

        // One invocation per mode keeps the flag sets apart while still
        // letting rpm order scriptlets within each set.
        for mode in [
            InstallMode::Install,
            InstallMode::Upgrade,
            InstallMode::Downgrade,
            InstallMode::Reinstall,
        ] {
            let paths: Vec<&PathBuf> = steps
                .iter()
                .filter_map(|s| match s {
                    BackendStep::Install {
                        path, mode: m, ..
                    } if *m == mode => Some(path),
                    _ => None,
                })
                .collect();
            if paths.is_empty() {
                continue;
            }
            let mut cmd = self.rpm_command();
            match mode {
                InstallMode::Install => {
                    cmd.arg("-i");
                }
                InstallMode::Upgrade => {
                    cmd.arg("-U");
                }
                InstallMode::Downgrade => {
                    cmd.args(["-U", "--oldpackage"]);
                }
                InstallMode::Reinstall => {
                    cmd.args(["-U", "--replacepkgs"]);
                }
            }
            if test_only {
                cmd.arg("--test");
            }
            cmd.args(paths);
            run_backend_command(cmd, "install")?;
            for step in steps {
                if matches!(step, BackendStep::Install { mode: m, .. } if *m == mode) {
                    progress(step);
                }
            }
        }

        info!(steps = steps.len(), test_only, "rpm transaction applied");
        Ok(())
    }

    fn running_kernel(&self) -> Option<Nevra> {
        let release = Command::new("uname").arg("-r").output().ok()?;
        let release = String::from_utf8(release.stdout).ok()?;
        let release = release.trim();
        let arch = Command::new("uname").arg("-m").output().ok()?;
        let arch = String::from_utf8(arch.stdout).ok()?;
        // uname -r is "<version>-<release>" with the arch often trailing.
        let trimmed = release
            .strip_suffix(&format!(".{}", arch.trim()))
            .unwrap_or(release);
        let evr = Evr::parse(trimmed)?;
        Some(Nevra::new("kernel", evr, arch.trim()))
    }
}

fn run_backend_command(mut cmd: Command, phase: &str) -> Result<()> {
    debug!(?cmd, phase, "invoking rpm");
    let out = cmd.output().map_err(|e| Error::io("rpm", e))?;
    if out.status.success() {
        Ok(())
    } else {
        Err(Error::Backend {
            detail: format!(
                "rpm {phase} failed ({}): {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
        })
    }
}

fn parse_dep_list(raw: &str) -> Vec<Dependency> {
    raw.split(ITEM_SEP)
        .filter(|s| !s.is_empty())
        .filter_map(Dependency::parse)
        .collect()
}

/// What: Read a local `.rpm` file into a pool package.
///
/// Inputs:
/// - `path`: The RPM file.
///
/// Output:
/// - A [`Package`] carrying NEVRA, dependency sets, files and sizes;
///   its location points back at the local path.
pub fn package_from_rpm_file(path: &Path) -> Result<Package> {
    let rpm_pkg = rpm::Package::open(path).map_err(|e| Error::Backend {
        detail: format!("cannot read {}: {e}", path.display()),
    })?;
    let md = &rpm_pkg.metadata;

    let name = md.get_name().map_err(|e| bad_header(path, &e))?;
    let version = md.get_version().map_err(|e| bad_header(path, &e))?;
    let release = md.get_release().map_err(|e| bad_header(path, &e))?;
    let arch = md.get_arch().map_err(|e| bad_header(path, &e))?;
    let epoch = md.get_epoch().unwrap_or(0);

    let nevra = Nevra::new(name, Evr::new(epoch, version, release), arch);
    let mut pkg = Package::new(nevra, crate::pool::CMDLINE_REPO_ID);
    pkg.summary = md.get_summary().unwrap_or_default().to_string();
    pkg.description = md.get_description().unwrap_or_default().to_string();
    pkg.install_size = md.get_installed_size().unwrap_or(0);
    pkg.location = path.display().to_string();

    pkg.provides = convert_rpm_deps(md.get_provides().unwrap_or_default());
    pkg.requires = convert_rpm_deps(md.get_requires().unwrap_or_default());
    pkg.conflicts = convert_rpm_deps(md.get_conflicts().unwrap_or_default());
    pkg.obsoletes = convert_rpm_deps(md.get_obsoletes().unwrap_or_default());
    pkg.files = md
        .get_file_paths()
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.display().to_string())
        .collect();

    let self_provide = pkg.self_provide();
    if !pkg.provides.iter().any(|p| p.name == pkg.nevra.name) {
        pkg.provides.push(self_provide);
    }
    Ok(pkg)
}

fn bad_header(path: &Path, e: &dyn std::fmt::Display) -> Error {
    Error::Backend {
        detail: format!("bad RPM header in {}: {e}", path.display()),
    }
}

fn convert_rpm_deps(deps: Vec<rpm::Dependency>) -> Vec<Dependency> {
    deps.into_iter()
        .filter(|d| !d.name.starts_with('('))
        .map(|d| {
            let op = rpm_flags_to_op(&d.flags);
            match (op, d.version.is_empty()) {
                (Some(op), false) => match Evr::parse(&d.version) {
                    Some(evr) => Dependency::versioned(d.name, op, evr),
                    None => Dependency::unversioned(d.name),
                },
                _ => Dependency::unversioned(d.name),
            }
        })
        .collect()
}

fn rpm_flags_to_op(flags: &rpm::DependencyFlags) -> Option<CmpOp> {
    let less = flags.contains(rpm::DependencyFlags::LESS);
    let greater = flags.contains(rpm::DependencyFlags::GREATER);
    let equal = flags.contains(rpm::DependencyFlags::EQUAL);
    match (less, greater, equal) {
        (true, false, false) => Some(CmpOp::Lt),
        (true, false, true) => Some(CmpOp::Le),
        (false, false, true) => Some(CmpOp::Eq),
        (false, true, true) => Some(CmpOp::Ge),
        (false, true, false) => Some(CmpOp::Gt),
        _ => None,
    }
}

/// What: Verify a package file's embedded signature.
///
/// Inputs:
/// - `path`: The RPM file.
/// - `key_armors`: Armored public keys imported for the repo.
///
/// Output:
/// - `Ok(())` when any key verifies the signature; [`Error::NoKey`]
///   when no keys are available; [`Error::BadSignature`] otherwise.
pub fn verify_package_signature(path: &Path, key_armors: &[String]) -> Result<()> {
    if key_armors.is_empty() {
        return Err(Error::NoKey {
            subject: path.display().to_string(),
        });
    }
    let pkg = rpm::Package::open(path).map_err(|e| Error::Backend {
        detail: format!("cannot read {}: {e}", path.display()),
    })?;
    let mut last = String::new();
    for armor in key_armors {
        match rpm::signature::pgp::Verifier::load_from_asc_bytes(armor.as_bytes()) {
            Ok(verifier) => match pkg.verify_signature(&verifier) {
                Ok(()) => return Ok(()),
                Err(e) => last = e.to_string(),
            },
            Err(e) => last = e.to_string(),
        }
    }
    Err(Error::BadSignature {
        path: path.to_path_buf(),
        detail: last,
    })
}

/// In-memory backend for tests and plan rehearsal.
#[derive(Default)]
pub struct FakeRpmBackend {
    /// The simulated installed set.
    pub installed: Vec<Package>,
    /// Every step applied, in order.
    pub applied: Vec<BackendStep>,
    /// Fail the transaction when a step names this package.
    pub fail_on: Option<String>,
    /// Simulated running kernel.
    pub kernel: Option<Nevra>,
}

impl FakeRpmBackend {
    /// What: Create an empty fake backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RpmBackend for FakeRpmBackend {
    fn installed(&self) -> Result<Vec<Package>> {
        Ok(self.installed.clone())
    }

    fn apply(
        &mut self,
        steps: &[BackendStep],
        test_only: bool,
        progress: &mut ProgressFn<'_>,
    ) -> Result<()> {
        for step in steps {
            let name = match step {
                BackendStep::Install { nevra, .. } | BackendStep::Erase { nevra } => {
                    nevra.name.clone()
                }
            };
            if self.fail_on.as_deref() == Some(name.as_str()) {
                return Err(Error::Backend {
                    detail: format!("simulated failure on {name}"),
                });
            }
            if !test_only {
                match step {
                    BackendStep::Install { nevra, .. } => {
                        self.installed
                            .push(Package::new(nevra.clone(), crate::pool::SYSTEM_REPO_ID));
                    }
                    BackendStep::Erase { nevra } => {
                        self.installed.retain(|p| &p.nevra != nevra);
                    }
                }
                self.applied.push(step.clone());
            }
            progress(step);
        }
        Ok(())
    }

    fn running_kernel(&self) -> Option<Nevra> {
        self.kernel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dep_list_parsing() {
        let raw = format!("libfoo = 1.0-1{ITEM_SEP}libbar >= 2{ITEM_SEP}");
        let deps = parse_dep_list(&raw);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].to_string(), "libfoo = 1.0-1");
        assert_eq!(deps[1].to_string(), "libbar >= 2");
    }

    #[test]
    fn fake_backend_applies_and_fails_on_request() {
        let mut backend = FakeRpmBackend::new();
        let step = BackendStep::Erase {
            nevra: Nevra::parse("gone-1-1.x86_64").unwrap(),
        };
        backend.installed.push(Package::new(
            Nevra::parse("gone-1-1.x86_64").unwrap(),
            crate::pool::SYSTEM_REPO_ID,
        ));

        let mut seen = 0;
        backend
            .apply(std::slice::from_ref(&step), false, &mut |_| seen += 1)
            .unwrap();
        assert_eq!(seen, 1);
        assert!(backend.installed.is_empty());

        backend.fail_on = Some("boom".to_string());
        let boom = BackendStep::Erase {
            nevra: Nevra::parse("boom-1-1.x86_64").unwrap(),
        };
        assert!(backend.apply(&[boom], false, &mut |_| {}).is_err());
    }

    #[test]
    fn test_mode_leaves_state_untouched() {
        let mut backend = FakeRpmBackend::new();
        let step = BackendStep::Install {
            path: PathBuf::from("/tmp/a.rpm"),
            mode: InstallMode::Upgrade,
            nevra: Nevra::parse("a-1-1.x86_64").unwrap(),
        };
        backend.apply(&[step], true, &mut |_| {}).unwrap();
        assert!(backend.installed.is_empty());
        assert!(backend.applied.is_empty());
    }
}
