//! Transaction execution.
//!
//! Takes a classified plan through the full pipeline: instance lock,
//! download of missing artifacts with digest verification, package
//! signature checks with interactive key import, the ordered RPM
//! backend transaction, and the history commit. Failure at any stage
//! aborts the pending history record; the backend's own rollback covers
//! disk state. Cancellation is cooperative and checked between phases.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::cache::Section;
use crate::config::MainConfig;
use crate::crypto;
use crate::error::{Error, Result};
use crate::fetch::{DownloadRequest, Downloader, IpPolicy, join_url};
use crate::history::HistoryStore;
use crate::lock::{InstanceLock, LockMode};
use crate::plan::{Plan, StepClass, StepReason};
use crate::plugin::{PluginEvent, PluginHandler};
use crate::pool::{CMDLINE_REPO_ID, PackageId, Pool};
use crate::repo::LoadedRepo;
use crate::rpmdb::{BackendStep, InstallMode, RpmBackend};

/// Options steering one execution.
#[derive(Clone, Debug, Default)]
pub struct ExecuteOptions {
    /// Run the backend in test mode and stop.
    pub test_only: bool,
    /// Stop after the download phase.
    pub download_only: bool,
    /// Alternative destination for downloaded RPMs.
    pub download_dir: Option<PathBuf>,
    /// Disable all signature checking.
    pub no_gpgcheck: bool,
    /// Skip package signature verification only.
    pub skip_signature: bool,
    /// Skip artifact digest verification only.
    pub skip_digest: bool,
    /// Wait for the instance lock instead of failing fast.
    pub interactive: bool,
    /// Address-family preference for downloads.
    pub ip: IpPolicy,
}

/// Cooperative cancellation flag, checked between execution phases.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// What: Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The transaction executor for one session.
pub struct Executor<'a> {
    /// The package universe the plan indexes into.
    pub pool: &'a Pool,
    /// Loaded repos, for base URLs, caches and key material.
    pub repos: &'a [LoadedRepo],
    /// Main configuration (proxy, installonly names).
    pub main: &'a MainConfig,
    /// Execution options.
    pub opts: ExecuteOptions,
    /// Cancellation flag.
    pub cancel: CancelFlag,
}

impl Executor<'_> {
    /// What: Execute a plan end to end.
    ///
    /// Inputs:
    /// - `plan`: The classified plan.
    /// - `cmdline`: Recorded into history.
    /// - `lock`: Instance lock; acquired exclusively for the duration.
    /// - `history`: History store; committed only on backend success.
    /// - `backend`: The RPM backend.
    /// - `plugins`: Event sink (kernel installs).
    /// - `ask`: Callback deciding key imports.
    /// - `progress`: Per-step progress sink.
    ///
    /// Output:
    /// - The committed history id, or `None` for test-only and
    ///   download-only runs.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        plan: &Plan,
        cmdline: &str,
        lock: &InstanceLock,
        history: &mut HistoryStore,
        backend: &mut dyn RpmBackend,
        plugins: &mut dyn PluginHandler,
        ask: &mut dyn FnMut(&str) -> bool,
        progress: &mut dyn FnMut(&BackendStep),
    ) -> Result<Option<i64>> {
        let _guard = if self.opts.interactive {
            lock.acquire_write_waiting()?
        } else {
            lock.acquire(LockMode::Write)?
        };

        self.check_cancel()?;
        let artifact_paths = self.download_phase(plan).await?;
        if self.opts.download_only {
            info!("download-only run complete");
            return Ok(None);
        }

        self.check_cancel()?;
        self.signature_phase(&artifact_paths, ask).await?;

        // Kernel installs are announced before the transaction runs.
        for step in plan.transaction.installs() {
            let pkg = self.pool.package(step.id);
            if self.main.installonlypkgs.iter().any(|n| n == pkg.name()) {
                plugins.handle(PluginEvent::KernelInstall { pkg: &pkg.nevra })?;
            }
        }

        let steps = self.backend_steps(plan, &artifact_paths);

        if self.opts.test_only {
            backend.apply(&steps, true, progress)?;
            info!("test transaction succeeded");
            return Ok(None);
        }

        self.check_cancel()?;
        history.begin(cmdline)?;
        match backend.apply(&steps, false, progress) {
            Ok(()) => {}
            Err(e) => {
                history.abort()?;
                return Err(e);
            }
        }

        for step in &plan.transaction.steps {
            let nevra = self.pool.package(step.id).nevra.to_string();
            match step.action {
                crate::plan::StepAction::Install => {
                    let auto = plan
                        .classified
                        .iter()
                        .find(|c| c.id == step.id)
                        .is_some_and(|c| c.auto);
                    history.record_add(&nevra, auto)?;
                }
                crate::plan::StepAction::Erase => {
                    history.record_remove(&nevra)?;
                }
            }
        }
        let id = history.commit()?;
        Ok(Some(id))
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    fn repo_of(&self, repo_id: &str) -> Result<&LoadedRepo> {
        self.repos
            .iter()
            .find(|r| r.config.id == repo_id)
            .ok_or_else(|| Error::RepoNotFound {
                id: repo_id.to_string(),
            })
    }

    /// Download every missing install artifact and verify its digest.
    ///
    /// Returns the local path per install-step package.
    async fn download_phase(&self, plan: &Plan) -> Result<Vec<(PackageId, PathBuf)>> {
        let mut paths = Vec::new();
        let mut per_repo: Vec<(String, Vec<(PackageId, DownloadRequest)>)> = Vec::new();

        let install_ids: Vec<PackageId> = plan.transaction.installs().map(|s| s.id).collect();
        for id in install_ids {
            let pkg = self.pool.package(id);
            if pkg.repo_id == CMDLINE_REPO_ID {
                paths.push((id, PathBuf::from(&pkg.location)));
                continue;
            }
            let repo = self.repo_of(&pkg.repo_id)?;
            let file_name = pkg
                .location
                .rsplit('/')
                .next()
                .unwrap_or(&pkg.location)
                .to_string();
            let dest = match &self.opts.download_dir {
                Some(dir) => dir.join(&file_name),
                None => repo.cache.path(Section::Packages, &file_name),
            };

            // A cached artifact that still verifies is reused.
            if dest.exists() && self.artifact_ok(&dest, id) {
                debug!(nevra = %pkg.nevra, "package already cached");
                paths.push((id, dest));
                continue;
            }

            let url = join_url(&repo.base_url, &pkg.location);
            let bucket = match per_repo.iter().position(|(rid, _)| rid == &pkg.repo_id) {
                Some(idx) => idx,
                None => {
                    per_repo.push((pkg.repo_id.clone(), Vec::new()));
                    per_repo.len() - 1
                }
            };
            per_repo[bucket].1.push((id, DownloadRequest { url, dest }));
        }

        for (repo_id, requests) in per_repo {
            let repo = self.repo_of(&repo_id)?;
            let downloader = Downloader::new(&repo.config, self.main, self.opts.ip)?;
            let auth = match (&repo.config.username, &repo.config.password) {
                (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
                _ => None,
            };
            let tmp_dir = repo.cache.tmp_dir()?;
            downloader
                .fetch_all(
                    requests.iter().map(|(_, r)| r.clone()).collect(),
                    auth,
                    &tmp_dir,
                )
                .await?;

            for (id, request) in requests {
                self.verify_artifact(&request.dest, id)?;
                paths.push((id, request.dest));
            }
        }

        Ok(paths)
    }

    fn artifact_ok(&self, path: &std::path::Path, id: PackageId) -> bool {
        if self.opts.skip_digest {
            return true;
        }
        match &self.pool.package(id).checksum {
            Some((kind, expected)) => crypto::verify_digest(path, *kind, expected).is_ok(),
            None => true,
        }
    }

    /// Verify a downloaded artifact; a mismatch removes the file.
    fn verify_artifact(&self, path: &std::path::Path, id: PackageId) -> Result<()> {
        if self.opts.skip_digest {
            return Ok(());
        }
        let Some((kind, expected)) = &self.pool.package(id).checksum else {
            return Ok(());
        };
        match crypto::verify_digest(path, *kind, expected) {
            Ok(()) => Ok(()),
            Err(e) => {
                // The corrupt artifact must never be reused.
                let _ = std::fs::remove_file(path);
                Err(e)
            }
        }
    }

    /// Verify embedded package signatures per the repo's gpgcheck flag.
    async fn signature_phase(
        &self,
        artifacts: &[(PackageId, PathBuf)],
        ask: &mut dyn FnMut(&str) -> bool,
    ) -> Result<()> {
        if self.opts.no_gpgcheck || self.opts.skip_signature {
            return Ok(());
        }

        for (id, path) in artifacts {
            let pkg = self.pool.package(*id);
            if pkg.repo_id == CMDLINE_REPO_ID {
                continue;
            }
            let repo = self.repo_of(&pkg.repo_id)?;
            if !repo.config.gpgcheck {
                continue;
            }

            let mut armors = self.cached_key_armors(repo)?;
            match crate::rpmdb::verify_package_signature(path, &armors) {
                Ok(()) => continue,
                Err(Error::NoKey { .. }) if !repo.config.gpg_keys.is_empty() => {
                    let prompt = format!(
                        "Import GPG key(s) from {} for repository '{}'?",
                        repo.config.gpg_keys.join(", "),
                        repo.config.id
                    );
                    if !ask(&prompt) {
                        return Err(Error::NoKey {
                            subject: path.display().to_string(),
                        });
                    }
                    armors = self.import_repo_keys(repo).await?;
                    crate::rpmdb::verify_package_signature(path, &armors)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn cached_key_armors(&self, repo: &LoadedRepo) -> Result<Vec<String>> {
        let keys_dir = repo.cache.dir().join("keys");
        let mut armors = Vec::new();
        match std::fs::read_dir(&keys_dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    if let Ok(text) = std::fs::read_to_string(entry.path()) {
                        armors.push(text);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&keys_dir, e)),
        }
        Ok(armors)
    }

    async fn import_repo_keys(&self, repo: &LoadedRepo) -> Result<Vec<String>> {
        let downloader = Downloader::new(&repo.config, self.main, self.opts.ip)?;
        let mut armors = Vec::new();
        let mut ring = crate::crypto::keyring::Keyring::new();
        for url in &repo.config.gpg_keys {
            let bytes = downloader.fetch_bytes(url, None).await?;
            let armor = String::from_utf8_lossy(&bytes).into_owned();
            let fingerprint = ring.import_armored(&armor)?;
            repo.cache
                .put_bytes(Section::Keys, &format!("{fingerprint}.pub"), armor.as_bytes())?;
            info!(repo = %repo.config.id, fingerprint, "GPG key imported");
            armors.push(armor);
        }
        Ok(armors)
    }

    /// Map the classified plan onto ordered backend steps.
    fn backend_steps(&self, plan: &Plan, artifacts: &[(PackageId, PathBuf)]) -> Vec<BackendStep> {
        let path_of = |id: PackageId| {
            artifacts
                .iter()
                .find(|(aid, _)| *aid == id)
                .map(|(_, p)| p.clone())
        };
        let mut steps = Vec::new();

        for step in plan.transaction.erases() {
            // Same-name replacements are handled by the rpm upgrade call.
            if step.reason == StepReason::Replaced {
                continue;
            }
            steps.push(BackendStep::Erase {
                nevra: self.pool.package(step.id).nevra.clone(),
            });
        }

        for step in plan.transaction.installs() {
            let pkg = self.pool.package(step.id);
            let class = plan
                .classified
                .iter()
                .find(|c| c.id == step.id)
                .map(|c| c.class);
            let mode = match class {
                Some(StepClass::Upgrade) => InstallMode::Upgrade,
                Some(StepClass::Downgrade) => InstallMode::Downgrade,
                Some(StepClass::Reinstall) => InstallMode::Reinstall,
                _ => {
                    if self.main.installonlypkgs.iter().any(|n| n == pkg.name()) {
                        InstallMode::Install
                    } else {
                        InstallMode::Upgrade
                    }
                }
            };
            let Some(path) = path_of(step.id) else {
                warn!(nevra = %pkg.nevra, "install step without artifact path");
                continue;
            };
            steps.push(BackendStep::Install {
                path,
                mode,
                nevra: pkg.nevra.clone(),
            });
        }

        steps
    }
}
