//! Repository metadata lifecycle.
//!
//! For each enabled repository this module resolves a working base URL,
//! fetches and verifies `repomd.xml` and the artifacts it names, applies
//! the optional snapshot time filter, parses the XML into [`Package`]s
//! and maintains the binary solv cache that short-circuits parsing on
//! later runs. Freshness follows `metadata_expire` unless `--refresh`
//! forces the network or `--cacheonly` forbids it.

pub mod md;
pub mod primary;
pub mod snapshot;
pub mod solvcache;
pub mod updateinfo;

use std::io::Read;

use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::cache::{BlobStore, RepoCache, Section};
use crate::config::MainConfig;
use crate::config::repo::RepoConfig;
use crate::crypto::keyring::Keyring;
use crate::error::{Error, Result};
use crate::fetch::{Downloader, IpPolicy, join_url};
use crate::plugin::{PluginEvent, PluginHandler};
use crate::pool::Package;

use md::Repomd;
use updateinfo::Advisory;

/// Session options that influence metadata loading.
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Ignore freshness and always hit the network.
    pub refresh: bool,
    /// Never hit the network; fail when the cache is absent.
    pub cacheonly: bool,
    /// Drop packages published after this cutoff.
    pub snapshot_cutoff: Option<i64>,
    /// Skip repomd signature verification.
    pub skip_signatures: bool,
    /// Address-family preference.
    pub ip: IpPolicy,
}

/// A repository ready to enter the pool.
#[derive(Debug)]
pub struct LoadedRepo {
    /// The resolved repo configuration.
    pub config: RepoConfig,
    /// The base URL retained for the session.
    pub base_url: String,
    /// Cache directory handle.
    pub cache: RepoCache,
    /// Parsed packages.
    pub packages: Vec<Package>,
    /// Parsed advisories, empty when updateinfo was skipped.
    pub advisories: Vec<Advisory>,
    /// Whether packages came from the solv cache instead of XML.
    pub from_solv_cache: bool,
}

/// Loads repository metadata according to the session options.
pub struct RepoLoader<'a> {
    main: &'a MainConfig,
    store: &'a BlobStore,
    opts: &'a FetchOptions,
}

impl<'a> RepoLoader<'a> {
    /// What: Create a loader over a blob store.
    #[must_use]
    pub fn new(main: &'a MainConfig, store: &'a BlobStore, opts: &'a FetchOptions) -> Self {
        Self { main, store, opts }
    }

    /// What: Load one repository end to end.
    ///
    /// Inputs:
    /// - `repo`: Resolved repo configuration (URLs substituted).
    /// - `keyring`: Session keyring; repo keys are imported into it
    ///   when `repo_gpgcheck` requires them.
    /// - `plugins`: Event sink.
    ///
    /// Output:
    /// - The loaded repo; errors here are recoverable per
    ///   `skip_if_unavailable` at the caller.
    pub async fn load(
        &self,
        repo: &RepoConfig,
        keyring: &mut Keyring,
        plugins: &mut dyn PluginHandler,
    ) -> Result<LoadedRepo> {
        if repo.base_urls.is_empty() && repo.metalink.is_none() && repo.mirrorlist.is_none() {
            return Err(Error::NoBaseUrl {
                repo: repo.id.clone(),
            });
        }

        let downloader = Downloader::new(repo, self.main, self.opts.ip)?;
        crate::fetch::warn_unsupported_tuning(repo);
        let auth = match (&repo.username, &repo.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        };

        // A cached repo keyed by any configured URL may satisfy the
        // freshness policy without touching the network.
        if !self.opts.refresh {
            if let Some((cache, base_url)) = self.find_cached(repo) {
                let fresh = cache
                    .repomd_age()
                    .is_some_and(|age| age < repo.metadata_expire);
                if fresh || self.opts.cacheonly {
                    debug!(repo = %repo.id, "using cached metadata");
                    return self.load_from_cache(repo, cache, base_url);
                }
            } else if self.opts.cacheonly {
                return Err(Error::CacheDisabled {
                    repo: repo.id.clone(),
                });
            }
        } else if self.opts.cacheonly {
            return Err(Error::User(
                "--refresh and --cacheonly are mutually exclusive".to_string(),
            ));
        }

        // Resolve a working base URL by fetching repomd from each.
        let mut resolved: Option<(String, Vec<u8>)> = None;
        for base in &repo.base_urls {
            let url = join_url(base, "repodata/repomd.xml");
            match downloader.fetch_bytes(&url, auth).await {
                Ok(bytes) => {
                    resolved = Some((base.clone(), bytes));
                    break;
                }
                Err(e) => {
                    warn!(repo = %repo.id, url, error = %e, "base URL failed");
                }
            }
        }
        let Some((base_url, repomd_bytes)) = resolved else {
            // Fall back to a stale cache before giving up entirely.
            if let Some((cache, base_url)) = self.find_cached(repo) {
                warn!(repo = %repo.id, "network unavailable, using stale cache");
                return self.load_from_cache(repo, cache, base_url);
            }
            return Err(Error::NoBaseUrl {
                repo: repo.id.clone(),
            });
        };

        let cache = self.store.repo_cache(&repo.id, &base_url);

        if repo.repo_gpgcheck && !self.opts.skip_signatures {
            self.verify_repomd_signature(
                repo,
                &downloader,
                auth,
                &cache,
                &base_url,
                &repomd_bytes,
                keyring,
            )
            .await?;
        }

        cache.put_bytes(Section::Repodata, "repomd.xml", &repomd_bytes)?;

        let repomd = Repomd::parse(
            &cache.path(Section::Repodata, "repomd.xml"),
            &String::from_utf8_lossy(&repomd_bytes),
        )?;

        let cookie = self.pool_cookie(&repomd_bytes);
        let solv_path = cache.path(
            Section::Solv,
            &solvcache::cache_file_name(&repo.id, &cookie),
        );
        if let Some(packages) = solvcache::load_cache(&solv_path, &cookie)? {
            info!(repo = %repo.id, count = packages.len(), "loaded from solv cache");
            let advisories = self.cached_advisories(repo, &cache)?;
            plugins.handle(PluginEvent::RepoMdDownloadEnd {
                repo_id: &repo.id,
                dir: cache.dir(),
                url: &base_url,
            })?;
            return Ok(LoadedRepo {
                config: repo.clone(),
                base_url,
                cache,
                packages,
                advisories,
                from_solv_cache: true,
            });
        }

        // Fetch the referenced artifacts.
        let primary_rec = repomd.get("primary").ok_or_else(|| Error::CacheCorrupt {
            repo: repo.id.clone(),
            detail: "repomd names no primary metadata".to_string(),
        })?;
        self.fetch_artifact(&downloader, auth, &cache, &base_url, primary_rec, true)
            .await?
            .ok_or_else(|| Error::Network {
                url: join_url(&base_url, &primary_rec.location),
                status: Some(404),
                detail: "primary metadata missing".to_string(),
            })?;

        for (mdtype, skip) in [
            ("filelists", repo.skip_md_filelists),
            ("updateinfo", repo.skip_md_updateinfo),
            ("other", repo.skip_md_other),
        ] {
            if skip {
                debug!(repo = %repo.id, mdtype, "artifact skipped by configuration");
                continue;
            }
            if let Some(record) = repomd.get(mdtype) {
                self.fetch_artifact(&downloader, auth, &cache, &base_url, record, false)
                    .await?;
            }
        }

        let (packages, advisories) = self.parse_cached_metadata(repo, &cache, &repomd)?;
        solvcache::write_cache(&solv_path, &packages, &cookie)?;

        plugins.handle(PluginEvent::RepoMdDownloadEnd {
            repo_id: &repo.id,
            dir: cache.dir(),
            url: &base_url,
        })?;

        info!(repo = %repo.id, count = packages.len(), "repository metadata loaded");
        Ok(LoadedRepo {
            config: repo.clone(),
            base_url,
            cache,
            packages,
            advisories,
            from_solv_cache: false,
        })
    }

    /// Solv cache cookie over the repomd bytes plus the session's
    /// snapshot cutoff, so a filtered cache never satisfies an
    /// unfiltered run (or one with a different cutoff).
    fn pool_cookie(&self, repomd_bytes: &[u8]) -> [u8; solvcache::SOLV_COOKIE_LEN] {
        match self.opts.snapshot_cutoff {
            None => solvcache::compute_cookie(repomd_bytes),
            Some(cutoff) => {
                let mut input = repomd_bytes.to_vec();
                input.extend_from_slice(format!("snapshot:{cutoff}").as_bytes());
                solvcache::compute_cookie(&input)
            }
        }
    }

    /// Find an existing cache directory for any configured base URL.
    fn find_cached(&self, repo: &RepoConfig) -> Option<(RepoCache, String)> {
        for base in &repo.base_urls {
            let cache = self.store.repo_cache(&repo.id, base);
            if cache.get(Section::Repodata, "repomd.xml").is_some() {
                return Some((cache, base.clone()));
            }
        }
        None
    }

    /// Load a repo entirely from its cache directory.
    fn load_from_cache(
        &self,
        repo: &RepoConfig,
        cache: RepoCache,
        base_url: String,
    ) -> Result<LoadedRepo> {
        let repomd_path = cache
            .get(Section::Repodata, "repomd.xml")
            .ok_or_else(|| Error::CacheDisabled {
                repo: repo.id.clone(),
            })?;
        let repomd_bytes = std::fs::read(&repomd_path).map_err(|e| Error::io(&repomd_path, e))?;
        let repomd = Repomd::parse(&repomd_path, &String::from_utf8_lossy(&repomd_bytes))?;

        let cookie = self.pool_cookie(&repomd_bytes);
        let solv_path = cache.path(
            Section::Solv,
            &solvcache::cache_file_name(&repo.id, &cookie),
        );
        let (packages, from_solv_cache) = match solvcache::load_cache(&solv_path, &cookie)? {
            Some(packages) => (packages, true),
            None => {
                if cache.get(Section::Repodata, "primary.xml").is_none() {
                    return Err(Error::CacheDisabled {
                        repo: repo.id.clone(),
                    });
                }
                let (packages, _) = self.parse_cached_metadata(repo, &cache, &repomd)?;
                solvcache::write_cache(&solv_path, &packages, &cookie)?;
                (packages, false)
            }
        };
        let advisories = self.cached_advisories(repo, &cache)?;

        Ok(LoadedRepo {
            config: repo.clone(),
            base_url,
            cache,
            packages,
            advisories,
            from_solv_cache,
        })
    }

    /// Download one artifact, verify it, and store its decompressed form.
    ///
    /// Returns the decompressed cache path, or `None` when an optional
    /// artifact answered 404.
    async fn fetch_artifact(
        &self,
        downloader: &Downloader,
        auth: Option<(&str, &str)>,
        cache: &RepoCache,
        base_url: &str,
        record: &md::RepomdRecord,
        required: bool,
    ) -> Result<Option<std::path::PathBuf>> {
        let url = join_url(base_url, &record.location);
        let file_name = format!("{}.xml", record.mdtype);

        // The already-verified decompressed artifact satisfies the fetch.
        if let (Some(existing), Some((kind, expected))) = (
            cache.get(Section::Repodata, &file_name),
            record.open_checksum.as_ref().or(record.checksum.as_ref()),
        ) {
            if crate::crypto::verify_digest(&existing, *kind, expected).is_ok() {
                debug!(url, "artifact already cached");
                return Ok(Some(existing));
            }
        }

        if self.opts.cacheonly {
            return Err(Error::CacheDisabled {
                repo: cache.repo_id().to_string(),
            });
        }

        let bytes = match downloader.fetch_bytes(&url, auth).await {
            Ok(bytes) => bytes,
            Err(Error::Network {
                status: Some(404), ..
            }) if !required => {
                debug!(url, "optional artifact missing upstream");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        // Verify the download against the repomd-declared digest before
        // anything is stored under its final name.
        if let Some((kind, expected)) = &record.checksum {
            let tmp_dir = cache.tmp_dir()?;
            let staged = tmp_dir.join(format!("{}.download", record.mdtype));
            std::fs::write(&staged, &bytes).map_err(|e| Error::io(&staged, e))?;
            let result = crate::crypto::verify_digest(&staged, *kind, expected);
            let _ = std::fs::remove_file(&staged);
            result?;
        }

        let decompressed = decompress_artifact(&record.location, &bytes)?;
        let path = cache.put_bytes(Section::Repodata, &file_name, &decompressed)?;
        Ok(Some(path))
    }

    /// Parse the cached XML artifacts of a repo into packages.
    fn parse_cached_metadata(
        &self,
        repo: &RepoConfig,
        cache: &RepoCache,
        repomd: &Repomd,
    ) -> Result<(Vec<Package>, Vec<Advisory>)> {
        let primary_path = cache
            .get(Section::Repodata, "primary.xml")
            .ok_or_else(|| Error::CacheCorrupt {
                repo: repo.id.clone(),
                detail: "primary metadata absent from cache".to_string(),
            })?;
        let mut primary_xml =
            std::fs::read_to_string(&primary_path).map_err(|e| Error::io(&primary_path, e))?;

        if let Some(cutoff) = self.opts.snapshot_cutoff {
            let mut filtered = Vec::with_capacity(primary_xml.len());
            let stats = snapshot::filter_primary(&primary_xml, cutoff, &mut filtered)?;
            info!(
                repo = %repo.id,
                kept = stats.kept,
                dropped = stats.dropped,
                "snapshot filter applied"
            );
            primary_xml = String::from_utf8(filtered).map_err(|e| Error::CacheCorrupt {
                repo: repo.id.clone(),
                detail: format!("snapshot filter produced invalid UTF-8: {e}"),
            })?;
        }

        let mut packages = primary::parse_primary(&repo.id, &primary_xml)?;

        if !repo.skip_md_filelists && repomd.get("filelists").is_some() {
            if let Some(path) = cache.get(Section::Repodata, "filelists.xml") {
                let xml = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
                primary::merge_filelists(&repo.id, &mut packages, &xml)?;
            }
        }
        if !repo.skip_md_other && repomd.get("other").is_some() {
            if let Some(path) = cache.get(Section::Repodata, "other.xml") {
                let xml = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
                primary::merge_other(&repo.id, &mut packages, &xml)?;
            }
        }

        let advisories = self.cached_advisories(repo, cache)?;
        Ok((packages, advisories))
    }

    fn cached_advisories(&self, repo: &RepoConfig, cache: &RepoCache) -> Result<Vec<Advisory>> {
        if repo.skip_md_updateinfo {
            return Ok(Vec::new());
        }
        match cache.get(Section::Repodata, "updateinfo.xml") {
            Some(path) => {
                let xml = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
                updateinfo::parse_updateinfo(&repo.id, &xml)
            }
            None => Ok(Vec::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn verify_repomd_signature(
        &self,
        repo: &RepoConfig,
        downloader: &Downloader,
        auth: Option<(&str, &str)>,
        cache: &RepoCache,
        base_url: &str,
        repomd_bytes: &[u8],
        keyring: &mut Keyring,
    ) -> Result<()> {
        for key_url in &repo.gpg_keys {
            let armor = downloader.fetch_bytes(key_url, auth).await?;
            let armor = String::from_utf8_lossy(&armor);
            let fingerprint = keyring.import_armored(&armor)?;
            cache.put_bytes(Section::Keys, &format!("{fingerprint}.pub"), armor.as_bytes())?;
        }

        let sig_url = join_url(base_url, "repodata/repomd.xml.asc");
        let sig_bytes = downloader.fetch_bytes(&sig_url, auth).await?;

        let tmp_dir = cache.tmp_dir()?;
        let data_path = tmp_dir.join("repomd.verify");
        let sig_path = tmp_dir.join("repomd.verify.asc");
        std::fs::write(&data_path, repomd_bytes).map_err(|e| Error::io(&data_path, e))?;
        std::fs::write(&sig_path, &sig_bytes).map_err(|e| Error::io(&sig_path, e))?;
        let result = keyring.verify_detached(&data_path, &sig_path);
        let _ = std::fs::remove_file(&data_path);
        let _ = std::fs::remove_file(&sig_path);
        result?;

        cache.put_bytes(Section::Repodata, "repomd.xml.asc", &sig_bytes)?;
        debug!(repo = %repo.id, "repomd signature verified");
        Ok(())
    }
}

/// Decompress a downloaded artifact when its location says it is
/// compressed; pass plain XML through.
fn decompress_artifact(location: &str, bytes: &[u8]) -> Result<Vec<u8>> {
    if location.ends_with(".gz") {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| Error::CacheCorrupt {
            repo: location.to_string(),
            detail: format!("cannot decompress artifact: {e}"),
        })?;
        Ok(out)
    } else {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompress_passthrough_for_plain_xml() {
        let out = decompress_artifact("repodata/primary.xml", b"<metadata/>").unwrap();
        assert_eq!(out, b"<metadata/>");
    }

    #[test]
    fn decompress_gz_round_trip() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"<metadata/>").unwrap();
        let gz = encoder.finish().unwrap();

        let out = decompress_artifact("repodata/primary.xml.gz", &gz).unwrap();
        assert_eq!(out, b"<metadata/>");
    }

    #[test]
    fn no_urls_at_all_is_no_base_url() {
        let main = MainConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let opts = FetchOptions::default();
        let loader = RepoLoader::new(&main, &store, &opts);

        let repo = RepoConfig::new("empty");
        let mut keyring = Keyring::new();
        let mut plugins = crate::plugin::NoopPlugins;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt
            .block_on(loader.load(&repo, &mut keyring, &mut plugins))
            .unwrap_err();
        match err {
            Error::NoBaseUrl { repo } => assert_eq!(repo, "empty"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
