//! On-disk blob store for downloaded repository content.
//!
//! Every repository gets its own cache directory named
//! `<id>-<hash>` where the hash folds in the resolved base URL, so the
//! same repo id pointing somewhere new can never be served stale or
//! poisoned content from the old location. Inside are fixed
//! subdirectories for metadata, packages, keys, the solv cache and a
//! scratch area used to make every write atomic: content is streamed
//! into `tmp/`, fsynced, then renamed into place. Readers observe either
//! the previous file or the new one, never a torn write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Named subdirectories of a repo cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    /// `repodata/`: repomd and the metadata files it references.
    Repodata,
    /// `packages/`: downloaded RPM artifacts.
    Packages,
    /// `keys/`: imported public keys, one per fingerprint.
    Keys,
    /// `solvcache/`: binary pool serializations.
    Solv,
}

impl Section {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Repodata => "repodata",
            Self::Packages => "packages",
            Self::Keys => "keys",
            Self::Solv => "solvcache",
        }
    }
}

/// Cache categories accepted by `clean`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanKind {
    /// Downloaded RPMs.
    Packages,
    /// Repo XML metadata.
    Metadata,
    /// Binary solv caches.
    DbCache,
    /// Imported keys.
    Keys,
    /// Only mark cached metadata as expired.
    ExpireCache,
    /// Everything.
    All,
}

impl CleanKind {
    /// What: Parse a `clean` argument.
    ///
    /// Inputs:
    /// - `s`: One of `packages`, `metadata`, `dbcache`, `keys`,
    ///   `expire-cache`, `all`.
    ///
    /// Output:
    /// - The kind, or `None` for unknown words.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "packages" => Some(Self::Packages),
            "metadata" => Some(Self::Metadata),
            "dbcache" => Some(Self::DbCache),
            "keys" => Some(Self::Keys),
            "expire-cache" => Some(Self::ExpireCache),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

/// Root handle over the whole cache tree.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// What: Open a blob store rooted at the configured cache dir.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// What: Resolve the per-repo cache handle.
    ///
    /// Inputs:
    /// - `repo_id`: The repository id.
    /// - `base_url`: The URL the hash folds in; changing it yields a
    ///   different directory.
    ///
    /// Output:
    /// - A [`RepoCache`] whose directory may not exist yet.
    #[must_use]
    pub fn repo_cache(&self, repo_id: &str, base_url: &str) -> RepoCache {
        let digest = Sha256::digest(base_url.as_bytes());
        let dir = self
            .root
            .join(format!("{repo_id}-{}", hex::encode(&digest[..4])));
        RepoCache {
            repo_id: repo_id.to_string(),
            dir,
        }
    }

    /// What: Remove cache categories across every repo directory.
    ///
    /// Inputs:
    /// - `kinds`: The categories to drop.
    ///
    /// Output:
    /// - Number of filesystem entries removed.
    ///
    /// Details:
    /// - `all` removes entire repo cache directories. `expire-cache`
    ///   deletes nothing and instead backdates every cached repomd.
    pub fn clean(&self, kinds: &[CleanKind]) -> Result<usize> {
        let mut removed = 0;
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::io(&self.root, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.root, e))?;
            let repo_dir = entry.path();
            if !repo_dir.is_dir() {
                continue;
            }
            for kind in kinds {
                removed += clean_repo_dir(&repo_dir, *kind)?;
            }
        }
        info!(removed, "cache cleaned");
        Ok(removed)
    }
}

fn clean_repo_dir(repo_dir: &Path, kind: CleanKind) -> Result<usize> {
    let targets: &[&str] = match kind {
        CleanKind::Packages => &["packages"],
        CleanKind::Metadata => &["repodata"],
        CleanKind::DbCache => &["solvcache"],
        CleanKind::Keys => &["keys"],
        CleanKind::All => &["packages", "repodata", "solvcache", "keys", "tmp"],
        CleanKind::ExpireCache => {
            let repomd = repo_dir.join("repodata").join("repomd.xml");
            if repomd.exists() {
                backdate(&repomd)?;
                return Ok(1);
            }
            return Ok(0);
        }
    };
    let mut removed = 0;
    for target in targets {
        let dir = repo_dir.join(target);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
            removed += 1;
        }
    }
    if kind == CleanKind::All && fs::read_dir(repo_dir).map(|mut d| d.next().is_none()).unwrap_or(false)
    {
        fs::remove_dir(repo_dir).map_err(|e| Error::io(repo_dir, e))?;
    }
    Ok(removed)
}

/// Set a file's times to the epoch so freshness checks see it as stale.
fn backdate(path: &Path) -> Result<()> {
    let file = fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    let times = fs::FileTimes::new()
        .set_accessed(std::time::UNIX_EPOCH)
        .set_modified(std::time::UNIX_EPOCH);
    file.set_times(times).map_err(|e| Error::io(path, e))
}

/// Cache directory of one repository.
#[derive(Clone, Debug)]
pub struct RepoCache {
    repo_id: String,
    dir: PathBuf,
}

impl RepoCache {
    /// The repository this cache belongs to.
    #[must_use]
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    /// The repo cache directory itself.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// What: Deterministic path of a cached file.
    ///
    /// Inputs:
    /// - `section`: Which subdirectory.
    /// - `file_name`: Plain file name inside it.
    ///
    /// Output:
    /// - The path; existence is the caller's question to ask.
    #[must_use]
    pub fn path(&self, section: Section, file_name: &str) -> PathBuf {
        self.dir.join(section.dir_name()).join(file_name)
    }

    /// What: Look up a cached file.
    ///
    /// Output:
    /// - `Some(path)` when present, `None` when missing.
    #[must_use]
    pub fn get(&self, section: Section, file_name: &str) -> Option<PathBuf> {
        let path = self.path(section, file_name);
        path.exists().then_some(path)
    }

    /// What: Atomically store bytes at a cache path.
    ///
    /// Inputs:
    /// - `section`, `file_name`: Destination inside this repo cache.
    /// - `bytes`: Full file content.
    ///
    /// Output:
    /// - The final path.
    ///
    /// Details:
    /// - Streams to `tmp/`, fsyncs, then renames. A crash at any point
    ///   leaves either the old file or nothing at the destination.
    pub fn put_bytes(&self, section: Section, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let dest = self.path(section, file_name);
        self.put_with(&dest, |file| {
            file.write_all(bytes)
                .map_err(|e| Error::io(&dest, e))
        })?;
        Ok(dest)
    }

    /// What: Atomically move an already-downloaded temp file into place.
    ///
    /// Inputs:
    /// - `section`, `file_name`: Destination.
    /// - `src`: A file inside this cache's `tmp/` directory.
    ///
    /// Output:
    /// - The final path.
    pub fn adopt(&self, section: Section, file_name: &str, src: &Path) -> Result<PathBuf> {
        let dest = self.path(section, file_name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::rename(src, &dest).map_err(|e| Error::io(&dest, e))?;
        Ok(dest)
    }

    /// What: The scratch directory downloads stream into.
    ///
    /// Output:
    /// - The `tmp/` path, created if missing.
    pub fn tmp_dir(&self) -> Result<PathBuf> {
        let dir = self.dir.join("tmp");
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        Ok(dir)
    }

    /// What: Force the next metadata fetch by backdating the repomd.
    ///
    /// Output:
    /// - `Ok(())`; a missing repomd is already as stale as it gets.
    pub fn expire(&self) -> Result<()> {
        let repomd = self.path(Section::Repodata, "repomd.xml");
        if repomd.exists() {
            debug!(repo = %self.repo_id, "expiring cached repomd");
            backdate(&repomd)?;
        }
        Ok(())
    }

    /// What: Age of the cached repomd in seconds.
    ///
    /// Output:
    /// - `Some(age)` when a repomd is cached and its mtime is readable.
    #[must_use]
    pub fn repomd_age(&self) -> Option<u64> {
        let repomd = self.path(Section::Repodata, "repomd.xml");
        let mtime = fs::metadata(&repomd).ok()?.modified().ok()?;
        std::time::SystemTime::now()
            .duration_since(mtime)
            .ok()
            .map(|d| d.as_secs())
    }

    fn put_with(
        &self,
        dest: &Path,
        write: impl FnOnce(&mut fs::File) -> Result<()>,
    ) -> Result<()> {
        let tmp_dir = self.tmp_dir()?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut tmp = tempfile::NamedTempFile::new_in(&tmp_dir)
            .map_err(|e| Error::io(&tmp_dir, e))?;
        write(tmp.as_file_mut())?;
        tmp.as_file().sync_all().map_err(|e| Error::io(dest, e))?;
        tmp.persist(dest)
            .map_err(|e| Error::io(dest, e.error))?;
        Ok(())
    }
}
