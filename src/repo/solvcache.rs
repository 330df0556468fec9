//! Binary per-repo pool cache.
//!
//! After a repository's XML metadata is parsed, its package slice is
//! serialized to a compact cache file so later runs skip XML parsing
//! entirely. The file is gzip-compressed package data trailed by a
//! 32-byte cookie computed over an ident string and the raw repomd
//! bytes: when the repomd changes in any way, the cookie changes and
//! the cache is ignored.

use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::pool::Package;

/// Trailing cookie length in bytes.
pub const SOLV_COOKIE_LEN: usize = 32;

/// Ident mixed into the cookie so unrelated SHA-256 files never match.
const COOKIE_IDENT: &[u8] = b"ferrite-solv-1";

/// What: Compute the cache cookie for a repomd document.
///
/// Inputs:
/// - `repomd_bytes`: The raw repomd file content.
///
/// Output:
/// - 32 cookie bytes.
#[must_use]
pub fn compute_cookie(repomd_bytes: &[u8]) -> [u8; SOLV_COOKIE_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(COOKIE_IDENT);
    hasher.update(repomd_bytes);
    hasher.finalize().into()
}

/// What: Cache file name for a repo, versioned by its cookie.
///
/// Inputs:
/// - `repo_id`: Repository id.
/// - `cookie`: The current cookie.
///
/// Output:
/// - `<repo>-<cookie4hex>.solv`, so a metadata change also changes the
///   file name and stale caches never shadow fresh ones.
#[must_use]
pub fn cache_file_name(repo_id: &str, cookie: &[u8; SOLV_COOKIE_LEN]) -> String {
    format!("{repo_id}-{}.solv", hex::encode(&cookie[..4]))
}

/// What: Write a repo's package slice to a cache file.
///
/// Inputs:
/// - `path`: Destination cache file.
/// - `packages`: The repo's parsed packages.
/// - `cookie`: Cookie for the repomd these packages came from.
///
/// Output:
/// - `Ok(())`; the write is atomic via a temp file in the same
///   directory.
pub fn write_cache(
    path: &Path,
    packages: &[Package],
    cookie: &[u8; SOLV_COOKIE_LEN],
) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    let json = serde_json::to_vec(packages).map_err(|e| Error::CacheCorrupt {
        repo: path.display().to_string(),
        detail: format!("cannot serialize pool slice: {e}"),
    })?;
    encoder
        .write_all(&json)
        .map_err(|e| Error::io(path, e))?;
    let mut body = encoder.finish().map_err(|e| Error::io(path, e))?;
    body.extend_from_slice(cookie);

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
    tmp.write_all(&body).map_err(|e| Error::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(path, e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    debug!(path = %path.display(), count = packages.len(), "solv cache written");
    Ok(())
}

/// What: Load a cache file if its trailing cookie still matches.
///
/// Inputs:
/// - `path`: Cache file location.
/// - `expected`: Cookie freshly computed from the current repomd.
///
/// Output:
/// - `Ok(Some(packages))` on a cookie match; `Ok(None)` when the file
///   is missing, too short, or carries a different cookie (the caller
///   falls back to XML parsing); `CacheCorrupt` when the cookie matches
///   but the body does not decode.
pub fn load_cache(
    path: &Path,
    expected: &[u8; SOLV_COOKIE_LEN],
) -> Result<Option<Vec<Package>>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(path, e)),
    };
    if data.len() < SOLV_COOKIE_LEN {
        return Ok(None);
    }
    let (body, cookie) = data.split_at(data.len() - SOLV_COOKIE_LEN);
    if cookie != expected {
        debug!(path = %path.display(), "solv cache cookie mismatch, reparsing");
        return Ok(None);
    }

    let mut decoder = GzDecoder::new(body);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| Error::CacheCorrupt {
            repo: path.display().to_string(),
            detail: format!("cannot decompress solv cache: {e}"),
        })?;
    let packages = serde_json::from_slice(&json).map_err(|e| Error::CacheCorrupt {
        repo: path.display().to_string(),
        detail: format!("cannot decode solv cache: {e}"),
    })?;
    Ok(Some(packages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nevra::{Evr, Nevra};

    fn sample_packages() -> Vec<Package> {
        let mut a = Package::new(
            Nevra::new("alpha", Evr::new(0, "1.0", "1"), "x86_64"),
            "base",
        );
        a.summary = "Alpha".to_string();
        let self_provide = a.self_provide();
        a.provides.push(self_provide);
        a.files.push("/usr/bin/alpha".to_string());
        let b = Package::new(
            Nevra::new("beta", Evr::new(1, "2.0", "3"), "noarch"),
            "base",
        );
        vec![a, b]
    }

    #[test]
    fn round_trips_pointwise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base.solv");
        let cookie = compute_cookie(b"<repomd>rev1</repomd>");
        let packages = sample_packages();

        write_cache(&path, &packages, &cookie).unwrap();
        let loaded = load_cache(&path, &cookie).unwrap().unwrap();
        assert_eq!(loaded, packages);
    }

    #[test]
    fn changed_repomd_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base.solv");
        let cookie = compute_cookie(b"<repomd>rev1</repomd>");
        write_cache(&path, &sample_packages(), &cookie).unwrap();

        let newer = compute_cookie(b"<repomd>rev2</repomd>");
        assert!(load_cache(&path, &newer).unwrap().is_none());
    }

    #[test]
    fn missing_and_truncated_files_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base.solv");
        let cookie = compute_cookie(b"x");
        assert!(load_cache(&path, &cookie).unwrap().is_none());

        std::fs::write(&path, b"short").unwrap();
        assert!(load_cache(&path, &cookie).unwrap().is_none());
    }

    #[test]
    fn cookie_tracks_ident_and_content() {
        assert_ne!(compute_cookie(b"a"), compute_cookie(b"b"));
        let plain: [u8; 32] = Sha256::digest(b"a").into();
        assert_ne!(compute_cookie(b"a"), plain);
    }

    #[test]
    fn cache_name_embeds_cookie_prefix() {
        let cookie = compute_cookie(b"content");
        let name = cache_file_name("base", &cookie);
        assert!(name.starts_with("base-"));
        assert!(name.ends_with(".solv"));
        assert_eq!(name.len(), "base-".len() + 8 + ".solv".len());
    }
}
