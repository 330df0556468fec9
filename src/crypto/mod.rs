//! File digests, hex handling and GPG verification.
//!
//! Wraps the RustCrypto digest implementations behind one [`ChecksumKind`]
//! switch, streams files in fixed-size chunks, and enforces the FIPS
//! runtime policy (MD5 refused when `FERRITE_FIPS=1`). Signature
//! verification against imported repository keys lives in [`keyring`].

pub mod keyring;

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use digest::DynDigest;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Read chunk size for streaming digests.
const DIGEST_CHUNK: usize = 64 * 1024;

/// Digest algorithms supported by repository metadata and RPM headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumKind {
    /// MD5; refused under FIPS policy.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256, the common repomd default.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl ChecksumKind {
    /// What: Parse the algorithm names used in repomd and primary XML.
    ///
    /// Inputs:
    /// - `s`: Name such as `sha256`, `sha512`, `sha` (legacy SHA-1), `md5`.
    ///
    /// Output:
    /// - The matching kind, or `None` for unknown names.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "sha" | "sha1" | "sha-1" => Some(Self::Sha1),
            "sha256" | "sha-256" => Some(Self::Sha256),
            "sha512" | "sha-512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Digest length in bytes.
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Expected length of the hex form.
    #[must_use]
    pub fn hex_len(self) -> usize {
        self.digest_len() * 2
    }

    fn hasher(self) -> Box<dyn DynDigest> {
        match self {
            Self::Md5 => Box::new(md5::Md5::default()),
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
            Self::Sha512 => Box::new(sha2::Sha512::default()),
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        };
        f.write_str(s)
    }
}

/// What: Report whether the FIPS runtime policy is active.
///
/// Output:
/// - `true` when `FERRITE_FIPS=1` is set in the environment.
///
/// Details:
/// - Stands in for the kernel FIPS switch so the policy is testable.
#[must_use]
pub fn fips_enabled() -> bool {
    std::env::var("FERRITE_FIPS").ok().as_deref() == Some("1")
}

/// What: Compute the digest of a file.
///
/// Inputs:
/// - `path`: File to hash.
/// - `kind`: Algorithm to apply.
///
/// Output:
/// - The raw digest bytes.
///
/// Details:
/// - Streams in 64 KiB chunks so large RPMs never load fully.
/// - Fails with [`Error::FipsForbidden`] for MD5 under FIPS policy and
///   [`Error::Io`] on any read error.
pub fn digest_file(path: &Path, kind: ChecksumKind) -> Result<Vec<u8>> {
    if kind == ChecksumKind::Md5 && fips_enabled() {
        return Err(Error::FipsForbidden { algo: kind });
    }
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = kind.hasher();
    let mut buf = vec![0u8; DIGEST_CHUNK];
    loop {
        let n = file.read(&mut buf).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

/// What: Verify a file against an expected hex digest.
///
/// Inputs:
/// - `path`: File to verify.
/// - `kind`: Algorithm the expectation uses.
/// - `expected_hex`: Digest the repository metadata declared.
///
/// Output:
/// - `Ok(())` on match; [`Error::ChecksumMismatch`] carrying both hex
///   strings otherwise.
pub fn verify_digest(path: &Path, kind: ChecksumKind, expected_hex: &str) -> Result<()> {
    let expected = hex_to_bytes(expected_hex)?;
    if expected.len() != kind.digest_len() {
        return Err(Error::BadHex {
            value: expected_hex.to_string(),
        });
    }
    let computed = digest_file(path, kind)?;
    if computed == expected {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            algo: kind,
            expected: expected_hex.to_ascii_lowercase(),
            computed: bytes_to_hex(&computed),
        })
    }
}

/// What: Encode bytes as lowercase hex.
#[must_use]
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// What: Decode a strict hex string into bytes.
///
/// Inputs:
/// - `s`: An even-length string of `[0-9A-Fa-f]`.
///
/// Output:
/// - The decoded bytes, or [`Error::BadHex`] for odd lengths or
///   non-hex characters.
pub fn hex_to_bytes(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::BadHex {
            value: s.to_string(),
        });
    }
    hex::decode(s).map_err(|_| Error::BadHex {
        value: s.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hex_round_trip_up_to_64_bytes() {
        for len in 0..=64usize {
            let data: Vec<u8> = (0..len).map(|i| (i * 37 % 256) as u8).collect();
            if data.is_empty() {
                continue;
            }
            let hexed = bytes_to_hex(&data);
            assert_eq!(hex_to_bytes(&hexed).unwrap(), data);
        }
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert!(hex_to_bytes("abc").is_err());
        assert!(hex_to_bytes("zz").is_err());
        assert!(hex_to_bytes("").is_err());
        assert!(hex_to_bytes("AbCd").is_ok());
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"hello\n").unwrap();
        drop(f);

        let digest = digest_file(&path, ChecksumKind::Sha256).unwrap();
        assert_eq!(
            bytes_to_hex(&digest),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn verify_digest_mismatch_reports_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"content").unwrap();

        let wrong = "00".repeat(32);
        let err = verify_digest(&path, ChecksumKind::Sha256, &wrong).unwrap_err();
        match err {
            Error::ChecksumMismatch {
                expected, computed, ..
            } => {
                assert_eq!(expected, wrong);
                assert_ne!(computed, wrong);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn checksum_kind_parses_metadata_names() {
        assert_eq!(ChecksumKind::parse("SHA256"), Some(ChecksumKind::Sha256));
        assert_eq!(ChecksumKind::parse("sha"), Some(ChecksumKind::Sha1));
        assert_eq!(ChecksumKind::parse("md5"), Some(ChecksumKind::Md5));
        assert_eq!(ChecksumKind::parse("crc32"), None);
    }
}
