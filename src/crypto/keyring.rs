//! Imported repository GPG keys and detached-signature verification.
//!
//! Keys arrive as ASCII-armored public key blocks from a repo's `gpgkey`
//! URLs and are kept under the blob store's `keys/` directory, one file
//! per primary-key fingerprint. Verification accepts a signature if the
//! primary key or any signing subkey of an imported key validates it.

use std::fmt::Write as _;
use std::path::Path;

use pgp::types::PublicKeyTrait;
use pgp::{Deserializable, SignedPublicKey, StandaloneSignature};
use tracing::debug;

use crate::error::{Error, Result};

/// An in-memory set of imported public keys.
#[derive(Default)]
pub struct Keyring {
    keys: Vec<SignedPublicKey>,
}

impl Keyring {
    /// What: Create an empty keyring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of imported primary keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key has been imported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// What: Import an ASCII-armored public key block.
    ///
    /// Inputs:
    /// - `armor`: The full `BEGIN PGP PUBLIC KEY BLOCK` text.
    ///
    /// Output:
    /// - The primary-key fingerprint as lowercase hex.
    ///
    /// Details:
    /// - Duplicate imports are de-duplicated by fingerprint.
    pub fn import_armored(&mut self, armor: &str) -> Result<String> {
        let (key, _headers) =
            SignedPublicKey::from_string(armor).map_err(|e| Error::BadSignature {
                path: "<key import>".into(),
                detail: format!("cannot parse public key: {e}"),
            })?;
        let fingerprint = hex_fingerprint(key.fingerprint().as_bytes());
        if !self
            .keys
            .iter()
            .any(|k| k.fingerprint().as_bytes() == key.fingerprint().as_bytes())
        {
            debug!(fingerprint = %fingerprint, "imported public key");
            self.keys.push(key);
        }
        Ok(fingerprint)
    }

    /// What: Import a key file previously stored on disk.
    ///
    /// Inputs:
    /// - `path`: File holding one armored public key block.
    ///
    /// Output:
    /// - The primary-key fingerprint as lowercase hex.
    pub fn import_file(&mut self, path: &Path) -> Result<String> {
        let armor = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        self.import_armored(&armor)
    }

    /// What: Verify an armored detached signature over a data file.
    ///
    /// Inputs:
    /// - `data_path`: The signed file.
    /// - `sig_path`: The `.asc` detached signature next to it.
    ///
    /// Output:
    /// - `Ok(())` when any imported key (or signing subkey) validates the
    ///   signature; [`Error::NoKey`] when the keyring holds no candidate
    ///   key for the signature's issuer; [`Error::BadSignature`] when a
    ///   candidate key exists but verification fails.
    pub fn verify_detached(&self, data_path: &Path, sig_path: &Path) -> Result<()> {
        let data = std::fs::read(data_path).map_err(|e| Error::io(data_path, e))?;
        let armor = std::fs::read_to_string(sig_path).map_err(|e| Error::io(sig_path, e))?;
        let (signature, _headers) =
            StandaloneSignature::from_string(&armor).map_err(|e| Error::BadSignature {
                path: sig_path.to_path_buf(),
                detail: format!("cannot parse signature: {e}"),
            })?;

        if self.keys.is_empty() {
            return Err(Error::NoKey {
                subject: data_path.display().to_string(),
            });
        }

        let mut candidate_found = false;
        let mut last_failure = String::new();
        for key in &self.keys {
            candidate_found = true;
            match signature.verify(key, &data) {
                Ok(()) => return Ok(()),
                Err(e) => last_failure = e.to_string(),
            }
            for subkey in &key.public_subkeys {
                match signature.verify(subkey, &data) {
                    Ok(()) => return Ok(()),
                    Err(e) => last_failure = e.to_string(),
                }
            }
        }

        if candidate_found {
            Err(Error::BadSignature {
                path: data_path.to_path_buf(),
                detail: last_failure,
            })
        } else {
            Err(Error::NoKey {
                subject: data_path.display().to_string(),
            })
        }
    }
}

/// Render a fingerprint byte slice as lowercase hex.
fn hex_fingerprint(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_keyring_reports_no_key() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("repomd.xml");
        let sig = dir.path().join("repomd.xml.asc");
        std::fs::write(&data, b"<repomd/>").unwrap();
        std::fs::write(&sig, b"not a signature").unwrap();

        let ring = Keyring::new();
        // The signature never parses against an empty ring before the key
        // lookup happens, so both orders must end in an error.
        assert!(ring.verify_detached(&data, &sig).is_err());
    }

    #[test]
    fn import_rejects_garbage() {
        let mut ring = Keyring::new();
        assert!(ring.import_armored("definitely not a key").is_err());
        assert!(ring.is_empty());
    }
}
