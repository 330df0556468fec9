//! Crate-wide error type and result alias.
//!
//! Every fallible operation in ferrite returns [`Result`]. The [`Error`]
//! enum groups failures by kind: configuration, I/O, network, cache,
//! integrity, solver, transaction, and user input. Variants carry the
//! structured payload a caller needs to render a useful message (paths,
//! expected vs computed digests, per-URL status, solver problem lists)
//! without re-parsing strings.

use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::ChecksumKind;
use crate::solver::problems::Problem;

/// Convenient `Result` alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure kinds surfaced by ferrite operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- configuration -----------------------------------------------------

    /// Malformed configuration or repo file.
    #[error("configuration error in {}: {detail}", path.display())]
    Config {
        /// File the error was found in.
        path: PathBuf,
        /// Human-readable description, including the line where applicable.
        detail: String,
    },

    /// Two repo sections share the same id across the enabled set.
    #[error("repository id '{id}' is defined more than once")]
    DuplicateRepoId {
        /// The offending repository id.
        id: String,
    },

    /// A named repository does not exist in the loaded configuration.
    #[error("repository '{id}' not found")]
    RepoNotFound {
        /// The repository id that failed to resolve.
        id: String,
    },

    // --- io ----------------------------------------------------------------

    /// Underlying OS failure with the path it occurred on.
    #[error("I/O error on {}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// The OS-level error, errno included.
        #[source]
        source: std::io::Error,
    },

    // --- network -----------------------------------------------------------

    /// A transfer failed after exhausting retries.
    #[error("download of {url} failed: {detail}")]
    Network {
        /// The URL that failed.
        url: String,
        /// HTTP status when the server answered, `None` on transport errors.
        status: Option<u16>,
        /// Transport- or server-provided detail.
        detail: String,
    },

    /// Every configured base URL failed to yield a repomd file.
    #[error("no usable base URL for repository '{repo}'")]
    NoBaseUrl {
        /// Repository that could not be resolved.
        repo: String,
    },

    // --- cache -------------------------------------------------------------

    /// `--cacheonly` was given but the repo has no cached metadata.
    #[error("cache-only mode requested but no cached metadata exists for '{repo}'")]
    CacheDisabled {
        /// Repository whose cache is missing.
        repo: String,
    },

    /// On-disk cache content failed to load.
    #[error("cache for '{repo}' is corrupt: {detail}")]
    CacheCorrupt {
        /// Repository whose cache is damaged.
        repo: String,
        /// What failed to parse or verify.
        detail: String,
    },

    // --- integrity ---------------------------------------------------------

    /// A downloaded file does not hash to the value its repo declared.
    #[error(
        "checksum mismatch on {}: expected {algo} {expected}, computed {computed}",
        path.display()
    )]
    ChecksumMismatch {
        /// The file that failed verification.
        path: PathBuf,
        /// Digest algorithm used.
        algo: ChecksumKind,
        /// Digest the repository metadata declared, lowercase hex.
        expected: String,
        /// Digest actually computed from the file, lowercase hex.
        computed: String,
    },

    /// A detached or embedded signature did not verify.
    #[error("bad signature on {}: {detail}", path.display())]
    BadSignature {
        /// The signed file.
        path: PathBuf,
        /// Verification failure detail.
        detail: String,
    },

    /// No key in the keyring can verify the signature.
    #[error("no usable public key for {subject}")]
    NoKey {
        /// What was being verified (file or key id).
        subject: String,
    },

    /// The digest algorithm is disallowed by the FIPS runtime policy.
    #[error("digest algorithm {algo} is forbidden in FIPS mode")]
    FipsForbidden {
        /// The rejected algorithm.
        algo: ChecksumKind,
    },

    /// A hex digest string is not valid for its algorithm.
    #[error("invalid hex digest '{value}'")]
    BadHex {
        /// The rejected string.
        value: String,
    },

    /// The snapshot filter's per-package buffer ceiling was exceeded.
    #[error("snapshot filter buffer overflow while processing a package element")]
    FilterOverflow,

    // --- solver ------------------------------------------------------------

    /// A package spec matched nothing in the visible pool.
    #[error("no package matches '{spec}'")]
    NoMatch {
        /// The user-supplied spec.
        spec: String,
    },

    /// An install request named a package that is already present.
    #[error("package {nevra} is already installed")]
    AlreadyInstalled {
        /// The installed package identity.
        nevra: String,
    },

    /// An upgrade request found no newer candidate.
    #[error("no upgrade path for '{name}'")]
    NoUpgradePath {
        /// Name that cannot be upgraded.
        name: String,
    },

    /// A downgrade request found no older candidate.
    #[error("no downgrade path for '{name}'")]
    NoDowngradePath {
        /// Name that cannot be downgraded.
        name: String,
    },

    /// The plan would remove a protected package without replacing it.
    #[error("refusing to remove protected package(s): {}", names.join(", "))]
    Protected {
        /// The protected names that would be removed.
        names: Vec<String>,
    },

    /// Dependency resolution failed with one or more structured problems.
    #[error("{}", render_problems(problems))]
    Unresolvable {
        /// Problems reported by the dependency engine, already filtered.
        problems: Vec<Problem>,
    },

    // --- transaction -------------------------------------------------------

    /// The RPM backend rejected or failed the transaction.
    #[error("rpm transaction failed: {detail}")]
    Backend {
        /// Backend-provided failure detail.
        detail: String,
    },

    /// The operation was cancelled between transaction steps.
    #[error("operation interrupted")]
    Interrupted,

    /// A non-waiting lock acquisition found the lock held elsewhere.
    #[error("another instance holds the lock at {}", path.display())]
    LockBusy {
        /// The lock file path.
        path: PathBuf,
    },

    /// The lock file could only be opened read-only.
    #[error("lock file {} is not writable; cannot run a mutating command", path.display())]
    LockReadOnly {
        /// The lock file path.
        path: PathBuf,
    },

    // --- history -----------------------------------------------------------

    /// The history database failed.
    #[error("history database error: {0}")]
    History(#[from] rusqlite::Error),

    /// A referenced history transaction id does not exist.
    #[error("no history transaction with id {id}")]
    HistoryIdNotFound {
        /// The missing transaction id.
        id: i64,
    },

    // --- user --------------------------------------------------------------

    /// Invalid command-line usage that clap itself cannot detect.
    #[error("{0}")]
    User(String),
}

impl Error {
    /// What: Wrap an `std::io::Error` with the path it occurred on.
    ///
    /// Inputs:
    /// - `path`: File or directory the operation touched.
    /// - `source`: The raw OS error.
    ///
    /// Output:
    /// - An [`Error::Io`] carrying both.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// What: Map this error to the process exit code contract.
    ///
    /// Output:
    /// - `1` for every error kind; success and the check-update special
    ///   case (`100`) are handled by the command layer, not here.
    ///
    /// Details:
    /// - Kept as a method so the mapping has one home if it ever grows.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Render a problem list with one numbered line per problem.
fn render_problems(problems: &[Problem]) -> String {
    use std::fmt::Write;

    let mut out = String::from("the transaction cannot be resolved:");
    for (idx, problem) in problems.iter().enumerate() {
        let _ = write!(out, "\n {}. {problem}", idx + 1);
    }
    out
}
