//! # Ferrite Crate Overview
//!
//! Ferrite is an RPM-based package manager: it resolves install,
//! upgrade, downgrade, remove, reinstall, distro-sync and autoremove
//! requests against configured repositories and the installed RPM
//! database, executes the result as one ordered RPM transaction, and
//! records every transaction in a durable history log. Integration
//! tests and downstream tooling can depend on this crate to drive the
//! full pipeline without going through the binary entrypoint.
//!
//! ## Highlights
//! - Repository metadata lifecycle with atomic caching, checksum and
//!   GPG verification, snapshot filtering and a binary pool cache.
//! - SAT dependency resolution (`resolvo`) with structured problem
//!   reporting and deterministic candidate tie-breaking.
//! - Transaction history with auto/user flags driving autoremove,
//!   undo, redo and rollback.
//!
//! ## Crate Layout
//! - [`config`], [`app`]: configuration model, overlays, session wiring.
//! - [`cache`], [`fetch`], [`repo`]: blob store, transfers, metadata.
//! - [`pool`], [`solver`], [`plan`]: package universe, resolution,
//!   classification.
//! - [`history`], [`executor`], [`rpmdb`]: durable history, execution
//!   pipeline, RPM backend boundary.
//! - [`cli`], [`output`]: command surface and rendering.
//!
//! ## Quick Start
//! ```no_run
//! #[tokio::main]
//! async fn main() {
//!     std::process::exit(ferrite::cli::run().await);
//! }
//! ```

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod history;
pub mod lock;
pub mod nevra;
pub mod output;
pub mod plan;
pub mod plugin;
pub mod pool;
pub mod repo;
pub mod rpmdb;
pub mod solver;
pub mod util;

pub use error::{Error, Result};
