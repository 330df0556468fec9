//! Plugin event interface.
//!
//! External collaborators (metalink resolution, repo key policy, kernel
//! handling) hook the session through a small set of typed events
//! instead of loadable modules. The session fires events at fixed
//! points; a handler may mutate the payload where the variant allows it.

use std::path::Path;

use crate::config::repo::RepoConfig;
use crate::error::Result;
use crate::nevra::Nevra;

/// Events delivered to plugin handlers.
pub enum PluginEvent<'a> {
    /// Session startup, fired once after configuration is loaded.
    Init,
    /// A repo section was read; the handler may rewrite URL lists
    /// (metalink and mirrorlist resolution happens here).
    RepoReadConfig {
        /// The repo being configured.
        repo: &'a mut RepoConfig,
    },
    /// A repo's metadata finished downloading.
    RepoMdDownloadEnd {
        /// Repository id.
        repo_id: &'a str,
        /// Cache directory the metadata landed in.
        dir: &'a Path,
        /// The base URL the fetch used.
        url: &'a str,
    },
    /// A kernel package is about to be installed.
    KernelInstall {
        /// The kernel package identity.
        pkg: &'a Nevra,
    },
}

/// A registered plugin event handler.
pub trait PluginHandler {
    /// What: Handle one event.
    ///
    /// Output:
    /// - `Ok(())` to continue; an error aborts the surrounding
    ///   operation.
    fn handle(&mut self, event: PluginEvent<'_>) -> Result<()>;
}

/// Handler used when plugins are disabled.
#[derive(Default)]
pub struct NoopPlugins;

impl PluginHandler for NoopPlugins {
    fn handle(&mut self, _event: PluginEvent<'_>) -> Result<()> {
        Ok(())
    }
}
