//! Integration tests for the repository metadata lifecycle.

mod common;

#[path = "repo_metadata/fetch_cache.rs"]
mod fetch_cache;
#[path = "repo_metadata/snapshot_filter.rs"]
mod snapshot_filter;
