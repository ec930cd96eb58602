//! SVN backend: CLI client, XML output parsing, diff classification.

pub mod classifier;
pub mod client;
pub mod parser;

use std::path::Path;

use async_trait::async_trait;

pub use client::SvnClient;
pub use parser::{SvnDiffEntry, SvnLogEntry};

use crate::errors::SvnError;

/// The SVN primitive operations the merge pipeline depends on.
///
/// [`SvnClient`] is the production implementation; tests substitute mocks.
#[async_trait]
pub trait SvnBackend: Send + Sync {
    /// Recursive diff summary between two revisions of a branch URL.
    async fn diff_summarize(
        &self,
        url: &str,
        start_rev: i64,
        end_rev: i64,
    ) -> Result<Vec<SvnDiffEntry>, SvnError>;

    /// Log entries for a revision range of a branch URL.
    async fn log(&self, url: &str, start_rev: i64, end_rev: i64)
        -> Result<Vec<SvnLogEntry>, SvnError>;

    /// Zero-depth checkout of a branch root into `wc_path`.
    async fn checkout_empty(&self, url: &str, wc_path: &Path) -> Result<(), SvnError>;

    /// Zero-depth update of specific working-copy-relative paths, creating
    /// intermediate directories (`--parents`).
    async fn update_empty(&self, wc_path: &Path, rel_paths: &[String]) -> Result<(), SvnError>;

    /// Plain update of the whole working copy (used in the out-of-date
    /// commit retry loop).
    async fn update(&self, wc_path: &Path) -> Result<(), SvnError>;

    /// Merge a revision range of `source_url` into the working copy.
    ///
    /// `target_rel` limits the merge to one path inside the working copy
    /// (`None` merges into the root). `record_only` applies merge metadata
    /// without transferring content.
    async fn merge(
        &self,
        wc_path: &Path,
        source_url: &str,
        start_rev: i64,
        end_rev: i64,
        target_rel: Option<&str>,
        record_only: bool,
    ) -> Result<(), SvnError>;

    /// Commit the working copy; returns the new revision number.
    async fn commit(&self, wc_path: &Path, message: &str) -> Result<i64, SvnError>;

    /// Working-copy-relative paths with unresolved conflicts.
    async fn conflicts(&self, wc_path: &Path) -> Result<Vec<String>, SvnError>;
}
