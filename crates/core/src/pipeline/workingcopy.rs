//! Working-copy construction for revision-range merges.
//!
//! A merge runs against a minimal zero-depth checkout of the target branch
//! that contains exactly the paths the merge touches. The builder recreates
//! the checkout from scratch on every run (stale working copies from aborted
//! runs are never trusted), resolves every required path through the rename
//! engine, populates the path set, and reports which required files are
//! still absent so the pipeline can raise the missing-file decision point.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::descriptor::SvnDescriptor;
use crate::errors::SvnError;
use crate::resolve::RenameResolver;
use crate::svn::SvnBackend;
use crate::version::Version;

// ---------------------------------------------------------------------------
// Resolution span
// ---------------------------------------------------------------------------

/// The version interval a descriptor's paths are resolved over.
///
/// `from` is the source branch's version (exclusive), `to` the target
/// branch's (inclusive). A target branch with no configured version disables
/// resolution for the run; paths pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionSpan {
    pub from: Version,
    pub to: Option<Version>,
}

impl ResolutionSpan {
    pub fn new(from: Version, to: Option<Version>) -> Self {
        Self { from, to }
    }

    /// Derive the span from the configured branch-version table.
    pub fn from_config(config: &AppConfig, source_branch: &str, target_branch: &str) -> Self {
        let from = config
            .branch_version(source_branch)
            .unwrap_or_else(Version::zero);
        let to = config.branch_version(target_branch);
        if to.is_none() {
            debug!(
                target_branch,
                "no configured version for target branch, resolution disabled"
            );
        }
        Self { from, to }
    }

    /// Resolve one repository-relative path over this span.
    pub fn translate(&self, resolver: &RenameResolver, repository: &str, path: &str) -> String {
        match &self.to {
            Some(to) => resolver.resolve_rename(repository, path, &self.from, to),
            None => path.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Required path set
// ---------------------------------------------------------------------------

/// The repository-relative paths a merge needs present in the working copy:
/// every resolved target path of the descriptor plus its full ancestor
/// chain, ancestors first.
pub fn required_paths(
    descriptor: &SvnDescriptor,
    resolver: &RenameResolver,
    span: &ResolutionSpan,
) -> Vec<String> {
    let mut set: BTreeSet<String> = BTreeSet::new();
    for target in descriptor.required_target_paths() {
        let resolved = span.translate(resolver, &descriptor.repository, &target);
        let mut rest = resolved.as_str();
        set.insert(resolved.clone());
        while let Some(pos) = rest.rfind('/') {
            rest = &rest[..pos];
            if !rest.is_empty() {
                set.insert(rest.to_string());
            }
        }
    }
    let mut paths: Vec<String> = set.into_iter().collect();
    paths.sort_by_key(|p| (p.matches('/').count(), p.clone()));
    paths
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Result of building and populating a working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// All required paths are present.
    Ready,
    /// These resolved target paths are still absent (newly-added files
    /// excluded). The pipeline raises a decision point for them.
    MissingFiles(Vec<String>),
}

/// Builds the minimal working copy a revision-range merge runs in.
pub struct WorkingCopyBuilder<'a> {
    svn: &'a dyn SvnBackend,
    resolver: &'a RenameResolver,
    /// Process name to terminate when the stale working copy cannot be
    /// deleted (a file indexer or similar holding handles open). Empty
    /// disables the kill-and-retry.
    interfering_process: String,
}

impl<'a> WorkingCopyBuilder<'a> {
    pub fn new(
        svn: &'a dyn SvnBackend,
        resolver: &'a RenameResolver,
        interfering_process: impl Into<String>,
    ) -> Self {
        Self {
            svn,
            resolver,
            interfering_process: interfering_process.into(),
        }
    }

    /// Recreate the working copy at `wc_path` for `descriptor`'s target
    /// branch and populate it with every required path.
    #[instrument(skip(self, descriptor, span), fields(id = %descriptor.entry.id, wc = %wc_path.display()))]
    pub async fn ensure(
        &self,
        descriptor: &SvnDescriptor,
        wc_path: &Path,
        span: &ResolutionSpan,
    ) -> Result<EnsureOutcome, SvnError> {
        self.recreate_empty(descriptor, wc_path).await?;
        self.populate(descriptor, wc_path, span).await?;
        let missing = self.absent_required_files(descriptor, wc_path, span);
        if missing.is_empty() {
            Ok(EnsureOutcome::Ready)
        } else {
            warn!(count = missing.len(), "required files absent after population");
            Ok(EnsureOutcome::MissingFiles(missing))
        }
    }

    /// Delete any stale working copy and check out the target branch root at
    /// depth zero. A failed delete gets one retry after terminating the
    /// configured interfering process.
    async fn recreate_empty(
        &self,
        descriptor: &SvnDescriptor,
        wc_path: &Path,
    ) -> Result<(), SvnError> {
        if wc_path.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(wc_path).await {
                warn!(error = %e, "stale working copy delete failed, retrying");
                self.kill_interfering_process().await;
                tokio::time::sleep(Duration::from_millis(500)).await;
                tokio::fs::remove_dir_all(wc_path).await.map_err(|e| {
                    SvnError::WorkingCopyError {
                        path: wc_path.display().to_string(),
                        detail: format!("could not delete stale working copy: {}", e),
                    }
                })?;
            }
            debug!("stale working copy deleted");
        }
        if let Some(parent) = wc_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.svn
            .checkout_empty(&descriptor.target_url(), wc_path)
            .await?;
        info!(url = %descriptor.target_url(), "working copy recreated");
        Ok(())
    }

    async fn kill_interfering_process(&self) {
        if self.interfering_process.is_empty() {
            return;
        }
        info!(process = %self.interfering_process, "terminating interfering process");
        let result = Command::new("pkill")
            .arg("-f")
            .arg(&self.interfering_process)
            .output()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to run pkill");
        }
    }

    /// Bring every required path into the working copy at depth zero.
    async fn populate(
        &self,
        descriptor: &SvnDescriptor,
        wc_path: &Path,
        span: &ResolutionSpan,
    ) -> Result<(), SvnError> {
        let required = required_paths(descriptor, self.resolver, span);
        let branch = descriptor.routing.target_branch();
        let rels: Vec<String> = required
            .iter()
            .filter_map(|p| wc_relative(p, branch))
            .collect();
        debug!(count = rels.len(), "populating working copy");
        self.svn.update_empty(wc_path, &rels).await
    }

    /// Resolved target files that are absent after population. Files the
    /// merge itself adds are expected to be absent and are excluded.
    fn absent_required_files(
        &self,
        descriptor: &SvnDescriptor,
        wc_path: &Path,
        span: &ResolutionSpan,
    ) -> Vec<String> {
        let added: BTreeSet<String> = descriptor
            .added_target_paths()
            .iter()
            .map(|p| span.translate(self.resolver, &descriptor.repository, p))
            .collect();
        let branch = descriptor.routing.target_branch();

        let mut missing = Vec::new();
        for target in descriptor.required_target_paths() {
            let resolved = span.translate(self.resolver, &descriptor.repository, &target);
            if added.contains(&resolved) {
                continue;
            }
            match wc_relative(&resolved, branch) {
                Some(rel) => {
                    if !wc_path.join(&rel).exists() {
                        missing.push(resolved);
                    }
                }
                // A path outside the target branch cannot be populated here.
                None => missing.push(resolved),
            }
        }
        missing.sort();
        missing.dedup();
        missing
    }
}

/// Convert a repository-relative path to a working-copy-relative one.
///
/// Returns `None` for the branch root itself (already present as the
/// checkout root) and for paths outside the target branch.
pub fn wc_relative(path: &str, target_branch: &str) -> Option<String> {
    if path == target_branch {
        return None;
    }
    let prefix = format!("{}/", target_branch);
    path.strip_prefix(&prefix).map(|rest| rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FileEntry, QueueEntry, Routing};
    use crate::lookup::LookupStore;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn descriptor(files: Vec<FileEntry>) -> SvnDescriptor {
        SvnDescriptor {
            repository: "repo".into(),
            host: "svn.example.com".into(),
            created_at: chrono::Utc::now(),
            source_url: "https://svn.example.com/repo/trunk".into(),
            source_branch: "trunk".into(),
            repo_root_url: "https://svn.example.com/repo".into(),
            revision_start: 100,
            revision_end: 101,
            files,
            routing: Routing::new("trunk"),
            entry: QueueEntry::new("merge-001.txt"),
        }
    }

    fn entry(action: char, path: &str) -> FileEntry {
        FileEntry {
            action,
            source_path: path.into(),
            target_path: path.into(),
        }
    }

    #[test]
    fn test_wc_relative() {
        assert_eq!(wc_relative("trunk/src/A.java", "trunk"), Some("src/A.java".into()));
        assert_eq!(wc_relative("trunk", "trunk"), None);
        assert_eq!(wc_relative("branches/x/f.txt", "trunk"), None);
    }

    #[test]
    fn test_required_paths_include_ancestors() {
        let d = descriptor(vec![entry('M', "trunk/src/a/A.java")]);
        let resolver = RenameResolver::new(None);
        let span = ResolutionSpan::new(Version::zero(), Some(v("60")));
        let paths = required_paths(&d, &resolver, &span);
        assert_eq!(
            paths,
            vec!["trunk", "trunk/src", "trunk/src/a", "trunk/src/a/A.java"]
        );
    }

    #[test]
    fn test_required_paths_follow_renames() {
        let store = LookupStore::in_memory().unwrap();
        store
            .insert_rename("repo", "trunk/src", "trunk/newsrc", &v("50"))
            .unwrap();
        let resolver = RenameResolver::new(Some(store));
        let d = descriptor(vec![entry('M', "trunk/src/A.java")]);
        let span = ResolutionSpan::new(Version::zero(), Some(v("60")));
        let paths = required_paths(&d, &resolver, &span);
        assert!(paths.contains(&"trunk/newsrc".to_string()));
        assert!(paths.contains(&"trunk/newsrc/A.java".to_string()));
        assert!(!paths.iter().any(|p| p.starts_with("trunk/src")));
    }

    #[test]
    fn test_resolution_disabled_without_target_version() {
        let store = LookupStore::in_memory().unwrap();
        store
            .insert_rename("repo", "trunk/src", "trunk/newsrc", &v("50"))
            .unwrap();
        let resolver = RenameResolver::new(Some(store));
        let span = ResolutionSpan::new(Version::zero(), None);
        assert_eq!(
            span.translate(&resolver, "repo", "trunk/src/A.java"),
            "trunk/src/A.java"
        );
    }

    fn config_with_branches() -> AppConfig {
        use crate::config::{GeneralConfig, GitConfig, LookupConfig, QueueConfig, SvnConfig};
        AppConfig {
            queue: QueueConfig {
                root: "/tmp/queue".into(),
            },
            svn: SvnConfig {
                username: "alice".into(),
                password_env: "SVN_PW".into(),
                interfering_process: String::new(),
                password: None,
            },
            git: GitConfig::default(),
            lookup: LookupConfig::default(),
            general: GeneralConfig::default(),
            branches: Default::default(),
        }
    }

    #[test]
    fn test_span_from_config() {
        let mut config = config_with_branches();
        config
            .branches
            .insert("trunk".into(), v("19.0"));
        config
            .branches
            .insert("branches/18.5".into(), v("18.5"));
        let span = ResolutionSpan::from_config(&config, "branches/18.5", "trunk");
        assert_eq!(span.from, v("18.5"));
        assert_eq!(span.to, Some(v("19.0")));

        let span = ResolutionSpan::from_config(&config, "branches/18.5", "branches/unknown");
        assert_eq!(span.from, v("18.5"));
        assert_eq!(span.to, None);
    }
}
