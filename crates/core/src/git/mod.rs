//! Git backend: local repository operations via `git2`.

pub mod client;

pub use client::GitClient;

use crate::errors::GitError;

/// The Git primitive operations the commit-hash pipeline depends on.
///
/// Methods are synchronous (`git2` is synchronous); the pipeline calls them
/// between its async queue operations. [`GitClient`] is the production
/// implementation; tests substitute mocks.
pub trait GitBackend: Send {
    /// Path of the local working tree.
    fn workdir(&self) -> &std::path::Path;

    /// Fetch from the configured remote.
    fn fetch(&self) -> Result<(), GitError>;

    /// Fetch and fast-forward the current branch to the remote tip.
    fn pull(&self, branch: &str) -> Result<(), GitError>;

    /// Local branch names.
    fn local_branches(&self) -> Result<Vec<String>, GitError>;

    /// Create a local branch tracking `remote/branch`.
    fn create_tracking_branch(&self, name: &str, remote_branch: &str) -> Result<(), GitError>;

    /// Check out an existing local branch.
    fn checkout_branch(&self, name: &str) -> Result<(), GitError>;

    /// Paths with uncommitted modifications (empty means clean).
    fn dirty_paths(&self) -> Result<Vec<String>, GitError>;

    /// SHA of the local branch tip.
    fn branch_tip(&self, name: &str) -> Result<String, GitError>;

    /// SHA of the remote-tracking tip for `branch`.
    fn remote_tip(&self, branch: &str) -> Result<String, GitError>;

    /// Apply `commit_id` to the working tree and index without committing.
    /// Conflicts surface as [`GitError::CherryPickConflict`].
    fn cherry_pick_no_commit(&self, commit_id: &str) -> Result<(), GitError>;

    /// Paths currently in conflict in the index.
    fn conflicting_paths(&self) -> Result<Vec<String>, GitError>;

    /// Stage everything and commit; returns the new SHA.
    fn commit(&self, message: &str) -> Result<String, GitError>;

    /// Push `branch`; any non-OK per-ref update status is a hard failure.
    fn push(&self, branch: &str) -> Result<(), GitError>;

    /// Commit message of `commit_id`.
    fn message_of(&self, commit_id: &str) -> Result<String, GitError>;

    /// Fetch and hard-reset the current branch to the remote tip of
    /// `branch`, discarding local changes.
    fn hard_reset_to_remote(&self, branch: &str) -> Result<(), GitError>;
}
