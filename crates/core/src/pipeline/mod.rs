//! Merge pipeline shared machinery.
//!
//! Both backend pipelines share the retry/cancel protocol: every stage is
//! wrapped in a decision point, and on failure an external
//! [`DecisionHandler`] chooses whether to retry the stage, revert local
//! state and retry, or cancel the whole merge. The handler receives a
//! wrapped [`PipelineError`](crate::errors::PipelineError), never a raw
//! backend error, so it stays agnostic of backend error shapes.

pub mod git;
pub mod svn;
pub mod workingcopy;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::queue::{QueueFolder, RemoteQueue};

// ---------------------------------------------------------------------------
// Decision protocol
// ---------------------------------------------------------------------------

/// Answer from the external decision callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Re-run only the failed stage.
    Retry,
    /// Discard local uncommitted changes, then re-run the failed stage.
    RevertAndRetry,
    /// Abort the pipeline and mark the descriptor Cancelled.
    Cancel,
    /// Open the local working copy for manual inspection, then re-check.
    OpenLocation,
}

/// Context handed to the decision callback.
#[derive(Debug)]
pub enum DecisionContext<'a> {
    /// A stage failed with a recoverable error.
    StageError {
        stage: &'static str,
        error: &'a PipelineError,
    },
    /// The working copy has unresolved conflicts; `OpenLocation` is a valid
    /// answer here.
    Conflicts {
        paths: &'a [String],
        location: &'a Path,
    },
    /// Required files are absent from the working copy. `Retry` continues
    /// without them (the operator merges those manually); `Cancel` aborts.
    MissingFiles { paths: &'a [String] },
}

/// External recoverable-error / conflict resolution callback.
///
/// Synchronous by design: a decision point blocks the pipeline until an
/// answer is supplied, and this is the only place user-facing latency is
/// expected.
pub trait DecisionHandler: Send + Sync {
    fn decide(&self, context: &DecisionContext<'_>) -> Decision;
}

/// External progress/cancellation capability.
pub trait ProgressMonitor: Send + Sync {
    /// Polled cooperatively between stages.
    fn cancel_requested(&self) -> bool;

    /// Called when committing begins; cancellation must no longer be
    /// offered after this.
    fn commit_started(&self);
}

/// No-op monitor for non-interactive runs.
pub struct NoProgress;

impl ProgressMonitor for NoProgress {
    fn cancel_requested(&self) -> bool {
        false
    }

    fn commit_started(&self) {}
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge was committed. For the SVN backend `revision` is the new
    /// revision number; for Git it is unset and `commit_id` holds the SHA.
    Committed {
        revision: Option<i64>,
        commit_id: Option<String>,
    },
    /// The merge was cancelled; the descriptor has been moved to Cancelled.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Scratch file guard
// ---------------------------------------------------------------------------

/// Deletes the local scratch copy of a descriptor on drop, guaranteeing no
/// leaked local copies on any exit path (success, failure, cancellation).
pub struct ScratchGuard {
    path: PathBuf,
}

impl ScratchGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to delete scratch file");
            } else {
                debug!(path = %self.path.display(), "deleted scratch file");
            }
        }
    }
}

/// Fetch a descriptor's bytes into a local scratch file under
/// `data_dir/scratch/`, guarded for deletion on every exit path.
pub(crate) async fn fetch_scratch(
    queue: &dyn RemoteQueue,
    folder: QueueFolder,
    id: &str,
    data_dir: &Path,
) -> Result<ScratchGuard, PipelineError> {
    let dir = data_dir.join("scratch");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| PipelineError::stage("fetch-descriptor", e))?;
    let bytes = queue
        .fetch(folder, id)
        .await
        .map_err(|e| PipelineError::stage("fetch-descriptor", e))?;
    let path = dir.join(id);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| PipelineError::stage("fetch-descriptor", e))?;
    debug!(path = %path.display(), "descriptor fetched to scratch");
    Ok(ScratchGuard::new(path))
}

// ---------------------------------------------------------------------------
// Commit message synthesis
// ---------------------------------------------------------------------------

/// Tag prefixing every pipeline-generated commit message header.
pub const MERGE_HEADER_TAG: &str = "MP";

/// Header + original message for an SVN revision-range merge:
/// `MP [100:101] trunk -> trunk: <original>`.
pub fn svn_merge_message(
    start_rev: i64,
    end_rev: i64,
    source_branch: &str,
    target_branch: &str,
    original: &str,
) -> String {
    format!(
        "{} [{}:{}] {} -> {}: {}",
        MERGE_HEADER_TAG,
        start_rev,
        end_rev,
        source_branch,
        target_branch,
        strip_merge_headers(original)
    )
}

/// Header + original message for a Git cherry-pick merge:
/// `MP 3f2a9c1d feature -> main (2025-02-10T14:31:02Z): <original>`.
pub fn git_merge_message(
    commit_id: &str,
    source_branch: &str,
    target_branch: &str,
    timestamp: &str,
    original: &str,
) -> String {
    let short = &commit_id[..commit_id.len().min(8)];
    format!(
        "{} {} {} -> {} ({}): {}",
        MERGE_HEADER_TAG,
        short,
        source_branch,
        target_branch,
        timestamp,
        strip_merge_headers(original)
    )
}

/// Strip the pipeline's own merge headers from a message, recursively, so a
/// change merged through several branches keeps only its original text.
pub fn strip_merge_headers(message: &str) -> String {
    let header = regex_lite::Regex::new(
        r"^MP\s+(\[[^\]]+\]|[0-9a-fA-F]{7,40})\s+\S+\s+->\s+\S+(\s+\([^)]*\))?:\s*",
    )
    .expect("merge header pattern is valid");

    let mut current = message.trim_start();
    while let Some(m) = header.find(current) {
        current = current[m.end()..].trim_start();
    }
    current.to_string()
}

// ---------------------------------------------------------------------------
// Commit failure classification
// ---------------------------------------------------------------------------

/// How a failed commit should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFailure {
    /// The working copy is out of date: update, then retry the commit.
    NeedsUpdate,
    /// The working copy has conflicts: back to the conflict loop.
    Conflict,
    /// Anything else: a regular stage decision point.
    Other,
}

/// Substring patterns in backend diagnostic text, checked in order.
///
/// The backend error surface is unstructured text; keeping the table in one
/// place means a backend upgrade only touches this list. Known fragility.
const COMMIT_FAILURE_PATTERNS: &[(&str, CommitFailure)] = &[
    ("E155011", CommitFailure::NeedsUpdate),
    ("E160028", CommitFailure::NeedsUpdate),
    ("out of date", CommitFailure::NeedsUpdate),
    ("out-of-date", CommitFailure::NeedsUpdate),
    ("E155015", CommitFailure::Conflict),
    ("remains in conflict", CommitFailure::Conflict),
    ("conflict", CommitFailure::Conflict),
];

/// Classify a commit failure from the backend's diagnostic text.
pub fn classify_commit_failure(diagnostic: &str) -> CommitFailure {
    let lower = diagnostic.to_lowercase();
    for (pattern, kind) in COMMIT_FAILURE_PATTERNS {
        if lower.contains(&pattern.to_lowercase()) {
            return *kind;
        }
    }
    CommitFailure::Other
}
