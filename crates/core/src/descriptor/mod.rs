//! Merge descriptor model.
//!
//! A merge descriptor is a serialized record describing one change to
//! propagate between branches. Two variants exist: a revision range against
//! the SVN backend and a single commit against the Git backend. Change data
//! is immutable after parsing; the only mutable parts are the target branch
//! (explicit [`Routing::retarget`]) and the queue entry (status + remote
//! location), which changes only through queue transitions.

pub mod parser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::QueueFolder;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a merge descriptor. Exactly one holder at a time;
/// transitions are the only mutation path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Done,
    Ignored,
    Cancelled,
    Manual,
}

impl Status {
    /// The remote queue folder holding descriptors in this status.
    pub fn folder(self) -> QueueFolder {
        match self {
            Self::Pending => QueueFolder::Todo,
            Self::Done => QueueFolder::Done,
            Self::Ignored => QueueFolder::Ignored,
            Self::Cancelled => QueueFolder::Cancelled,
            Self::Manual => QueueFolder::Manual,
        }
    }

    /// The status implied by the folder a descriptor was found in.
    pub fn for_folder(folder: QueueFolder) -> Self {
        match folder {
            QueueFolder::Todo => Self::Pending,
            QueueFolder::Done => Self::Done,
            QueueFolder::Ignored => Self::Ignored,
            QueueFolder::Cancelled => Self::Cancelled,
            QueueFolder::Manual => Self::Manual,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Done => write!(f, "done"),
            Self::Ignored => write!(f, "ignored"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue entry (status + remote location)
// ---------------------------------------------------------------------------

/// The mutable queue-facing part of a descriptor: its identity in the queue,
/// its status, and the folder it currently lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// The descriptor's file name in the remote queue.
    pub id: String,
    status: Status,
    location: QueueFolder,
}

impl QueueEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::Pending,
            location: QueueFolder::Todo,
        }
    }

    /// Reconstruct the entry for a descriptor found in the folder matching
    /// `status`.
    pub fn restored(id: impl Into<String>, status: Status) -> Self {
        Self {
            id: id.into(),
            status,
            location: status.folder(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn location(&self) -> QueueFolder {
        self.location
    }

    /// Record a completed transition. Called by the queue state machine only
    /// after the remote move succeeded.
    pub(crate) fn record_transition(&mut self, status: Status) {
        self.status = status;
        self.location = status.folder();
    }
}

// ---------------------------------------------------------------------------
// Routing (the one reassignable locus field)
// ---------------------------------------------------------------------------

/// Target-branch routing. Kept in its own sub-record so the rest of the
/// descriptor stays immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    target_branch: String,
}

impl Routing {
    pub fn new(target_branch: impl Into<String>) -> Self {
        Self {
            target_branch: target_branch.into(),
        }
    }

    pub fn target_branch(&self) -> &str {
        &self.target_branch
    }

    /// Redirect the descriptor to a different target branch before merging.
    pub fn retarget(&mut self, target_branch: impl Into<String>) {
        self.target_branch = target_branch.into();
    }
}

// ---------------------------------------------------------------------------
// File entries
// ---------------------------------------------------------------------------

/// One affected file, with its SVN-status-style action prefix and the
/// source/target path pair (which differ when the path was renamed in-flight,
/// recorded with the `old > new` notation in the descriptor file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub action: char,
    pub source_path: String,
    pub target_path: String,
}

impl FileEntry {
    pub fn is_delete(&self) -> bool {
        self.action == 'D'
    }

    pub fn is_add(&self) -> bool {
        self.action == 'A'
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// A revision-range descriptor for the SVN backend.
#[derive(Debug, Clone)]
pub struct SvnDescriptor {
    /// Repository identifier (first path segment of the branch URL).
    pub repository: String,
    /// Host the repository lives on.
    pub host: String,
    pub created_at: DateTime<Utc>,
    /// Full URL of the source branch.
    pub source_url: String,
    /// Source branch path relative to the repository root.
    pub source_branch: String,
    /// Root URL of the repository (host + repository segment).
    pub repo_root_url: String,
    pub revision_start: i64,
    pub revision_end: i64,
    pub files: Vec<FileEntry>,
    pub routing: Routing,
    pub entry: QueueEntry,
}

impl SvnDescriptor {
    /// Full URL of the (possibly retargeted) target branch.
    pub fn target_url(&self) -> String {
        format!("{}/{}", self.repo_root_url, self.routing.target_branch())
    }

    /// True when the source-side and target-side file lists are identical,
    /// which permits a single bulk merge over the working-copy root.
    pub fn files_identical(&self) -> bool {
        self.files
            .iter()
            .all(|f| f.source_path == f.target_path)
    }

    /// Target-side paths that must exist in the working copy: every affected
    /// file plus files marked for deletion (deleting needs the file present).
    pub fn required_target_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.target_path.clone()).collect()
    }

    /// Target-side paths of newly-added files (these are absent from the
    /// target branch until the merge lands).
    pub fn added_target_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.is_add())
            .map(|f| f.target_path.clone())
            .collect()
    }
}

/// A single-commit descriptor for the Git backend.
#[derive(Debug, Clone)]
pub struct GitDescriptor {
    /// Repository clone URL.
    pub url: String,
    /// Host part of the clone URL.
    pub host: String,
    pub created_at: DateTime<Utc>,
    /// Content-addressed commit identifier.
    pub commit_id: String,
    pub source_branch: String,
    pub files: Vec<FileEntry>,
    pub routing: Routing,
    pub entry: QueueEntry,
}

/// A merge descriptor of either backend kind.
#[derive(Debug, Clone)]
pub enum MergeDescriptor {
    Svn(SvnDescriptor),
    Git(GitDescriptor),
}

impl MergeDescriptor {
    pub fn entry(&self) -> &QueueEntry {
        match self {
            Self::Svn(d) => &d.entry,
            Self::Git(d) => &d.entry,
        }
    }

    pub fn entry_mut(&mut self) -> &mut QueueEntry {
        match self {
            Self::Svn(d) => &mut d.entry,
            Self::Git(d) => &mut d.entry,
        }
    }

    pub fn id(&self) -> &str {
        &self.entry().id
    }

    pub fn status(&self) -> Status {
        self.entry().status()
    }

    /// Short human-readable summary of the change locus.
    pub fn summary(&self) -> String {
        match self {
            Self::Svn(d) => format!(
                "[{}:{}] {} -> {}",
                d.revision_start,
                d.revision_end,
                d.source_branch,
                d.routing.target_branch()
            ),
            Self::Git(d) => format!(
                "{} {} -> {}",
                &d.commit_id[..d.commit_id.len().min(8)],
                d.source_branch,
                d.routing.target_branch()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_folder_mapping() {
        assert_eq!(Status::Pending.folder(), QueueFolder::Todo);
        assert_eq!(Status::Done.folder(), QueueFolder::Done);
        assert_eq!(Status::Ignored.folder(), QueueFolder::Ignored);
        assert_eq!(Status::Cancelled.folder(), QueueFolder::Cancelled);
        assert_eq!(Status::Manual.folder(), QueueFolder::Manual);
    }

    #[test]
    fn test_retarget() {
        let mut routing = Routing::new("trunk");
        assert_eq!(routing.target_branch(), "trunk");
        routing.retarget("branches/18.5");
        assert_eq!(routing.target_branch(), "branches/18.5");
    }

    #[test]
    fn test_queue_entry_starts_pending_in_todo() {
        let entry = QueueEntry::new("merge-001.txt");
        assert_eq!(entry.status(), Status::Pending);
        assert_eq!(entry.location(), QueueFolder::Todo);
    }
}
