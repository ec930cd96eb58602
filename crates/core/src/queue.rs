//! Remote descriptor queue and the status state machine.
//!
//! The queue is a set of named folders (Todo, Done, Ignored, Cancelled,
//! Manual) holding descriptor files. The transport is abstract: anything
//! implementing [`RemoteQueue`] works. [`FsQueue`] is the folder-on-a-mount
//! reference implementation.
//!
//! Status transitions go through [`transition`]: the remote move is the
//! authoritative side effect, and the in-memory status is updated only after
//! the move succeeds, so a failed move leaves the descriptor unchanged and
//! is safe to retry.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::descriptor::{QueueEntry, Status};
use crate::errors::QueueError;

// ---------------------------------------------------------------------------
// Folders
// ---------------------------------------------------------------------------

/// The fixed folder names of the remote queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum QueueFolder {
    Todo,
    Done,
    Ignored,
    Cancelled,
    Manual,
}

impl QueueFolder {
    pub const ALL: [QueueFolder; 5] = [
        Self::Todo,
        Self::Done,
        Self::Ignored,
        Self::Cancelled,
        Self::Manual,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Todo => "Todo",
            Self::Done => "Done",
            Self::Ignored => "Ignored",
            Self::Cancelled => "Cancelled",
            Self::Manual => "Manual",
        }
    }
}

impl std::fmt::Display for QueueFolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Queue trait
// ---------------------------------------------------------------------------

/// Abstract remote queue capability: list, fetch, put, move, delete.
#[async_trait]
pub trait RemoteQueue: Send + Sync {
    /// Descriptor ids present in `folder`.
    async fn list(&self, folder: QueueFolder) -> Result<Vec<String>, QueueError>;

    /// Fetch the raw bytes of a descriptor.
    async fn fetch(&self, folder: QueueFolder, id: &str) -> Result<Vec<u8>, QueueError>;

    /// Store a descriptor file in `folder`.
    async fn put(&self, folder: QueueFolder, id: &str, content: &[u8]) -> Result<(), QueueError>;

    /// Move a descriptor between folders.
    async fn move_to(
        &self,
        id: &str,
        from: QueueFolder,
        to: QueueFolder,
    ) -> Result<(), QueueError>;

    /// Delete a descriptor.
    async fn delete(&self, folder: QueueFolder, id: &str) -> Result<(), QueueError>;
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Move the descriptor's backing file to the folder for `new_status`, then
/// record the transition locally. The in-memory status changes if and only
/// if the remote move succeeded.
#[instrument(skip(queue, entry), fields(id = %entry.id))]
pub async fn transition(
    queue: &dyn RemoteQueue,
    entry: &mut QueueEntry,
    new_status: Status,
) -> Result<(), QueueError> {
    let from = entry.location();
    let to = new_status.folder();
    if from != to {
        queue.move_to(&entry.id, from, to).await?;
    }
    entry.record_transition(new_status);
    info!(status = %new_status, "descriptor transitioned");
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem queue
// ---------------------------------------------------------------------------

/// Folder-per-status queue on a local or mounted filesystem.
pub struct FsQueue {
    root: PathBuf,
}

impl FsQueue {
    /// Open a queue rooted at `root`, creating the status folders if absent.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let root = root.into();
        for folder in QueueFolder::ALL {
            std::fs::create_dir_all(root.join(folder.name()))?;
        }
        debug!(root = %root.display(), "opened filesystem queue");
        Ok(Self { root })
    }

    fn path(&self, folder: QueueFolder, id: &str) -> PathBuf {
        self.root.join(folder.name()).join(id)
    }
}

#[async_trait]
impl RemoteQueue for FsQueue {
    async fn list(&self, folder: QueueFolder) -> Result<Vec<String>, QueueError> {
        let dir = self.root.join(folder.name());
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn fetch(&self, folder: QueueFolder, id: &str) -> Result<Vec<u8>, QueueError> {
        let path = self.path(folder, id);
        if !path.exists() {
            return Err(QueueError::NotFound {
                id: id.to_string(),
                folder: folder.name().to_string(),
            });
        }
        Ok(tokio::fs::read(&path).await?)
    }

    async fn put(&self, folder: QueueFolder, id: &str, content: &[u8]) -> Result<(), QueueError> {
        tokio::fs::write(self.path(folder, id), content).await?;
        Ok(())
    }

    async fn move_to(
        &self,
        id: &str,
        from: QueueFolder,
        to: QueueFolder,
    ) -> Result<(), QueueError> {
        let src = self.path(from, id);
        let dst = self.path(to, id);
        if !src.exists() {
            return Err(QueueError::NotFound {
                id: id.to_string(),
                folder: from.name().to_string(),
            });
        }
        tokio::fs::rename(&src, &dst)
            .await
            .map_err(|e| QueueError::MoveFailed {
                id: id.to_string(),
                from: from.name().to_string(),
                to: to.name().to_string(),
                detail: e.to_string(),
            })?;
        debug!(id, %from, %to, "moved descriptor");
        Ok(())
    }

    async fn delete(&self, folder: QueueFolder, id: &str) -> Result<(), QueueError> {
        tokio::fs::remove_file(self.path(folder, id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_queue_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let queue = FsQueue::open(dir.path()).unwrap();

        queue
            .put(QueueFolder::Todo, "m1.txt", b"REVISION_START=1")
            .await
            .unwrap();
        assert_eq!(queue.list(QueueFolder::Todo).await.unwrap(), vec!["m1.txt"]);
        assert_eq!(
            queue.fetch(QueueFolder::Todo, "m1.txt").await.unwrap(),
            b"REVISION_START=1"
        );

        queue
            .move_to("m1.txt", QueueFolder::Todo, QueueFolder::Done)
            .await
            .unwrap();
        assert!(queue.list(QueueFolder::Todo).await.unwrap().is_empty());
        assert_eq!(queue.list(QueueFolder::Done).await.unwrap(), vec!["m1.txt"]);

        queue.delete(QueueFolder::Done, "m1.txt").await.unwrap();
        assert!(queue.list(QueueFolder::Done).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_updates_status_after_move() {
        let dir = tempfile::tempdir().unwrap();
        let queue = FsQueue::open(dir.path()).unwrap();
        queue
            .put(QueueFolder::Todo, "m1.txt", b"x")
            .await
            .unwrap();

        let mut entry = QueueEntry::new("m1.txt");
        transition(&queue, &mut entry, Status::Done).await.unwrap();
        assert_eq!(entry.status(), Status::Done);
        assert_eq!(entry.location(), QueueFolder::Done);
        assert_eq!(queue.list(QueueFolder::Done).await.unwrap(), vec!["m1.txt"]);
    }

    #[tokio::test]
    async fn test_failed_move_leaves_status_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let queue = FsQueue::open(dir.path()).unwrap();
        // No file exists, so the move must fail.
        let mut entry = QueueEntry::new("ghost.txt");
        let result = transition(&queue, &mut entry, Status::Done).await;
        assert!(result.is_err());
        assert_eq!(entry.status(), Status::Pending);
        assert_eq!(entry.location(), QueueFolder::Todo);

        // Retry after the file appears.
        queue
            .put(QueueFolder::Todo, "ghost.txt", b"x")
            .await
            .unwrap();
        transition(&queue, &mut entry, Status::Done).await.unwrap();
        assert_eq!(entry.status(), Status::Done);
    }

    #[tokio::test]
    async fn test_ignored_back_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let queue = FsQueue::open(dir.path()).unwrap();
        queue.put(QueueFolder::Todo, "m1.txt", b"x").await.unwrap();

        let mut entry = QueueEntry::new("m1.txt");
        transition(&queue, &mut entry, Status::Ignored)
            .await
            .unwrap();
        transition(&queue, &mut entry, Status::Pending)
            .await
            .unwrap();
        assert_eq!(entry.status(), Status::Pending);
        assert_eq!(queue.list(QueueFolder::Todo).await.unwrap(), vec!["m1.txt"]);
    }
}
