//! Commit-hash merge pipeline (Git backend).
//!
//! Same retry/cancel protocol as the revision-range pipeline, against a
//! persistent local clone. The clone itself is ensured when the backend is
//! constructed ([`crate::git::GitClient::open_or_clone`]); the pipeline
//! assumes a usable repository and owns it exclusively for the run.

use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use super::{
    git_merge_message, Decision, DecisionContext, DecisionHandler, MergeOutcome, ProgressMonitor,
};
use crate::descriptor::{GitDescriptor, Status};
use crate::errors::{GitError, PipelineError};
use crate::git::GitBackend;
use crate::queue::{transition, RemoteQueue};

/// The commit-hash merge pipeline.
pub struct GitMergePipeline<'a> {
    git: &'a dyn GitBackend,
    queue: &'a dyn RemoteQueue,
    handler: &'a dyn DecisionHandler,
    monitor: &'a dyn ProgressMonitor,
    data_dir: PathBuf,
}

enum Recovery {
    Retry,
    Reset,
    Abort,
}

enum ConflictGate {
    Clear,
    Cancelled,
}

impl<'a> GitMergePipeline<'a> {
    pub fn new(
        git: &'a dyn GitBackend,
        queue: &'a dyn RemoteQueue,
        handler: &'a dyn DecisionHandler,
        monitor: &'a dyn ProgressMonitor,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            git,
            queue,
            handler,
            monitor,
            data_dir: data_dir.into(),
        }
    }

    /// Run the full pipeline for one descriptor.
    #[instrument(skip(self, descriptor), fields(id = %descriptor.entry.id))]
    pub async fn run(
        &self,
        descriptor: &mut GitDescriptor,
    ) -> Result<MergeOutcome, PipelineError> {
        let (_source_local, target_local) = local_branch_names(descriptor);

        // Fetch the descriptor to a guarded scratch file.
        let _scratch = loop {
            match super::fetch_scratch(
                self.queue,
                descriptor.entry.location(),
                &descriptor.entry.id,
                &self.data_dir,
            )
            .await
            {
                Ok(guard) => break guard,
                Err(e) => match self.recover("fetch-descriptor", &e, &target_local).await {
                    Recovery::Abort => return self.cancel(descriptor, "fetch-descriptor").await,
                    _ => continue,
                },
            }
        };
        if self.monitor.cancel_requested() {
            return self.cancel(descriptor, "fetch-descriptor").await;
        }

        // Prepare the target branch: fetch, tracking branches, checkout,
        // fast-forward, clean + staleness verification.
        loop {
            match self.prepare_branch(descriptor, &target_local) {
                Ok(()) => break,
                Err(e) => match self.recover("prepare-branch", &e, &target_local).await {
                    Recovery::Retry => {}
                    Recovery::Reset => self.reset(descriptor, &target_local)?,
                    Recovery::Abort => return self.cancel(descriptor, "prepare-branch").await,
                },
            }
        }
        if self.monitor.cancel_requested() {
            return self.cancel(descriptor, "prepare-branch").await;
        }

        // Cherry-pick without committing; conflicts go to the decision loop.
        loop {
            match self.git.cherry_pick_no_commit(&descriptor.commit_id) {
                Ok(()) => break,
                Err(GitError::CherryPickConflict { paths, .. }) => {
                    match self
                        .conflict_gate(descriptor, &target_local, Some(paths))
                        .await?
                    {
                        ConflictGate::Clear => break,
                        ConflictGate::Cancelled => return Ok(MergeOutcome::Cancelled),
                    }
                }
                Err(e) => {
                    let wrapped = PipelineError::stage("cherry-pick", e);
                    match self.recover("cherry-pick", &wrapped, &target_local).await {
                        Recovery::Retry => {}
                        Recovery::Reset => self.reset(descriptor, &target_local)?,
                        Recovery::Abort => return self.cancel(descriptor, "cherry-pick").await,
                    }
                }
            }
        }
        if self.monitor.cancel_requested() {
            return self.cancel(descriptor, "cherry-pick").await;
        }

        // Commit. Cancellation is refused from here on.
        let message = loop {
            match self.build_commit_message(descriptor, &target_local) {
                Ok(message) => break message,
                Err(e) => match self.recover("commit-message", &e, &target_local).await {
                    Recovery::Retry => {}
                    Recovery::Reset => self.reset(descriptor, &target_local)?,
                    Recovery::Abort => return self.cancel(descriptor, "commit-message").await,
                },
            }
        };
        self.monitor.commit_started();
        let commit_id = loop {
            match self.git.commit(&message) {
                Ok(sha) => break sha,
                Err(e) => {
                    let wrapped = PipelineError::stage("commit", e);
                    match self.recover("commit", &wrapped, &target_local).await {
                        Recovery::Retry => {}
                        Recovery::Reset => self.reset(descriptor, &target_local)?,
                        Recovery::Abort => return self.cancel(descriptor, "commit").await,
                    }
                }
            }
        };
        info!(commit = %commit_id, "merge committed");

        // Push. A per-ref rejection is a hard failure, not a decision point:
        // the local branch now disagrees with the remote and must be
        // inspected, not blindly retried.
        loop {
            match self.git.push(&target_local) {
                Ok(()) => break,
                Err(e @ GitError::PushRejected { .. }) => {
                    return Err(PipelineError::stage("push", e));
                }
                Err(e) => {
                    let wrapped = PipelineError::stage("push", e);
                    match self.recover("push", &wrapped, &target_local).await {
                        Recovery::Retry => {}
                        Recovery::Reset => self.reset(descriptor, &target_local)?,
                        Recovery::Abort => return self.cancel(descriptor, "push").await,
                    }
                }
            }
        }

        transition(self.queue, &mut descriptor.entry, Status::Done).await?;
        Ok(MergeOutcome::Committed {
            revision: None,
            commit_id: Some(commit_id),
        })
    }

    // -----------------------------------------------------------------------
    // Stage bodies
    // -----------------------------------------------------------------------

    /// Fetch, ensure tracking branches for source and target, check out the
    /// target branch, fast-forward it, and verify it is clean and current.
    fn prepare_branch(
        &self,
        descriptor: &GitDescriptor,
        target_local: &str,
    ) -> Result<(), PipelineError> {
        let stage = "prepare-branch";
        let (source_local, _) = local_branch_names(descriptor);

        self.git.fetch().map_err(|e| PipelineError::stage(stage, e))?;

        let locals = self
            .git
            .local_branches()
            .map_err(|e| PipelineError::stage(stage, e))?;
        if !locals.iter().any(|b| b == &source_local) {
            self.git
                .create_tracking_branch(&source_local, &descriptor.source_branch)
                .map_err(|e| PipelineError::stage(stage, e))?;
            debug!(branch = %source_local, "created source tracking branch");
        }
        if !locals.iter().any(|b| b == target_local) {
            self.git
                .create_tracking_branch(target_local, descriptor.routing.target_branch())
                .map_err(|e| PipelineError::stage(stage, e))?;
            debug!(branch = %target_local, "created target tracking branch");
        }

        self.git
            .checkout_branch(target_local)
            .map_err(|e| PipelineError::stage(stage, e))?;
        self.git
            .pull(target_local)
            .map_err(|e| PipelineError::stage(stage, e))?;

        let dirty = self
            .git
            .dirty_paths()
            .map_err(|e| PipelineError::stage(stage, e))?;
        if !dirty.is_empty() {
            return Err(PipelineError::stage(
                stage,
                GitError::DirtyWorkingTree(dirty.join(", ")),
            ));
        }
        let local = self
            .git
            .branch_tip(target_local)
            .map_err(|e| PipelineError::stage(stage, e))?;
        let remote = self
            .git
            .remote_tip(descriptor.routing.target_branch())
            .map_err(|e| PipelineError::stage(stage, e))?;
        if local != remote {
            return Err(PipelineError::stage(
                stage,
                GitError::StaleBranch {
                    branch: target_local.to_string(),
                    local,
                    remote,
                },
            ));
        }
        Ok(())
    }

    /// Loop until the index has no conflicts or the operator cancels.
    /// `initial` carries the paths from the cherry-pick failure itself.
    async fn conflict_gate(
        &self,
        descriptor: &mut GitDescriptor,
        target_local: &str,
        initial: Option<Vec<String>>,
    ) -> Result<ConflictGate, PipelineError> {
        let stage = "conflict-check";
        let mut conflicts = match initial {
            Some(paths) => paths,
            None => self
                .git
                .conflicting_paths()
                .map_err(|e| PipelineError::stage(stage, e))?,
        };
        loop {
            if conflicts.is_empty() {
                return Ok(ConflictGate::Clear);
            }
            warn!(count = conflicts.len(), "cherry-pick has conflicts");
            let decision = self.handler.decide(&DecisionContext::Conflicts {
                paths: &conflicts,
                location: self.git.workdir(),
            });
            match decision {
                Decision::Retry => {}
                Decision::OpenLocation => self.open_location().await,
                Decision::RevertAndRetry => {
                    // Reset wipes the cherry-pick; re-apply it before the
                    // next conflict check.
                    self.reset(descriptor, target_local)?;
                    match self.git.cherry_pick_no_commit(&descriptor.commit_id) {
                        Ok(()) | Err(GitError::CherryPickConflict { .. }) => {}
                        Err(e) => return Err(PipelineError::stage(stage, e)),
                    }
                }
                Decision::Cancel => {
                    self.cancel(descriptor, stage).await?;
                    return Ok(ConflictGate::Cancelled);
                }
            }
            conflicts = self
                .git
                .conflicting_paths()
                .map_err(|e| PipelineError::stage(stage, e))?;
        }
    }

    fn build_commit_message(
        &self,
        descriptor: &GitDescriptor,
        target_local: &str,
    ) -> Result<String, PipelineError> {
        let original = self
            .git
            .message_of(&descriptor.commit_id)
            .map_err(|e| PipelineError::stage("commit-message", e))?;
        Ok(git_merge_message(
            &descriptor.commit_id,
            &descriptor.source_branch,
            target_local,
            &descriptor.created_at.to_rfc3339(),
            &original,
        ))
    }

    // -----------------------------------------------------------------------
    // Decision plumbing
    // -----------------------------------------------------------------------

    async fn recover(
        &self,
        stage: &'static str,
        error: &PipelineError,
        _target_local: &str,
    ) -> Recovery {
        warn!(stage, error = %error, "stage failed, consulting decision handler");
        match self
            .handler
            .decide(&DecisionContext::StageError { stage, error })
        {
            Decision::Retry => Recovery::Retry,
            Decision::RevertAndRetry => Recovery::Reset,
            Decision::Cancel => Recovery::Abort,
            Decision::OpenLocation => {
                self.open_location().await;
                Recovery::Retry
            }
        }
    }

    /// RevertAndRetry: fetch and hard-reset to the remote target tip.
    fn reset(&self, descriptor: &GitDescriptor, target_local: &str) -> Result<(), PipelineError> {
        info!(branch = %target_local, "hard-resetting to remote before retry");
        self.git
            .hard_reset_to_remote(descriptor.routing.target_branch())
            .map_err(|e| PipelineError::stage("reset", e))
    }

    async fn cancel(
        &self,
        descriptor: &mut GitDescriptor,
        stage: &'static str,
    ) -> Result<MergeOutcome, PipelineError> {
        info!(stage, "merge cancelled");
        transition(self.queue, &mut descriptor.entry, Status::Cancelled).await?;
        Ok(MergeOutcome::Cancelled)
    }

    async fn open_location(&self) {
        let opener = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        let result = tokio::process::Command::new(opener)
            .arg(self.git.workdir())
            .spawn();
        if let Err(e) = result {
            warn!(error = %e, "could not open working tree location");
        }
    }
}

/// Local branch names for a descriptor: the last path segment of the source
/// ref (`feature/login` works on a local `login`), and the target ref as-is.
pub fn local_branch_names(descriptor: &GitDescriptor) -> (String, String) {
    let source = descriptor
        .source_branch
        .rsplit('/')
        .next()
        .unwrap_or(&descriptor.source_branch)
        .to_string();
    let target = descriptor.routing.target_branch().to_string();
    (source, target)
}
