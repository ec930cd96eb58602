//! Revision-range merge pipeline (SVN backend).
//!
//! Stages run in strict order; each is wrapped in a decision point, and a
//! retried stage never re-runs earlier stages. Cooperative cancellation is
//! checked between stages and permanently refused once the commit begins.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use super::workingcopy::{wc_relative, EnsureOutcome, ResolutionSpan, WorkingCopyBuilder};
use super::{
    classify_commit_failure, svn_merge_message, CommitFailure, Decision, DecisionContext,
    DecisionHandler, MergeOutcome, ProgressMonitor, ScratchGuard,
};
use crate::descriptor::{Status, SvnDescriptor};
use crate::errors::{PipelineError, SvnError};
use crate::queue::{transition, RemoteQueue};
use crate::resolve::RenameResolver;
use crate::svn::classifier::{classify, merge_sets, MergeSets};
use crate::svn::SvnBackend;

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The revision-range merge pipeline. One instance runs one descriptor at a
/// time; the working copy for the descriptor's target branch is owned
/// exclusively for the duration of the run.
pub struct SvnMergePipeline<'a> {
    svn: &'a dyn SvnBackend,
    queue: &'a dyn RemoteQueue,
    resolver: &'a RenameResolver,
    handler: &'a dyn DecisionHandler,
    monitor: &'a dyn ProgressMonitor,
    data_dir: PathBuf,
    interfering_process: String,
}

/// How a failed stage proceeds, after consulting the decision handler.
enum Recovery {
    Retry,
    Rebuild,
    Abort,
}

/// Outcome of the conflict gate.
enum ConflictGate {
    Clear,
    Cancelled,
}

impl<'a> SvnMergePipeline<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        svn: &'a dyn SvnBackend,
        queue: &'a dyn RemoteQueue,
        resolver: &'a RenameResolver,
        handler: &'a dyn DecisionHandler,
        monitor: &'a dyn ProgressMonitor,
        data_dir: impl Into<PathBuf>,
        interfering_process: impl Into<String>,
    ) -> Self {
        Self {
            svn,
            queue,
            resolver,
            handler,
            monitor,
            data_dir: data_dir.into(),
            interfering_process: interfering_process.into(),
        }
    }

    /// Run the full pipeline for one descriptor.
    #[instrument(skip(self, descriptor, span), fields(id = %descriptor.entry.id))]
    pub async fn run(
        &self,
        descriptor: &mut SvnDescriptor,
        span: &ResolutionSpan,
    ) -> Result<MergeOutcome, PipelineError> {
        let wc_path = self.working_copy_path(descriptor);

        // Stage 1: fetch the descriptor to a local scratch file. The guard
        // deletes it on every exit path.
        let _scratch = loop {
            match self.fetch_scratch(descriptor).await {
                Ok(guard) => break guard,
                Err(e) => match self.recover("fetch-descriptor", &e, &wc_path).await {
                    Recovery::Abort => return self.cancel(descriptor, "fetch-descriptor").await,
                    _ => continue,
                },
            }
        };
        if self.monitor.cancel_requested() {
            return self.cancel(descriptor, "fetch-descriptor").await;
        }

        // Stage 2: build the working copy. A missing-file cancel aborts
        // without further prompts; continuing proceeds without those files.
        let builder = WorkingCopyBuilder::new(self.svn, self.resolver, &self.interfering_process);
        loop {
            match builder.ensure(descriptor, &wc_path, span).await {
                Ok(EnsureOutcome::Ready) => break,
                Ok(EnsureOutcome::MissingFiles(paths)) => {
                    let decision = self
                        .handler
                        .decide(&DecisionContext::MissingFiles { paths: &paths });
                    match decision {
                        Decision::Cancel => {
                            return self.cancel(descriptor, "build-working-copy").await
                        }
                        Decision::RevertAndRetry => continue,
                        // Continue the merge without the absent files.
                        Decision::Retry | Decision::OpenLocation => break,
                    }
                }
                Err(e) => {
                    let wrapped = PipelineError::stage("build-working-copy", e);
                    match self.recover("build-working-copy", &wrapped, &wc_path).await {
                        Recovery::Abort => {
                            return self.cancel(descriptor, "build-working-copy").await
                        }
                        _ => continue,
                    }
                }
            }
        }
        if self.monitor.cancel_requested() {
            return self.cancel(descriptor, "build-working-copy").await;
        }

        // Stage 3: content merges.
        let merged_pairs = loop {
            match self.merge_content(descriptor, &wc_path, span).await {
                Ok(pairs) => break pairs,
                Err(e @ PipelineError::Structural(_)) => return Err(e),
                Err(e) => match self.recover("merge-content", &e, &wc_path).await {
                    Recovery::Retry => {}
                    Recovery::Rebuild => self.rebuild(descriptor, &wc_path, span).await?,
                    Recovery::Abort => return self.cancel(descriptor, "merge-content").await,
                },
            }
        };
        if self.monitor.cancel_requested() {
            return self.cancel(descriptor, "merge-content").await;
        }

        // Stage 4: classify the source diff, then record-only merges for
        // property-only changes.
        let (sets, changed_paths) = loop {
            match self.merge_properties(descriptor, &wc_path, span).await {
                Ok(out) => break out,
                Err(e @ PipelineError::Structural(_)) => return Err(e),
                Err(e) => match self.recover("merge-properties", &e, &wc_path).await {
                    Recovery::Retry => {}
                    Recovery::Rebuild => self.rebuild(descriptor, &wc_path, span).await?,
                    Recovery::Abort => return self.cancel(descriptor, "merge-properties").await,
                },
            }
        };
        debug!(
            content = sets.content.len(),
            properties = sets.properties.len(),
            "source diff classified"
        );
        if self.monitor.cancel_requested() {
            return self.cancel(descriptor, "merge-properties").await;
        }

        // Stage 5: merge-record reconciliation for diverging ancestors.
        loop {
            match self
                .reconcile_merge_records(descriptor, &wc_path, span, &merged_pairs, &changed_paths)
                .await
            {
                Ok(()) => break,
                Err(e) => match self.recover("record-merges", &e, &wc_path).await {
                    Recovery::Retry => {}
                    Recovery::Rebuild => self.rebuild(descriptor, &wc_path, span).await?,
                    Recovery::Abort => return self.cancel(descriptor, "record-merges").await,
                },
            }
        }
        if self.monitor.cancel_requested() {
            return self.cancel(descriptor, "record-merges").await;
        }

        // Stage 6: rewrite package declarations in moved, newly-added files.
        loop {
            match self.fix_moved_packages(descriptor, &wc_path, span).await {
                Ok(()) => break,
                Err(e) => match self.recover("fix-packages", &e, &wc_path).await {
                    Recovery::Retry => {}
                    Recovery::Rebuild => self.rebuild(descriptor, &wc_path, span).await?,
                    Recovery::Abort => return self.cancel(descriptor, "fix-packages").await,
                },
            }
        }
        if self.monitor.cancel_requested() {
            return self.cancel(descriptor, "fix-packages").await;
        }

        // Stage 7: committability check.
        match self.conflict_gate(descriptor, &wc_path, span).await? {
            ConflictGate::Clear => {}
            ConflictGate::Cancelled => return Ok(MergeOutcome::Cancelled),
        }
        if self.monitor.cancel_requested() {
            return self.cancel(descriptor, "conflict-check").await;
        }

        // Stage 8: commit. Cancellation is refused from here on.
        let message = loop {
            match self.build_commit_message(descriptor).await {
                Ok(message) => break message,
                Err(e) => match self.recover("commit-message", &e, &wc_path).await {
                    Recovery::Retry => {}
                    Recovery::Rebuild => self.rebuild(descriptor, &wc_path, span).await?,
                    Recovery::Abort => return self.cancel(descriptor, "commit-message").await,
                },
            }
        };
        self.monitor.commit_started();
        let revision = loop {
            match self.svn.commit(&wc_path, &message).await {
                Ok(rev) => break rev,
                Err(e) => match classify_commit_failure(&e.to_string()) {
                    CommitFailure::NeedsUpdate => {
                        info!("working copy out of date, updating before commit retry");
                        if let Err(e) = self.svn.update(&wc_path).await {
                            let wrapped = PipelineError::stage("commit", e);
                            if let Recovery::Abort =
                                self.recover("commit", &wrapped, &wc_path).await
                            {
                                return self.cancel(descriptor, "commit").await;
                            }
                        }
                    }
                    CommitFailure::Conflict => {
                        match self.conflict_gate(descriptor, &wc_path, span).await? {
                            ConflictGate::Clear => {}
                            ConflictGate::Cancelled => return Ok(MergeOutcome::Cancelled),
                        }
                    }
                    CommitFailure::Other => {
                        let wrapped = PipelineError::stage("commit", e);
                        match self.recover("commit", &wrapped, &wc_path).await {
                            Recovery::Retry => {}
                            Recovery::Rebuild => self.rebuild(descriptor, &wc_path, span).await?,
                            Recovery::Abort => return self.cancel(descriptor, "commit").await,
                        }
                    }
                },
            }
        };
        info!(revision, "merge committed");

        // Stage 9: mark the descriptor Done. The remote move happens first;
        // a failure here leaves the descriptor Pending and retryable.
        transition(self.queue, &mut descriptor.entry, Status::Done).await?;
        Ok(MergeOutcome::Committed {
            revision: Some(revision),
            commit_id: None,
        })
    }

    // -----------------------------------------------------------------------
    // Stage bodies
    // -----------------------------------------------------------------------

    fn working_copy_path(&self, descriptor: &SvnDescriptor) -> PathBuf {
        self.data_dir
            .join("wc")
            .join(&descriptor.repository)
            .join(descriptor.routing.target_branch().replace('/', "_"))
    }

    async fn fetch_scratch(
        &self,
        descriptor: &SvnDescriptor,
    ) -> Result<ScratchGuard, PipelineError> {
        super::fetch_scratch(
            self.queue,
            descriptor.entry.location(),
            &descriptor.entry.id,
            &self.data_dir,
        )
        .await
    }

    /// Merge the content changes into the working copy. Returns the
    /// (source path, resolved target path) pairs that were merged, for the
    /// record reconciliation stage.
    async fn merge_content(
        &self,
        descriptor: &SvnDescriptor,
        wc_path: &Path,
        span: &ResolutionSpan,
    ) -> Result<Vec<(String, String)>, PipelineError> {
        let stage = "merge-content";
        let branch = descriptor.routing.target_branch();
        let pairs: Vec<(String, String)> = descriptor
            .files
            .iter()
            .filter(|f| !f.is_delete())
            .map(|f| {
                let resolved = span.translate(self.resolver, &descriptor.repository, &f.target_path);
                (f.source_path.clone(), resolved)
            })
            .collect();

        let bulk = pairs.iter().all(|(src, tgt)| src == tgt);
        if bulk {
            self.svn
                .merge(
                    wc_path,
                    &descriptor.source_url,
                    descriptor.revision_start - 1,
                    descriptor.revision_end,
                    None,
                    false,
                )
                .await
                .map_err(|e| PipelineError::stage(stage, e))?;
            info!("bulk content merge applied");
            return Ok(pairs);
        }

        for (src, tgt) in &pairs {
            let Some(rel) = wc_relative(tgt, branch) else {
                warn!(path = %tgt, "target path outside branch, skipping merge");
                continue;
            };
            let src_url = format!("{}/{}", descriptor.repo_root_url, src);
            self.svn
                .merge(
                    wc_path,
                    &src_url,
                    descriptor.revision_start - 1,
                    descriptor.revision_end,
                    Some(&rel),
                    false,
                )
                .await
                .map_err(|e| PipelineError::stage(stage, e))?;
        }
        info!(count = pairs.len(), "per-file content merges applied");
        Ok(pairs)
    }

    /// Classify the source diff and record-merge the property-only changes.
    /// Returns the classified sets and the repo-relative changed paths.
    async fn merge_properties(
        &self,
        descriptor: &SvnDescriptor,
        wc_path: &Path,
        span: &ResolutionSpan,
    ) -> Result<(MergeSets, Vec<String>), PipelineError> {
        let stage = "merge-properties";
        let raw = self
            .svn
            .diff_summarize(
                &descriptor.source_url,
                descriptor.revision_start - 1,
                descriptor.revision_end,
            )
            .await
            .map_err(|e| PipelineError::stage(stage, e))?;
        let entries = classify(&raw).map_err(|e| match e {
            // Unknown change kinds are structural: no retry can fix them.
            e @ SvnError::UnknownChangeKind { .. } => PipelineError::Structural(e.to_string()),
            other => PipelineError::stage(stage, other),
        })?;
        let sets = merge_sets(&entries);
        let changed: Vec<String> = entries
            .iter()
            .map(|e| format!("{}/{}", descriptor.source_branch, e.path))
            .collect();

        let branch = descriptor.routing.target_branch();
        for path in &sets.properties {
            let source_repo_rel = format!("{}/{}", descriptor.source_branch, path);
            let resolved = span.translate(self.resolver, &descriptor.repository, &source_repo_rel);
            let Some(rel) = wc_relative(&resolved, branch) else {
                continue;
            };
            if !wc_path.join(&rel).exists() {
                debug!(path = %rel, "property target absent locally, skipped");
                continue;
            }
            let src_url = format!("{}/{}", descriptor.source_url, path);
            self.svn
                .merge(
                    wc_path,
                    &src_url,
                    descriptor.revision_start - 1,
                    descriptor.revision_end,
                    Some(&rel),
                    true,
                )
                .await
                .map_err(|e| PipelineError::stage(stage, e))?;
        }
        Ok((sets, changed))
    }

    /// Record-only merges for ancestor directories whose path segments
    /// diverge between source and target of a content-merged pair.
    async fn reconcile_merge_records(
        &self,
        descriptor: &SvnDescriptor,
        wc_path: &Path,
        span: &ResolutionSpan,
        merged: &[(String, String)],
        changed: &[String],
    ) -> Result<(), PipelineError> {
        let stage = "record-merges";
        let branch = descriptor.routing.target_branch();

        let mut pairs: Vec<(String, String)> = Vec::new();
        for (src, tgt) in merged {
            for pair in record_merge_pairs(src, tgt) {
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
            extend_with_prefix_ancestors(&mut pairs, src, changed, |p| {
                span.translate(self.resolver, &descriptor.repository, p)
            });
        }

        for (src_anc, tgt_anc) in pairs {
            if src_anc == tgt_anc {
                continue;
            }
            if merged.iter().any(|(s, t)| *s == src_anc && *t == tgt_anc) {
                continue;
            }
            let Some(rel) = wc_relative(&tgt_anc, branch) else {
                continue;
            };
            self.svn
                .update_empty(wc_path, &[rel.clone()])
                .await
                .map_err(|e| PipelineError::stage(stage, e))?;
            let src_url = format!("{}/{}", descriptor.repo_root_url, src_anc);
            self.svn
                .merge(
                    wc_path,
                    &src_url,
                    descriptor.revision_start - 1,
                    descriptor.revision_end,
                    Some(&rel),
                    true,
                )
                .await
                .map_err(|e| PipelineError::stage(stage, e))?;
            debug!(source = %src_anc, target = %tgt_anc, "record-merged ancestor pair");
        }
        Ok(())
    }

    /// Rewrite the `package ...;` header of newly-added files whose resolved
    /// target location differs from their source location.
    async fn fix_moved_packages(
        &self,
        descriptor: &SvnDescriptor,
        wc_path: &Path,
        span: &ResolutionSpan,
    ) -> Result<(), PipelineError> {
        let stage = "fix-packages";
        let branch = descriptor.routing.target_branch();
        for file in descriptor.files.iter().filter(|f| f.is_add()) {
            let resolved = span.translate(self.resolver, &descriptor.repository, &file.target_path);
            if file.source_path == resolved {
                continue;
            }
            let Some(rel) = wc_relative(&resolved, branch) else {
                continue;
            };
            let path = wc_path.join(&rel);
            if !path.exists() {
                continue;
            }
            // Binary or non-UTF-8 files have no package header to fix.
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            if let Some(updated) = fix_package_declaration(&content, &resolved) {
                tokio::fs::write(&path, updated)
                    .await
                    .map_err(|e| PipelineError::stage(stage, e))?;
                info!(path = %rel, "rewrote package declaration");
            }
        }
        Ok(())
    }

    /// Loop until the working copy has no conflicts or the operator cancels.
    async fn conflict_gate(
        &self,
        descriptor: &mut SvnDescriptor,
        wc_path: &Path,
        span: &ResolutionSpan,
    ) -> Result<ConflictGate, PipelineError> {
        let stage = "conflict-check";
        loop {
            let conflicts = match self.svn.conflicts(wc_path).await {
                Ok(paths) => paths,
                Err(e) => {
                    let wrapped = PipelineError::stage(stage, e);
                    match self.recover(stage, &wrapped, wc_path).await {
                        Recovery::Retry => continue,
                        Recovery::Rebuild => {
                            self.rebuild(descriptor, wc_path, span).await?;
                            continue;
                        }
                        Recovery::Abort => {
                            self.cancel(descriptor, stage).await?;
                            return Ok(ConflictGate::Cancelled);
                        }
                    }
                }
            };
            if conflicts.is_empty() {
                return Ok(ConflictGate::Clear);
            }
            warn!(count = conflicts.len(), "working copy has conflicts");
            let decision = self.handler.decide(&DecisionContext::Conflicts {
                paths: &conflicts,
                location: wc_path,
            });
            match decision {
                Decision::Retry => {}
                Decision::OpenLocation => self.open_location(wc_path).await,
                Decision::RevertAndRetry => self.rebuild(descriptor, wc_path, span).await?,
                Decision::Cancel => {
                    self.cancel(descriptor, stage).await?;
                    return Ok(ConflictGate::Cancelled);
                }
            }
        }
    }

    /// The synthesized commit message: pipeline header plus the original
    /// message of the range's last source revision.
    async fn build_commit_message(
        &self,
        descriptor: &SvnDescriptor,
    ) -> Result<String, PipelineError> {
        let entries = self
            .svn
            .log(
                &descriptor.source_url,
                descriptor.revision_end,
                descriptor.revision_end,
            )
            .await
            .map_err(|e| PipelineError::stage("commit-message", e))?;
        let original = entries
            .last()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        Ok(svn_merge_message(
            descriptor.revision_start,
            descriptor.revision_end,
            &descriptor.source_branch,
            descriptor.routing.target_branch(),
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
        wc_path: &Path,
    ) -> Recovery {
        warn!(stage, error = %error, "stage failed, consulting decision handler");
        match self
            .handler
            .decide(&DecisionContext::StageError { stage, error })
        {
            Decision::Retry => Recovery::Retry,
            Decision::RevertAndRetry => Recovery::Rebuild,
            Decision::Cancel => Recovery::Abort,
            Decision::OpenLocation => {
                self.open_location(wc_path).await;
                Recovery::Retry
            }
        }
    }

    /// RevertAndRetry: delete and rebuild the working copy, then let the
    /// caller retry its stage.
    async fn rebuild(
        &self,
        descriptor: &SvnDescriptor,
        wc_path: &Path,
        span: &ResolutionSpan,
    ) -> Result<(), PipelineError> {
        info!("rebuilding working copy before retry");
        let builder = WorkingCopyBuilder::new(self.svn, self.resolver, &self.interfering_process);
        builder
            .ensure(descriptor, wc_path, span)
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::stage("rebuild-working-copy", e))
    }

    async fn cancel(
        &self,
        descriptor: &mut SvnDescriptor,
        stage: &'static str,
    ) -> Result<MergeOutcome, PipelineError> {
        info!(stage, "merge cancelled");
        transition(self.queue, &mut descriptor.entry, Status::Cancelled).await?;
        Ok(MergeOutcome::Cancelled)
    }

    /// Best-effort: open the working copy in the platform file manager.
    async fn open_location(&self, wc_path: &Path) {
        let opener = if cfg!(target_os = "macos") {
            "open"
        } else {
            "xdg-open"
        };
        let result = tokio::process::Command::new(opener)
            .arg(wc_path)
            .spawn();
        if let Err(e) = result {
            warn!(error = %e, "could not open working copy location");
        }
    }
}

// ---------------------------------------------------------------------------
// Record-merge pair computation
// ---------------------------------------------------------------------------

/// Ancestor-directory pairs needing a record-only merge because a content
/// merge touched a descendant whose path segments diverge between source
/// and target.
///
/// Walks both parent chains in lock-step from the merged pair, collecting
/// pairs until either chain ends or the chains converge. The merged leaf
/// itself is not included (its merge already carries the record).
pub fn record_merge_pairs(from: &str, to: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if from == to {
        return pairs;
    }
    let mut f = parent_of(from);
    let mut t = parent_of(to);
    while !f.is_empty() && !t.is_empty() && f != t {
        pairs.push((f.clone(), t.clone()));
        f = parent_of(&f);
        t = parent_of(&t);
    }
    pairs
}

/// Continue past the lock-step walk: any remaining source ancestor that is
/// a path prefix of a changed path also gets a pair, translated to its
/// target-side location.
///
/// This reproduces the historical behavior and is known to over-produce
/// pairs for wide diffs; the extra record-only merges are harmless no-ops.
pub fn extend_with_prefix_ancestors(
    pairs: &mut Vec<(String, String)>,
    from: &str,
    changed: &[String],
    mut translate: impl FnMut(&str) -> String,
) {
    let mut ancestor = parent_of(from);
    while !ancestor.is_empty() {
        let already = pairs.iter().any(|(s, _)| *s == ancestor);
        if !already && changed.iter().any(|c| is_path_prefix(&ancestor, c)) {
            let target = translate(&ancestor);
            if target != ancestor {
                pairs.push((ancestor.clone(), target));
            }
        }
        ancestor = parent_of(&ancestor);
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(pos) => path[..pos].to_string(),
        None => String::new(),
    }
}

/// True when `prefix` is `path` itself or a path-component prefix of it.
fn is_path_prefix(prefix: &str, path: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

// ---------------------------------------------------------------------------
// Package declaration rewriting
// ---------------------------------------------------------------------------

/// Rewrite the first `package ...;` line of `content` to match the logical
/// location derived from `target_path`. Returns `None` when there is no
/// package line, no recognizable source root in the path, or the
/// declaration already matches.
pub fn fix_package_declaration(content: &str, target_path: &str) -> Option<String> {
    let package = package_from_path(target_path)?;
    let pattern = regex_lite::Regex::new(r"(?m)^package\s+[A-Za-z_][A-Za-z0-9_.]*\s*;")
        .expect("package pattern is valid");
    let found = pattern.find(content)?;
    let replacement = format!("package {};", package);
    if &content[found.range()] == replacement.as_str() {
        return None;
    }
    let mut updated = String::with_capacity(content.len());
    updated.push_str(&content[..found.start()]);
    updated.push_str(&replacement);
    updated.push_str(&content[found.end()..]);
    Some(updated)
}

/// Logical package of a file path: the directory components after the last
/// recognized source-root segment, joined with dots.
fn package_from_path(path: &str) -> Option<String> {
    let components: Vec<&str> = path.split('/').collect();
    let dirs = components.split_last().map(|(_, dirs)| dirs)?;
    let root = dirs
        .iter()
        .rposition(|c| matches!(*c, "src" | "java" | "source"))?;
    let package = &dirs[root + 1..];
    if package.is_empty() {
        None
    } else {
        Some(package.join("."))
    }
}
