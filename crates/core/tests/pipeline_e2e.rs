//! End-to-end pipeline runs against mock backends and a real filesystem
//! queue.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use mergeport_core::descriptor::{
    FileEntry, GitDescriptor, QueueEntry, Routing, Status, SvnDescriptor,
};
use mergeport_core::errors::{GitError, SvnError};
use mergeport_core::git::GitBackend;
use mergeport_core::lookup::LookupStore;
use mergeport_core::pipeline::git::GitMergePipeline;
use mergeport_core::pipeline::svn::SvnMergePipeline;
use mergeport_core::pipeline::workingcopy::ResolutionSpan;
use mergeport_core::pipeline::{
    Decision, DecisionContext, DecisionHandler, MergeOutcome, NoProgress,
};
use mergeport_core::queue::{FsQueue, QueueFolder, RemoteQueue};
use mergeport_core::resolve::RenameResolver;
use mergeport_core::svn::{SvnBackend, SvnDiffEntry, SvnLogEntry};
use mergeport_core::version::Version;

// ---------------------------------------------------------------------------
// SVN backend mock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct MergeCall {
    source_url: String,
    start_rev: i64,
    end_rev: i64,
    target_rel: Option<String>,
    record_only: bool,
}

struct MockSvn {
    calls: Mutex<Vec<String>>,
    merges: Mutex<Vec<MergeCall>>,
    commit_messages: Mutex<Vec<String>>,
    merge_failures: Mutex<VecDeque<SvnError>>,
    commit_failures: Mutex<VecDeque<SvnError>>,
    conflict_rounds: Mutex<VecDeque<Vec<String>>>,
    diff_entries: Vec<SvnDiffEntry>,
    log_message: String,
    committed_revision: i64,
    create_files_on_update: bool,
}

impl MockSvn {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            merges: Mutex::new(Vec::new()),
            commit_messages: Mutex::new(Vec::new()),
            merge_failures: Mutex::new(VecDeque::new()),
            commit_failures: Mutex::new(VecDeque::new()),
            conflict_rounds: Mutex::new(VecDeque::new()),
            diff_entries: vec![diff_entry("modified", "src/A.java")],
            log_message: "Fix the widget".into(),
            committed_revision: 2042,
            create_files_on_update: true,
        }
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }
}

fn diff_entry(item: &str, path: &str) -> SvnDiffEntry {
    SvnDiffEntry {
        item: item.into(),
        props: "none".into(),
        kind: "file".into(),
        path: path.into(),
    }
}

fn command_failed(stderr: &str) -> SvnError {
    SvnError::CommandFailed {
        exit_code: 1,
        stderr: stderr.into(),
    }
}

#[async_trait]
impl SvnBackend for MockSvn {
    async fn diff_summarize(
        &self,
        _url: &str,
        _start_rev: i64,
        _end_rev: i64,
    ) -> Result<Vec<SvnDiffEntry>, SvnError> {
        self.record("diff_summarize");
        Ok(self.diff_entries.clone())
    }

    async fn log(
        &self,
        _url: &str,
        _start_rev: i64,
        end_rev: i64,
    ) -> Result<Vec<SvnLogEntry>, SvnError> {
        self.record("log");
        Ok(vec![SvnLogEntry {
            revision: end_rev,
            author: "dev".into(),
            date: "2025-02-10T14:31:02Z".into(),
            message: self.log_message.clone(),
        }])
    }

    async fn checkout_empty(&self, _url: &str, wc_path: &Path) -> Result<(), SvnError> {
        self.record("checkout_empty");
        std::fs::create_dir_all(wc_path)?;
        Ok(())
    }

    async fn update_empty(&self, wc_path: &Path, rel_paths: &[String]) -> Result<(), SvnError> {
        self.record("update_empty");
        if !self.create_files_on_update {
            return Ok(());
        }
        for rel in rel_paths {
            let path = wc_path.join(rel);
            let is_file = rel.rsplit('/').next().is_some_and(|seg| seg.contains('.'));
            if is_file {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, b"content")?;
            } else {
                std::fs::create_dir_all(&path)?;
            }
        }
        Ok(())
    }

    async fn update(&self, _wc_path: &Path) -> Result<(), SvnError> {
        self.record("update");
        Ok(())
    }

    async fn merge(
        &self,
        _wc_path: &Path,
        source_url: &str,
        start_rev: i64,
        end_rev: i64,
        target_rel: Option<&str>,
        record_only: bool,
    ) -> Result<(), SvnError> {
        self.record("merge");
        self.merges.lock().unwrap().push(MergeCall {
            source_url: source_url.to_string(),
            start_rev,
            end_rev,
            target_rel: target_rel.map(String::from),
            record_only,
        });
        if let Some(failure) = self.merge_failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        Ok(())
    }

    async fn commit(&self, _wc_path: &Path, message: &str) -> Result<i64, SvnError> {
        self.record("commit");
        if let Some(failure) = self.commit_failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        self.commit_messages.lock().unwrap().push(message.to_string());
        Ok(self.committed_revision)
    }

    async fn conflicts(&self, _wc_path: &Path) -> Result<Vec<String>, SvnError> {
        self.record("conflicts");
        Ok(self
            .conflict_rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Decision handler mock
// ---------------------------------------------------------------------------

/// Pops decisions from a script; falls back to Retry. Records the kind of
/// every context it is consulted for.
struct ScriptedHandler {
    script: Mutex<VecDeque<Decision>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    fn new(script: Vec<Decision>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl DecisionHandler for ScriptedHandler {
    fn decide(&self, context: &DecisionContext<'_>) -> Decision {
        let kind = match context {
            DecisionContext::StageError { stage, .. } => format!("error:{}", stage),
            DecisionContext::Conflicts { .. } => "conflicts".to_string(),
            DecisionContext::MissingFiles { .. } => "missing".to_string(),
        };
        self.seen.lock().unwrap().push(kind);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Decision::Retry)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn svn_descriptor(files: Vec<FileEntry>) -> SvnDescriptor {
    SvnDescriptor {
        repository: "widget".into(),
        host: "svn.example.com".into(),
        created_at: chrono::Utc::now(),
        source_url: "https://svn.example.com/widget/trunk".into(),
        source_branch: "trunk".into(),
        repo_root_url: "https://svn.example.com/widget".into(),
        revision_start: 100,
        revision_end: 101,
        files,
        routing: Routing::new("trunk"),
        entry: QueueEntry::new("merge-001.txt"),
    }
}

fn file(action: char, source: &str, target: &str) -> FileEntry {
    FileEntry {
        action,
        source_path: source.into(),
        target_path: target.into(),
    }
}

async fn queue_with_descriptor(root: &Path, id: &str) -> FsQueue {
    let queue = FsQueue::open(root).unwrap();
    queue
        .put(QueueFolder::Todo, id, b"REVISION_START=100\n")
        .await
        .unwrap();
    queue
}

// ---------------------------------------------------------------------------
// Revision-range pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bulk_merge_end_to_end() {
    let data = tempfile::tempdir().unwrap();
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = queue_with_descriptor(queue_dir.path(), "merge-001.txt").await;

    let svn = MockSvn::new();
    let resolver = RenameResolver::new(None);
    let handler = ScriptedHandler::new(vec![]);
    let mut descriptor = svn_descriptor(vec![file('M', "trunk/src/A.java", "trunk/src/A.java")]);
    let span = ResolutionSpan::new(Version::zero(), None);

    let pipeline = SvnMergePipeline::new(
        &svn, &queue, &resolver, &handler, &NoProgress, data.path(), "",
    );
    let outcome = pipeline.run(&mut descriptor, &span).await.unwrap();
    assert_eq!(
        outcome,
        MergeOutcome::Committed {
            revision: Some(2042),
            commit_id: None,
        }
    );

    // Identical file lists: exactly one bulk merge over the root.
    let merges = svn.merges.lock().unwrap().clone();
    assert_eq!(merges.len(), 1);
    assert_eq!(
        merges[0],
        MergeCall {
            source_url: "https://svn.example.com/widget/trunk".into(),
            start_rev: 99,
            end_rev: 101,
            target_rel: None,
            record_only: false,
        }
    );

    // Synthesized commit message.
    let messages = svn.commit_messages.lock().unwrap().clone();
    assert_eq!(messages, vec!["MP [100:101] trunk -> trunk: Fix the widget"]);

    // Descriptor landed in Done, remotely and in memory.
    assert_eq!(descriptor.entry.status(), Status::Done);
    assert_eq!(
        queue.list(QueueFolder::Done).await.unwrap(),
        vec!["merge-001.txt"]
    );
    assert!(queue.list(QueueFolder::Todo).await.unwrap().is_empty());

    // No decision points were hit, and the scratch copy is gone.
    assert!(handler.seen().is_empty());
    assert!(!data.path().join("scratch/merge-001.txt").exists());
}

#[tokio::test]
async fn test_failed_stage_retries_without_rerunning_earlier_stages() {
    let data = tempfile::tempdir().unwrap();
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = queue_with_descriptor(queue_dir.path(), "merge-001.txt").await;

    let svn = MockSvn::new();
    svn.merge_failures
        .lock()
        .unwrap()
        .push_back(command_failed("svn: E175002: connection refused"));

    let resolver = RenameResolver::new(None);
    let handler = ScriptedHandler::new(vec![Decision::Retry]);
    let mut descriptor = svn_descriptor(vec![file('M', "trunk/src/A.java", "trunk/src/A.java")]);
    let span = ResolutionSpan::new(Version::zero(), None);

    let pipeline = SvnMergePipeline::new(
        &svn, &queue, &resolver, &handler, &NoProgress, data.path(), "",
    );
    let outcome = pipeline.run(&mut descriptor, &span).await.unwrap();
    assert!(matches!(outcome, MergeOutcome::Committed { .. }));

    // The content-merge stage ran twice; everything before and after ran
    // exactly once.
    assert_eq!(svn.count("merge"), 2);
    assert_eq!(svn.count("checkout_empty"), 1);
    assert_eq!(svn.count("diff_summarize"), 1);
    assert_eq!(svn.count("conflicts"), 1);
    assert_eq!(svn.count("commit"), 1);
    assert_eq!(handler.seen(), vec!["error:merge-content"]);
}

#[tokio::test]
async fn test_commit_failures_retry_commit_only() {
    let data = tempfile::tempdir().unwrap();
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = queue_with_descriptor(queue_dir.path(), "merge-001.txt").await;

    let svn = MockSvn::new();
    {
        let mut failures = svn.commit_failures.lock().unwrap();
        failures.push_back(command_failed("svn: E175002: connection refused"));
        failures.push_back(command_failed("svn: E175002: connection refused"));
    }

    let resolver = RenameResolver::new(None);
    let handler = ScriptedHandler::new(vec![Decision::Retry, Decision::Retry]);
    let mut descriptor = svn_descriptor(vec![file('M', "trunk/src/A.java", "trunk/src/A.java")]);
    let span = ResolutionSpan::new(Version::zero(), None);

    let pipeline = SvnMergePipeline::new(
        &svn, &queue, &resolver, &handler, &NoProgress, data.path(), "",
    );
    let outcome = pipeline.run(&mut descriptor, &span).await.unwrap();
    assert!(matches!(outcome, MergeOutcome::Committed { .. }));

    assert_eq!(svn.count("commit"), 3);
    assert_eq!(svn.count("merge"), 1);
    assert_eq!(svn.count("conflicts"), 1);
    assert_eq!(svn.count("log"), 1);
    assert_eq!(handler.seen(), vec!["error:commit", "error:commit"]);
}

#[tokio::test]
async fn test_out_of_date_commit_updates_and_retries_without_prompting() {
    let data = tempfile::tempdir().unwrap();
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = queue_with_descriptor(queue_dir.path(), "merge-001.txt").await;

    let svn = MockSvn::new();
    svn.commit_failures
        .lock()
        .unwrap()
        .push_back(command_failed(
            "svn: E160028: Commit failed: File is out of date",
        ));

    let resolver = RenameResolver::new(None);
    let handler = ScriptedHandler::new(vec![]);
    let mut descriptor = svn_descriptor(vec![file('M', "trunk/src/A.java", "trunk/src/A.java")]);
    let span = ResolutionSpan::new(Version::zero(), None);

    let pipeline = SvnMergePipeline::new(
        &svn, &queue, &resolver, &handler, &NoProgress, data.path(), "",
    );
    let outcome = pipeline.run(&mut descriptor, &span).await.unwrap();
    assert!(matches!(outcome, MergeOutcome::Committed { .. }));

    assert_eq!(svn.count("update"), 1);
    assert_eq!(svn.count("commit"), 2);
    // Handled by failure classification, never by the operator.
    assert!(handler.seen().is_empty());
}

#[tokio::test]
async fn test_renamed_target_takes_per_file_and_record_merges() {
    let data = tempfile::tempdir().unwrap();
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = queue_with_descriptor(queue_dir.path(), "merge-001.txt").await;

    let store = LookupStore::in_memory().unwrap();
    store
        .insert_rename(
            "widget",
            "trunk/src",
            "trunk/newsrc",
            &Version::parse("50").unwrap(),
        )
        .unwrap();
    let resolver = RenameResolver::new(Some(store));

    let svn = MockSvn::new();
    let handler = ScriptedHandler::new(vec![]);
    let mut descriptor = svn_descriptor(vec![file('M', "trunk/src/A.java", "trunk/src/A.java")]);
    let span = ResolutionSpan::new(Version::zero(), Some(Version::parse("60").unwrap()));

    let pipeline = SvnMergePipeline::new(
        &svn, &queue, &resolver, &handler, &NoProgress, data.path(), "",
    );
    let outcome = pipeline.run(&mut descriptor, &span).await.unwrap();
    assert!(matches!(outcome, MergeOutcome::Committed { .. }));

    let merges = svn.merges.lock().unwrap().clone();
    // Diverging paths force a per-file merge into the renamed location.
    assert!(merges.contains(&MergeCall {
        source_url: "https://svn.example.com/widget/trunk/src/A.java".into(),
        start_rev: 99,
        end_rev: 101,
        target_rel: Some("newsrc/A.java".into()),
        record_only: false,
    }));
    // The diverging ancestor pair gets a record-only merge.
    assert!(merges.contains(&MergeCall {
        source_url: "https://svn.example.com/widget/trunk/src".into(),
        start_rev: 99,
        end_rev: 101,
        target_rel: Some("newsrc".into()),
        record_only: true,
    }));
    assert_eq!(descriptor.entry.status(), Status::Done);
}

#[tokio::test]
async fn test_missing_files_cancel_aborts_merge() {
    let data = tempfile::tempdir().unwrap();
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = queue_with_descriptor(queue_dir.path(), "merge-001.txt").await;

    let mut svn = MockSvn::new();
    svn.create_files_on_update = false;

    let resolver = RenameResolver::new(None);
    let handler = ScriptedHandler::new(vec![Decision::Cancel]);
    let mut descriptor = svn_descriptor(vec![file('M', "trunk/src/A.java", "trunk/src/A.java")]);
    let span = ResolutionSpan::new(Version::zero(), None);

    let pipeline = SvnMergePipeline::new(
        &svn, &queue, &resolver, &handler, &NoProgress, data.path(), "",
    );
    let outcome = pipeline.run(&mut descriptor, &span).await.unwrap();
    assert_eq!(outcome, MergeOutcome::Cancelled);

    assert_eq!(handler.seen(), vec!["missing"]);
    assert_eq!(descriptor.entry.status(), Status::Cancelled);
    assert_eq!(
        queue.list(QueueFolder::Cancelled).await.unwrap(),
        vec!["merge-001.txt"]
    );
    assert_eq!(svn.count("merge"), 0);
    assert_eq!(svn.count("commit"), 0);
}

#[tokio::test]
async fn test_conflicts_pause_until_resolved() {
    let data = tempfile::tempdir().unwrap();
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = queue_with_descriptor(queue_dir.path(), "merge-001.txt").await;

    let svn = MockSvn::new();
    {
        let mut rounds = svn.conflict_rounds.lock().unwrap();
        rounds.push_back(vec!["src/A.java".into()]);
        rounds.push_back(vec![]);
    }

    let resolver = RenameResolver::new(None);
    let handler = ScriptedHandler::new(vec![Decision::Retry]);
    let mut descriptor = svn_descriptor(vec![file('M', "trunk/src/A.java", "trunk/src/A.java")]);
    let span = ResolutionSpan::new(Version::zero(), None);

    let pipeline = SvnMergePipeline::new(
        &svn, &queue, &resolver, &handler, &NoProgress, data.path(), "",
    );
    let outcome = pipeline.run(&mut descriptor, &span).await.unwrap();
    assert!(matches!(outcome, MergeOutcome::Committed { .. }));

    assert_eq!(svn.count("conflicts"), 2);
    assert_eq!(handler.seen(), vec!["conflicts"]);
}

// ---------------------------------------------------------------------------
// Git backend mock
// ---------------------------------------------------------------------------

struct MockGit {
    workdir: PathBuf,
    calls: Mutex<Vec<String>>,
    tracked: Mutex<Vec<String>>,
    cherry_pick_conflicts: Mutex<VecDeque<Vec<String>>>,
    conflict_rounds: Mutex<VecDeque<Vec<String>>>,
    commit_messages: Mutex<Vec<String>>,
}

impl MockGit {
    fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            calls: Mutex::new(Vec::new()),
            tracked: Mutex::new(Vec::new()),
            cherry_pick_conflicts: Mutex::new(VecDeque::new()),
            conflict_rounds: Mutex::new(VecDeque::new()),
            commit_messages: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }
}

impl GitBackend for MockGit {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn fetch(&self) -> Result<(), GitError> {
        self.record("fetch");
        Ok(())
    }

    fn pull(&self, _branch: &str) -> Result<(), GitError> {
        self.record("pull");
        Ok(())
    }

    fn local_branches(&self) -> Result<Vec<String>, GitError> {
        Ok(self.tracked.lock().unwrap().clone())
    }

    fn create_tracking_branch(&self, name: &str, _remote_branch: &str) -> Result<(), GitError> {
        self.record("create_tracking_branch");
        self.tracked.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn checkout_branch(&self, _name: &str) -> Result<(), GitError> {
        self.record("checkout_branch");
        Ok(())
    }

    fn dirty_paths(&self) -> Result<Vec<String>, GitError> {
        Ok(Vec::new())
    }

    fn branch_tip(&self, _name: &str) -> Result<String, GitError> {
        Ok("abc123".into())
    }

    fn remote_tip(&self, _branch: &str) -> Result<String, GitError> {
        Ok("abc123".into())
    }

    fn cherry_pick_no_commit(&self, commit_id: &str) -> Result<(), GitError> {
        self.record("cherry_pick");
        if let Some(paths) = self.cherry_pick_conflicts.lock().unwrap().pop_front() {
            return Err(GitError::CherryPickConflict {
                commit: commit_id.to_string(),
                paths,
            });
        }
        Ok(())
    }

    fn conflicting_paths(&self) -> Result<Vec<String>, GitError> {
        self.record("conflicting_paths");
        Ok(self
            .conflict_rounds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    fn commit(&self, message: &str) -> Result<String, GitError> {
        self.record("commit");
        self.commit_messages.lock().unwrap().push(message.to_string());
        Ok("9e8d7c6b5a4938271605f4e3d2c1b0a998877665".into())
    }

    fn push(&self, _branch: &str) -> Result<(), GitError> {
        self.record("push");
        Ok(())
    }

    fn message_of(&self, _commit_id: &str) -> Result<String, GitError> {
        Ok("Add login".into())
    }

    fn hard_reset_to_remote(&self, _branch: &str) -> Result<(), GitError> {
        self.record("hard_reset");
        Ok(())
    }
}

fn git_descriptor() -> GitDescriptor {
    GitDescriptor {
        url: "https://git.example.com/acme/widget.git".into(),
        host: "git.example.com".into(),
        created_at: chrono::Utc::now(),
        commit_id: "3f2a9c1d5e7b0a64883de1f2c3b4a5d6e7f80912".into(),
        source_branch: "feature/login".into(),
        files: vec![file('M', "src/login.rs", "src/login.rs")],
        routing: Routing::new("main"),
        entry: QueueEntry::new("merge-git-001.txt"),
    }
}

// ---------------------------------------------------------------------------
// Commit-hash pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_git_merge_end_to_end() {
    let data = tempfile::tempdir().unwrap();
    let clone = tempfile::tempdir().unwrap();
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = queue_with_descriptor(queue_dir.path(), "merge-git-001.txt").await;

    let git = MockGit::new(clone.path().to_path_buf());
    let handler = ScriptedHandler::new(vec![]);
    let mut descriptor = git_descriptor();

    let pipeline = GitMergePipeline::new(&git, &queue, &handler, &NoProgress, data.path());
    let outcome = pipeline.run(&mut descriptor).await.unwrap();
    assert_eq!(
        outcome,
        MergeOutcome::Committed {
            revision: None,
            commit_id: Some("9e8d7c6b5a4938271605f4e3d2c1b0a998877665".into()),
        }
    );

    // Tracking branches derived from the refs: source last segment, target
    // as-is.
    assert_eq!(
        git.tracked.lock().unwrap().clone(),
        vec!["login".to_string(), "main".to_string()]
    );

    let messages = git.commit_messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("MP 3f2a9c1d feature/login -> main ("));
    assert!(messages[0].ends_with("): Add login"));

    assert_eq!(git.count("push"), 1);
    assert_eq!(descriptor.entry.status(), Status::Done);
    assert_eq!(
        queue.list(QueueFolder::Done).await.unwrap(),
        vec!["merge-git-001.txt"]
    );
}

#[tokio::test]
async fn test_git_conflict_pauses_then_resumes() {
    let data = tempfile::tempdir().unwrap();
    let clone = tempfile::tempdir().unwrap();
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = queue_with_descriptor(queue_dir.path(), "merge-git-001.txt").await;

    let git = MockGit::new(clone.path().to_path_buf());
    git.cherry_pick_conflicts
        .lock()
        .unwrap()
        .push_back(vec!["src/login.rs".into()]);
    // First re-check still conflicted, second clean (operator resolved it).
    {
        let mut rounds = git.conflict_rounds.lock().unwrap();
        rounds.push_back(vec!["src/login.rs".into()]);
        rounds.push_back(vec![]);
    }

    let handler = ScriptedHandler::new(vec![Decision::Retry, Decision::Retry]);
    let mut descriptor = git_descriptor();

    let pipeline = GitMergePipeline::new(&git, &queue, &handler, &NoProgress, data.path());
    let outcome = pipeline.run(&mut descriptor).await.unwrap();
    assert!(matches!(outcome, MergeOutcome::Committed { .. }));

    assert_eq!(handler.seen(), vec!["conflicts", "conflicts"]);
    assert_eq!(git.count("commit"), 1);
    assert_eq!(descriptor.entry.status(), Status::Done);
}

#[tokio::test]
async fn test_git_conflict_cancel_moves_descriptor() {
    let data = tempfile::tempdir().unwrap();
    let clone = tempfile::tempdir().unwrap();
    let queue_dir = tempfile::tempdir().unwrap();
    let queue = queue_with_descriptor(queue_dir.path(), "merge-git-001.txt").await;

    let git = MockGit::new(clone.path().to_path_buf());
    git.cherry_pick_conflicts
        .lock()
        .unwrap()
        .push_back(vec!["src/login.rs".into()]);

    let handler = ScriptedHandler::new(vec![Decision::Cancel]);
    let mut descriptor = git_descriptor();

    let pipeline = GitMergePipeline::new(&git, &queue, &handler, &NoProgress, data.path());
    let outcome = pipeline.run(&mut descriptor).await.unwrap();
    assert_eq!(outcome, MergeOutcome::Cancelled);

    assert_eq!(git.count("commit"), 0);
    assert_eq!(git.count("push"), 0);
    assert_eq!(descriptor.entry.status(), Status::Cancelled);
    assert_eq!(
        queue.list(QueueFolder::Cancelled).await.unwrap(),
        vec!["merge-git-001.txt"]
    );
}
