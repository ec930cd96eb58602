//! Error types for the MergePort core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Svn(#[from] SvnError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// SVN errors
// ---------------------------------------------------------------------------

/// Errors from SVN CLI operations.
#[derive(Debug, Error)]
pub enum SvnError {
    /// The `svn` binary was not found on `$PATH`.
    #[error("svn binary not found: {0}")]
    BinaryNotFound(String),

    /// An `svn` command exited with a non-zero status.
    #[error("svn command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// Could not parse the XML output produced by `svn`.
    #[error("failed to parse svn XML output: {0}")]
    XmlParseError(String),

    /// A diff --summarize item code the classifier does not recognize.
    #[error("unknown svn change kind '{kind}' for path '{path}'")]
    UnknownChangeKind { kind: String, path: String },

    /// A checkout / working-copy operation failed.
    #[error("svn working copy error at '{path}': {detail}")]
    WorkingCopyError { path: String, detail: String },

    /// Generic I/O wrapper.
    #[error("svn I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// The working tree is not clean when it must be.
    #[error("git working tree is dirty at '{0}'")]
    DirtyWorkingTree(String),

    /// The local branch tip does not match the remote target tip.
    #[error("local branch '{branch}' is stale: local {local}, remote {remote}")]
    StaleBranch {
        branch: String,
        local: String,
        remote: String,
    },

    /// Cherry-pick produced conflicts.
    #[error("cherry-pick of {commit} conflicts in {} file(s)", paths.len())]
    CherryPickConflict { commit: String, paths: Vec<String> },

    /// Push was rejected for a ref.
    #[error("git push rejected for ref '{refname}': {detail}")]
    PushRejected { refname: String, detail: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Remote queue errors
// ---------------------------------------------------------------------------

/// Errors from the remote descriptor queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The descriptor was not found in the expected folder.
    #[error("descriptor '{id}' not found in folder {folder}")]
    NotFound { id: String, folder: String },

    /// Moving a descriptor between folders failed.
    #[error("failed to move descriptor '{id}' from {from} to {to}: {detail}")]
    MoveFailed {
        id: String,
        from: String,
        to: String,
        detail: String,
    },

    /// Generic I/O wrapper.
    #[error("queue I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Lookup store errors
// ---------------------------------------------------------------------------

/// Errors from the rename/link lookup store.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Underlying rusqlite error.
    #[error("lookup store error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// The store file does not exist or could not be opened.
    #[error("lookup store unavailable at '{path}': {detail}")]
    Unavailable { path: String, detail: String },
}

// ---------------------------------------------------------------------------
// Descriptor errors
// ---------------------------------------------------------------------------

/// Errors from parsing or validating merge descriptors.
///
/// These are structural failures: the pipeline aborts on them without
/// offering a retry, since retrying cannot fix corrupt input.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// A required key is missing from the descriptor file.
    #[error("descriptor is missing required key '{0}'")]
    MissingKey(&'static str),

    /// A revision field could not be parsed or is out of range.
    #[error("invalid revision in descriptor: {0}")]
    InvalidRevision(String),

    /// A WORKING_COPY_FILE line could not be parsed.
    #[error("unparsable file entry: '{0}'")]
    InvalidFileEntry(String),

    /// The descriptor file is not valid UTF-8 text.
    #[error("descriptor is not valid UTF-8: {0}")]
    InvalidEncoding(String),

    /// Generic I/O wrapper.
    #[error("descriptor I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Version errors
// ---------------------------------------------------------------------------

/// Errors from parsing dotted version identifiers.
#[derive(Debug, Error)]
pub enum VersionError {
    /// A component was not a non-negative integer.
    #[error("invalid version component '{component}' in '{input}'")]
    InvalidComponent { input: String, component: String },

    /// The version string was empty.
    #[error("empty version string")]
    Empty,
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

/// Pipeline-level error carrying a human-readable cause chain.
///
/// Every backend failure inside a stage is wrapped in one of these before it
/// reaches the decision handler, so the handler never sees raw backend error
/// shapes.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage failed with a recoverable backend error.
    #[error("stage '{stage}' failed: {cause}")]
    StageFailed { stage: &'static str, cause: String },

    /// The working copy has unresolved conflicts.
    #[error("working copy has {} unresolved conflict(s)", paths.len())]
    Conflicts { paths: Vec<String> },

    /// Required files were absent from the working copy after population.
    #[error("{} required file(s) missing from the working copy", paths.len())]
    MissingFiles { paths: Vec<String> },

    /// The run was cancelled, either by the operator or by the decision
    /// handler. Not a failure: cleanup still runs.
    #[error("merge cancelled during stage '{stage}'")]
    Cancelled { stage: &'static str },

    /// Structural failure — aborts without a decision prompt.
    #[error("structural failure: {0}")]
    Structural(String),

    /// Queue transition failure after an otherwise successful merge.
    #[error("queue transition failed: {0}")]
    Queue(#[from] QueueError),
}

impl PipelineError {
    /// Wrap a backend error as a stage failure, preserving its display chain.
    pub fn stage(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::StageFailed {
            stage,
            cause: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
