//! `git2`-backed implementation of [`GitBackend`].

use std::path::{Path, PathBuf};

use git2::{
    build::CheckoutBuilder, BranchType, Cred, FetchOptions, IndexAddOption, Oid, PushOptions,
    RemoteCallbacks, Repository, ResetType, Signature,
};
use tracing::{debug, info, instrument, warn};

use super::GitBackend;
use crate::errors::GitError;

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
    remote: String,
    token: Option<String>,
    committer_name: String,
    committer_email: String,
}

impl GitClient {
    /// Open an existing clone, or clone `url` into `path` if absent.
    #[instrument(skip(token), fields(path = %path.display()))]
    pub fn open_or_clone(
        url: &str,
        path: &Path,
        remote: &str,
        token: Option<&str>,
    ) -> Result<Self, GitError> {
        let repo = if path.join(".git").exists() || path.join("HEAD").exists() {
            info!("opening existing git repository");
            Repository::open(path)
                .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?
        } else {
            info!(url, "cloning git repository");
            let mut fetch_opts = FetchOptions::new();
            fetch_opts.remote_callbacks(Self::callbacks(token));
            let mut builder = git2::build::RepoBuilder::new();
            builder.fetch_options(fetch_opts);
            builder.clone(url, path)?
        };
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
            remote: remote.to_string(),
            token: token.map(String::from),
            committer_name: "mergeport".into(),
            committer_email: "mergeport@localhost".into(),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn callbacks(token: Option<&str>) -> RemoteCallbacks<'static> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(tok) = token {
            let tok = tok.to_string();
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("x-access-token", &tok)
            });
        }
        callbacks
    }

    fn find_remote_commit(&self, branch: &str) -> Result<git2::Commit<'_>, GitError> {
        let refname = format!("refs/remotes/{}/{}", self.remote, branch);
        self.repo
            .find_reference(&refname)
            .map_err(|_| GitError::RefNotFound(refname.clone()))?
            .peel_to_commit()
            .map_err(GitError::Git2Error)
    }
}

impl GitBackend for GitClient {
    fn workdir(&self) -> &std::path::Path {
        &self.repo_path
    }

    #[instrument(skip(self))]
    fn fetch(&self) -> Result<(), GitError> {
        let mut remote = self.repo.find_remote(&self.remote)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(Self::callbacks(self.token.as_deref()));
        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    #[instrument(skip(self))]
    fn pull(&self, branch: &str) -> Result<(), GitError> {
        self.fetch()?;
        let fetch_commit = self.find_remote_commit(branch)?;
        let head_ref = self.repo.head()?;
        if head_ref.is_branch() {
            let name = head_ref.name().unwrap_or("HEAD").to_string();
            let mut head_ref_mut = self.repo.find_reference(&name)?;
            head_ref_mut.set_target(fetch_commit.id(), "mergeport: fast-forward pull")?;
            self.repo.set_head(&name)?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::new().force()))?;
        }
        info!("pull completed");
        Ok(())
    }

    fn local_branches(&self) -> Result<Vec<String>, GitError> {
        let branches = self.repo.branches(Some(BranchType::Local))?;
        let mut names = Vec::new();
        for branch_result in branches {
            let (branch, _) = branch_result?;
            if let Some(name) = branch.name()? {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    #[instrument(skip(self))]
    fn create_tracking_branch(&self, name: &str, remote_branch: &str) -> Result<(), GitError> {
        let commit = self.find_remote_commit(remote_branch)?;
        let mut branch = self.repo.branch(name, &commit, false)?;
        branch.set_upstream(Some(&format!("{}/{}", self.remote, remote_branch)))?;
        info!(name, remote_branch, "created tracking branch");
        Ok(())
    }

    #[instrument(skip(self))]
    fn checkout_branch(&self, name: &str) -> Result<(), GitError> {
        let refname = format!("refs/heads/{}", name);
        let obj = self
            .repo
            .revparse_single(&refname)
            .map_err(|_| GitError::RefNotFound(refname.clone()))?;
        self.repo.checkout_tree(&obj, Some(CheckoutBuilder::new().safe()))?;
        self.repo.set_head(&refname)?;
        debug!(name, "checked out branch");
        Ok(())
    }

    fn dirty_paths(&self) -> Result<Vec<String>, GitError> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .filter(|e| !e.status().is_empty())
            .filter_map(|e| e.path().map(String::from))
            .collect())
    }

    fn branch_tip(&self, name: &str) -> Result<String, GitError> {
        let branch = self
            .repo
            .find_branch(name, BranchType::Local)
            .map_err(|_| GitError::RefNotFound(name.to_string()))?;
        Ok(branch.get().peel_to_commit()?.id().to_string())
    }

    fn remote_tip(&self, branch: &str) -> Result<String, GitError> {
        Ok(self.find_remote_commit(branch)?.id().to_string())
    }

    #[instrument(skip(self))]
    fn cherry_pick_no_commit(&self, commit_id: &str) -> Result<(), GitError> {
        let oid = Oid::from_str(commit_id).map_err(|_| GitError::RefNotFound(commit_id.into()))?;
        let commit = self
            .repo
            .find_commit(oid)
            .map_err(|_| GitError::RefNotFound(commit_id.into()))?;
        self.repo.cherrypick(&commit, None)?;

        let conflicts = self.conflicting_paths()?;
        if !conflicts.is_empty() {
            warn!(count = conflicts.len(), "cherry-pick produced conflicts");
            return Err(GitError::CherryPickConflict {
                commit: commit_id.to_string(),
                paths: conflicts,
            });
        }
        debug!("cherry-pick applied cleanly");
        Ok(())
    }

    fn conflicting_paths(&self) -> Result<Vec<String>, GitError> {
        let index = self.repo.index()?;
        if !index.has_conflicts() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
            if let Some(entry) = entry {
                paths.push(String::from_utf8_lossy(&entry.path).to_string());
            }
        }
        Ok(paths)
    }

    #[instrument(skip(self, message))]
    fn commit(&self, message: &str) -> Result<String, GitError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;
        let sig = Signature::now(&self.committer_name, &self.committer_email)?;
        let parent = self.repo.head()?.peel_to_commit()?;
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
        // Clear any cherry-pick state so the next run starts clean.
        self.repo.cleanup_state()?;
        info!(sha = %oid, "created commit");
        Ok(oid.to_string())
    }

    #[instrument(skip(self))]
    fn push(&self, branch: &str) -> Result<(), GitError> {
        let mut remote = self.repo.find_remote(&self.remote)?;
        let mut callbacks = Self::callbacks(self.token.as_deref());

        let rejection = std::sync::Arc::new(std::sync::Mutex::new(None::<(String, String)>));
        let rejection_cb = rejection.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                *rejection_cb.lock().unwrap() = Some((refname.to_string(), msg.to_string()));
            }
            Ok(())
        });

        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        remote.push(&[&refspec], Some(&mut push_opts))?;

        if let Some((refname, detail)) = rejection.lock().unwrap().take() {
            return Err(GitError::PushRejected { refname, detail });
        }
        info!(branch, "push completed");
        Ok(())
    }

    fn message_of(&self, commit_id: &str) -> Result<String, GitError> {
        let oid = Oid::from_str(commit_id).map_err(|_| GitError::RefNotFound(commit_id.into()))?;
        let commit = self
            .repo
            .find_commit(oid)
            .map_err(|_| GitError::RefNotFound(commit_id.into()))?;
        Ok(commit.message().unwrap_or("").to_string())
    }

    #[instrument(skip(self))]
    fn hard_reset_to_remote(&self, branch: &str) -> Result<(), GitError> {
        self.fetch()?;
        let commit = self.find_remote_commit(branch)?;
        let obj = commit.as_object();
        self.repo.reset(obj, ResetType::Hard, None)?;
        self.repo.cleanup_state()?;
        info!(branch, "hard reset to remote tip");
        Ok(())
    }
}
