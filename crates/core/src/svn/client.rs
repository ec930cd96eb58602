//! Asynchronous SVN CLI client.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::parser::{
    parse_committed_revision, parse_conflicted_paths, parse_diff_summarize, parse_log,
    SvnDiffEntry, SvnLogEntry,
};
use super::SvnBackend;
use crate::errors::SvnError;

/// Client driving the `svn` CLI with non-interactive credentials.
#[derive(Debug, Clone)]
pub struct SvnClient {
    username: String,
    password: String,
}

impl SvnClient {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let client = Self {
            username: username.into(),
            password: password.into(),
        };
        info!(username = %client.username, "created SvnClient");
        client
    }

    async fn run_svn(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, SvnError> {
        let mut cmd = Command::new("svn");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.args(args)
            .arg("--non-interactive")
            .arg("--no-auth-cache")
            .arg("--username")
            .arg(&self.username)
            .arg("--password")
            .arg(&self.password)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cmd = ?format!("svn {}", args.join(" ")), "running svn command");
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SvnError::BinaryNotFound("svn".into())
            } else {
                SvnError::IoError(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, "svn command failed");
            return Err(SvnError::CommandFailed { exit_code, stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl SvnBackend for SvnClient {
    #[instrument(skip(self))]
    async fn diff_summarize(
        &self,
        url: &str,
        start_rev: i64,
        end_rev: i64,
    ) -> Result<Vec<SvnDiffEntry>, SvnError> {
        let range = format!("{}:{}", start_rev, end_rev);
        let output = self
            .run_svn(None, &["diff", "--summarize", "--xml", "-r", &range, url])
            .await?;
        parse_diff_summarize(&output)
    }

    #[instrument(skip(self))]
    async fn log(
        &self,
        url: &str,
        start_rev: i64,
        end_rev: i64,
    ) -> Result<Vec<SvnLogEntry>, SvnError> {
        let range = format!("{}:{}", start_rev, end_rev);
        let output = self
            .run_svn(None, &["log", "--xml", "-r", &range, url])
            .await?;
        parse_log(&output)
    }

    #[instrument(skip(self), fields(wc = %wc_path.display()))]
    async fn checkout_empty(&self, url: &str, wc_path: &Path) -> Result<(), SvnError> {
        let wc = wc_path.to_string_lossy().to_string();
        self.run_svn(None, &["checkout", "--depth", "empty", url, &wc])
            .await?;
        info!(url, "zero-depth checkout completed");
        Ok(())
    }

    #[instrument(skip(self, rel_paths), fields(wc = %wc_path.display(), count = rel_paths.len()))]
    async fn update_empty(&self, wc_path: &Path, rel_paths: &[String]) -> Result<(), SvnError> {
        if rel_paths.is_empty() {
            return Ok(());
        }
        let mut args: Vec<&str> = vec!["update", "--parents", "--depth", "empty"];
        for p in rel_paths {
            args.push(p.as_str());
        }
        self.run_svn(Some(wc_path), &args).await?;
        debug!("zero-depth update completed");
        Ok(())
    }

    #[instrument(skip(self), fields(wc = %wc_path.display()))]
    async fn update(&self, wc_path: &Path) -> Result<(), SvnError> {
        self.run_svn(Some(wc_path), &["update"]).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(wc = %wc_path.display()))]
    async fn merge(
        &self,
        wc_path: &Path,
        source_url: &str,
        start_rev: i64,
        end_rev: i64,
        target_rel: Option<&str>,
        record_only: bool,
    ) -> Result<(), SvnError> {
        let range = format!("{}:{}", start_rev, end_rev);
        let mut args: Vec<&str> = vec!["merge", "-r", &range, source_url];
        let target = target_rel.unwrap_or(".");
        args.push(target);
        if record_only {
            args.push("--record-only");
        }
        self.run_svn(Some(wc_path), &args).await?;
        debug!(target, record_only, "merge completed");
        Ok(())
    }

    #[instrument(skip(self, message), fields(wc = %wc_path.display()))]
    async fn commit(&self, wc_path: &Path, message: &str) -> Result<i64, SvnError> {
        let output = self
            .run_svn(Some(wc_path), &["commit", "-m", message])
            .await?;
        let rev = parse_committed_revision(&output).ok_or_else(|| SvnError::CommandFailed {
            exit_code: 0,
            stderr: format!("could not parse committed revision from: {}", output),
        })?;
        info!(rev, "svn commit succeeded");
        Ok(rev)
    }

    #[instrument(skip(self), fields(wc = %wc_path.display()))]
    async fn conflicts(&self, wc_path: &Path) -> Result<Vec<String>, SvnError> {
        let output = self.run_svn(Some(wc_path), &["status"]).await?;
        Ok(parse_conflicted_paths(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction() {
        let client = SvnClient::new("user", "pass");
        assert_eq!(client.username, "user");
    }
}
