//! Parsers for the line-oriented merge descriptor file formats.
//!
//! Both backends use `KEY=value` lines. The SVN format:
//!
//! ```text
//! URL_BRANCH_SOURCE=https://svn.example.com/repo/branches/18.5
//! URL_BRANCH_TARGET=https://svn.example.com/repo/trunk
//! REVISION_START=100
//! REVISION_END=101
//! WORKING_COPY_FILE=M   trunk/src/A.java
//! WORKING_COPY_FILE=A   old/B.java > new/B.java
//! ```
//!
//! The Git format:
//!
//! ```text
//! URL=https://git.example.com/repo.git
//! DATE=2025-02-10 14:31:02
//! COMMID_ID=3f2a9c1d...
//! SOURCE_BRANCH=feature/login
//! TARGET_BRANCH=main
//! WORKING_COPY_FILE=M   src/login.rs
//! ```
//!
//! `COMMID_ID` is the historical key spelling written by the descriptor
//! producers; `COMMIT_ID` is accepted as an alias. Malformed input is a
//! [`DescriptorError`] and is never retried.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use super::{FileEntry, GitDescriptor, MergeDescriptor, QueueEntry, Routing, SvnDescriptor};
use crate::errors::DescriptorError;

/// Parse descriptor bytes fetched from the queue, detecting the backend kind
/// from the keys present.
pub fn parse(id: &str, bytes: &[u8]) -> Result<MergeDescriptor, DescriptorError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DescriptorError::InvalidEncoding(e.to_string()))?;
    if find_value(text, "REVISION_START").is_some() {
        parse_svn(id, text).map(MergeDescriptor::Svn)
    } else if find_value(text, "COMMID_ID").is_some() || find_value(text, "COMMIT_ID").is_some() {
        parse_git(id, text).map(MergeDescriptor::Git)
    } else {
        Err(DescriptorError::MissingKey("REVISION_START"))
    }
}

/// Parse an SVN revision-range descriptor.
pub fn parse_svn(id: &str, text: &str) -> Result<SvnDescriptor, DescriptorError> {
    let source_url = require(text, "URL_BRANCH_SOURCE")?;
    let target_url = require(text, "URL_BRANCH_TARGET")?;
    let revision_start = parse_revision(text, "REVISION_START")?;
    let revision_end = parse_revision(text, "REVISION_END")?;

    if revision_end < revision_start {
        return Err(DescriptorError::InvalidRevision(format!(
            "end revision {} precedes start revision {}",
            revision_end, revision_start
        )));
    }

    let (host, repository, source_branch) = split_branch_url(&source_url)?;
    let (_, target_repo, target_branch) = split_branch_url(&target_url)?;
    if target_repo != repository {
        warn!(
            source = repository,
            target = target_repo,
            "descriptor crosses repositories, using source repository id"
        );
    }

    let repo_root_url = {
        let branch_start = source_url.len() - source_branch.len();
        source_url[..branch_start].trim_end_matches('/').to_string()
    };

    let files = parse_file_entries(text)?;
    let created_at = parse_date(text).unwrap_or_else(Utc::now);

    debug!(id, files = files.len(), "parsed svn descriptor");
    Ok(SvnDescriptor {
        repository,
        host,
        created_at,
        source_url,
        source_branch,
        repo_root_url,
        revision_start,
        revision_end,
        files,
        routing: Routing::new(target_branch),
        entry: QueueEntry::new(id),
    })
}

/// Parse a Git single-commit descriptor.
pub fn parse_git(id: &str, text: &str) -> Result<GitDescriptor, DescriptorError> {
    let url = require(text, "URL")?;
    let commit_id = find_value(text, "COMMID_ID")
        .or_else(|| find_value(text, "COMMIT_ID"))
        .ok_or(DescriptorError::MissingKey("COMMID_ID"))?;
    let source_branch = require(text, "SOURCE_BRANCH")?;
    let target_branch = require(text, "TARGET_BRANCH")?;

    if commit_id.is_empty() || !commit_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DescriptorError::InvalidRevision(format!(
            "commit id '{}' is not a hex hash",
            commit_id
        )));
    }

    let host = host_of(&url);
    let files = parse_file_entries(text)?;
    let created_at = parse_date(text).unwrap_or_else(Utc::now);

    debug!(id, files = files.len(), "parsed git descriptor");
    Ok(GitDescriptor {
        url,
        host,
        created_at,
        commit_id,
        source_branch,
        files,
        routing: Routing::new(target_branch),
        entry: QueueEntry::new(id),
    })
}

// ---------------------------------------------------------------------------
// Line-level helpers
// ---------------------------------------------------------------------------

fn find_value(text: &str, key: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix(key) {
            if let Some(value) = rest.strip_prefix('=') {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn require(text: &str, key: &'static str) -> Result<String, DescriptorError> {
    let value = find_value(text, key).ok_or(DescriptorError::MissingKey(key))?;
    if value.is_empty() {
        return Err(DescriptorError::MissingKey(key));
    }
    Ok(value)
}

fn parse_revision(text: &str, key: &'static str) -> Result<i64, DescriptorError> {
    let raw = require(text, key)?;
    let rev = raw
        .parse::<i64>()
        .map_err(|_| DescriptorError::InvalidRevision(format!("{}={}", key, raw)))?;
    if rev < 1 {
        return Err(DescriptorError::InvalidRevision(format!(
            "{}={} (revisions start at 1)",
            key, rev
        )));
    }
    Ok(rev)
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let raw = find_value(text, "DATE")?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    warn!(%raw, "unparsable DATE value, using current time");
    None
}

/// Parse every `WORKING_COPY_FILE=` line.
///
/// The value is an SVN-status-style one-char action prefix, whitespace, then
/// the path; an optional ` > ` separates old and new paths when the file was
/// renamed in-flight.
fn parse_file_entries(text: &str) -> Result<Vec<FileEntry>, DescriptorError> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        let Some(value) = line
            .strip_prefix("WORKING_COPY_FILE")
            .and_then(|rest| rest.strip_prefix('='))
        else {
            continue;
        };
        entries.push(parse_file_entry(value)?);
    }
    Ok(entries)
}

fn parse_file_entry(value: &str) -> Result<FileEntry, DescriptorError> {
    let mut chars = value.chars();
    let action = chars
        .next()
        .ok_or_else(|| DescriptorError::InvalidFileEntry(value.to_string()))?;
    if !matches!(action, 'A' | 'D' | 'M' | 'R' | 'C' | '!' | '?') {
        return Err(DescriptorError::InvalidFileEntry(value.to_string()));
    }
    let rest = chars.as_str();
    if !rest.starts_with(char::is_whitespace) {
        return Err(DescriptorError::InvalidFileEntry(value.to_string()));
    }
    let paths = rest.trim();
    if paths.is_empty() {
        return Err(DescriptorError::InvalidFileEntry(value.to_string()));
    }

    let (source_path, target_path) = match paths.split_once(" > ") {
        Some((old, new)) => {
            let (old, new) = (old.trim(), new.trim());
            if old.is_empty() || new.is_empty() {
                return Err(DescriptorError::InvalidFileEntry(value.to_string()));
            }
            (old.to_string(), new.to_string())
        }
        None => (paths.to_string(), paths.to_string()),
    };

    Ok(FileEntry {
        action,
        source_path,
        target_path,
    })
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// Split a branch URL into (host, repository id, branch path).
///
/// `https://svn.example.com/repo/branches/18.5` yields
/// `("svn.example.com", "repo", "branches/18.5")`.
fn split_branch_url(url: &str) -> Result<(String, String, String), DescriptorError> {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let mut segments = without_scheme.split('/').filter(|s| !s.is_empty());
    let host = segments
        .next()
        .ok_or_else(|| DescriptorError::InvalidFileEntry(format!("bad branch URL: {}", url)))?;
    let repository = segments
        .next()
        .ok_or_else(|| DescriptorError::InvalidFileEntry(format!("bad branch URL: {}", url)))?;
    let branch: Vec<&str> = segments.collect();
    if branch.is_empty() {
        return Err(DescriptorError::InvalidFileEntry(format!(
            "branch URL has no branch path: {}",
            url
        )));
    }
    Ok((host.to_string(), repository.to_string(), branch.join("/")))
}

fn host_of(url: &str) -> String {
    let without_scheme = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    // Strip user@ prefixes from ssh-style URLs.
    host_port
        .rsplit('@')
        .next()
        .unwrap_or(host_port)
        .to_string()
}
