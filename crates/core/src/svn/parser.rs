//! Parsers for SVN XML and plain-text output.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::SvnError;

/// One path from `svn diff --summarize --xml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvnDiffEntry {
    /// Change-kind code from the `item` attribute (added, deleted, ...).
    pub item: String,
    /// Property-change code from the `props` attribute.
    pub props: String,
    /// Node kind (file or dir).
    pub kind: String,
    /// Path, relative to the diffed URL.
    pub path: String,
}

/// One entry from `svn log --xml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvnLogEntry {
    pub revision: i64,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// Parse `svn diff --summarize --xml` output.
pub fn parse_diff_summarize(xml: &str) -> Result<Vec<SvnDiffEntry>, SvnError> {
    let mut entries = Vec::new();
    for fragment in fragments(xml, "<path ", "</path>") {
        let item = attribute(fragment, "item").unwrap_or_default();
        let props = attribute(fragment, "props").unwrap_or_default();
        let kind = attribute(fragment, "kind").unwrap_or_default();
        let path = element_text(fragment);
        if path.is_empty() {
            warn!("skipping diff entry with empty path");
            continue;
        }
        entries.push(SvnDiffEntry {
            item,
            props,
            kind,
            path,
        });
    }
    debug!(count = entries.len(), "parsed svn diff entries");
    Ok(entries)
}

/// Parse `svn log --xml` output.
pub fn parse_log(xml: &str) -> Result<Vec<SvnLogEntry>, SvnError> {
    let mut entries = Vec::new();
    for fragment in fragments(xml, "<logentry", "</logentry>") {
        let revision = match attribute(fragment, "revision").and_then(|s| s.parse::<i64>().ok()) {
            Some(rev) => rev,
            None => {
                warn!("skipping log entry with missing revision attribute");
                continue;
            }
        };
        entries.push(SvnLogEntry {
            revision,
            author: tag_content(fragment, "author").unwrap_or_default(),
            date: tag_content(fragment, "date").unwrap_or_default(),
            message: tag_content(fragment, "msg").unwrap_or_default(),
        });
    }
    debug!(count = entries.len(), "parsed svn log entries");
    Ok(entries)
}

/// Extract the committed revision from `svn commit` output
/// (`Committed revision 42.`).
pub fn parse_committed_revision(output: &str) -> Option<i64> {
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Committed revision") {
            return rest.trim().trim_end_matches('.').parse::<i64>().ok();
        }
    }
    None
}

/// Conflicted paths from `svn status` output: lines whose first or second
/// status column is `C`, plus tree conflicts flagged with `C` in column 7.
pub fn parse_conflicted_paths(status_output: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in status_output.lines() {
        let bytes = line.as_bytes();
        if bytes.len() < 8 {
            continue;
        }
        let conflicted =
            bytes[0] == b'C' || bytes[1] == b'C' || bytes.get(6).copied() == Some(b'C');
        if conflicted {
            paths.push(line[8..].trim().to_string());
        }
    }
    paths
}

// ---------------------------------------------------------------------------
// Minimal XML scanning helpers
// ---------------------------------------------------------------------------

fn fragments<'a>(xml: &'a str, open: &'a str, close: &'a str) -> impl Iterator<Item = &'a str> {
    xml.split(open).skip(1).filter_map(move |part| {
        part.find(close).map(|pos| &part[..pos])
    })
}

fn attribute(fragment: &str, attr: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!("{}={}", attr, quote);
        if let Some(pos) = fragment.find(&pattern) {
            let after = &fragment[pos + pattern.len()..];
            let end = after.find(quote)?;
            return Some(after[..end].to_string());
        }
    }
    None
}

/// Text after the fragment's own `>` (the element body).
fn element_text(fragment: &str) -> String {
    match fragment.find('>') {
        Some(pos) => xml_unescape(fragment[pos + 1..].trim()),
        None => String::new(),
    }
}

fn tag_content(fragment: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    while let Some(rel_pos) = fragment[search_from..].find(&open) {
        let start = search_from + rel_pos;
        let after_open = &fragment[start + open.len()..];
        // The next char must close the tag or start attributes; otherwise we
        // matched a longer tag name with the same prefix.
        match after_open.chars().next() {
            Some(c) if c == '>' || c.is_ascii_whitespace() => {}
            _ => {
                search_from = start + open.len();
                continue;
            }
        }
        let body_start = after_open.find('>')? + 1;
        let body = &after_open[body_start..];
        let end = body.find(&close)?;
        return Some(xml_unescape(body[..end].trim()));
    }
    None
}

fn xml_unescape(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}
