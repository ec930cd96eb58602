//! Diff classification and merge-set derivation.
//!
//! Raw `svn diff --summarize` entries are mapped onto a uniform five-value
//! action enum; downstream pipeline stages branch on the action, so an
//! unrecognized backend code is a hard error rather than a silent skip.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::parser::SvnDiffEntry;
use crate::errors::SvnError;

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Uniform change-kind classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    Added,
    Deleted,
    Modified,
    Replaced,
    PropertyChanged,
}

/// One classified change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub action: DiffAction,
    pub path: String,
}

/// Map raw diff entries onto [`DiffEntry`] values.
///
/// Entries whose content is unchanged (`item="none"`) but whose properties
/// changed become `PropertyChanged`; entries with neither are dropped. Any
/// other unknown item code fails classification.
pub fn classify(raw: &[SvnDiffEntry]) -> Result<Vec<DiffEntry>, SvnError> {
    let mut entries = Vec::new();
    for entry in raw {
        let action = match entry.item.as_str() {
            "added" => DiffAction::Added,
            "deleted" => DiffAction::Deleted,
            "modified" => DiffAction::Modified,
            "replaced" => DiffAction::Replaced,
            "none" => {
                if entry.props != "none" && !entry.props.is_empty() {
                    DiffAction::PropertyChanged
                } else {
                    continue;
                }
            }
            other => {
                return Err(SvnError::UnknownChangeKind {
                    kind: other.to_string(),
                    path: entry.path.clone(),
                });
            }
        };
        entries.push(DiffEntry {
            action,
            path: entry.path.clone(),
        });
    }
    debug!(count = entries.len(), "classified diff entries");
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Derived merge sets
// ---------------------------------------------------------------------------

/// The two path sets a merge operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSets {
    /// Paths requiring a content merge. Never contains a path that is a
    /// strict descendant of another member.
    pub content: Vec<String>,
    /// Paths whose only classified action is a property change.
    pub properties: Vec<String>,
}

/// Compute the content-change and property-change sets from classified
/// entries.
///
/// Content set membership:
/// - Added/Replaced: the parent directory (the file itself does not yet
///   exist in the target, its container must).
/// - Modified: the path itself.
/// - Deleted: the parent directory, unless an ancestor of the path is also
///   deleted in the same diff (the ancestor's removal covers it).
///
/// The set is then pruned of members that are strict descendants of other
/// members, since merging the ancestor transitively covers them.
pub fn merge_sets(entries: &[DiffEntry]) -> MergeSets {
    let deleted: HashSet<&str> = entries
        .iter()
        .filter(|e| e.action == DiffAction::Deleted)
        .map(|e| e.path.as_str())
        .collect();

    let mut content: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push_content = |path: String, seen: &mut HashSet<String>, out: &mut Vec<String>| {
        if seen.insert(path.clone()) {
            out.push(path);
        }
    };

    for entry in entries {
        match entry.action {
            DiffAction::Added | DiffAction::Replaced => {
                push_content(parent_of(&entry.path), &mut seen, &mut content);
            }
            DiffAction::Modified => {
                push_content(entry.path.clone(), &mut seen, &mut content);
            }
            DiffAction::Deleted => {
                if !has_deleted_ancestor(&entry.path, &deleted) {
                    push_content(parent_of(&entry.path), &mut seen, &mut content);
                }
            }
            DiffAction::PropertyChanged => {}
        }
    }

    let content = prune_descendants(content);

    let content_paths: HashSet<&str> = entries
        .iter()
        .filter(|e| e.action != DiffAction::PropertyChanged)
        .map(|e| e.path.as_str())
        .collect();
    let mut properties: Vec<String> = Vec::new();
    let mut prop_seen: HashSet<&str> = HashSet::new();
    for entry in entries {
        if entry.action == DiffAction::PropertyChanged
            && !content_paths.contains(entry.path.as_str())
            && prop_seen.insert(entry.path.as_str())
        {
            properties.push(entry.path.clone());
        }
    }

    MergeSets {
        content,
        properties,
    }
}

/// Parent directory of a path; the empty string denotes the diff root.
fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(pos) => path[..pos].to_string(),
        None => String::new(),
    }
}

fn has_deleted_ancestor(path: &str, deleted: &HashSet<&str>) -> bool {
    let mut rest = path;
    while let Some(pos) = rest.rfind('/') {
        rest = &rest[..pos];
        if deleted.contains(rest) {
            return true;
        }
    }
    false
}

/// True when `candidate` is a strict descendant of `ancestor`.
pub fn is_strict_descendant(candidate: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return !candidate.is_empty();
    }
    candidate.len() > ancestor.len()
        && candidate.starts_with(ancestor)
        && candidate.as_bytes()[ancestor.len()] == b'/'
}

fn prune_descendants(paths: Vec<String>) -> Vec<String> {
    paths
        .iter()
        .filter(|p| {
            !paths
                .iter()
                .any(|other| is_strict_descendant(p, other))
        })
        .cloned()
        .collect()
}
