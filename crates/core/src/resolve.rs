//! Rename and link resolution over the versioned lookup store.
//!
//! Given a relative path and a half-open version interval `(from, to]`, the
//! resolver returns the path's location at `to`, chasing historical renames
//! recorded in the store. A rename of an ancestor directory implies a rename
//! of all descendants, so the probe walks the path's prefixes deepest-first.
//!
//! The walk is an explicit loop rather than recursion: every accepted hop
//! raises the interval's lower bound to the hop's effective version, which
//! strictly narrows the interval, so the loop terminates even on adversarial
//! mapping tables.
//!
//! The resolver is fail-open. If the store is absent or a query errors, every
//! path resolves to itself; callers must never block a merge on this
//! dependency being present.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, instrument, warn};

use crate::errors::LookupError;
use crate::lookup::LookupStore;
use crate::version::Version;

/// Cache key: one resolution query for one descriptor run.
type CacheKey = (String, String, Version, Version);

/// Path resolution engine over the rename/link lookup store.
pub struct RenameResolver {
    store: Option<LookupStore>,
    cache: Mutex<HashMap<CacheKey, String>>,
}

impl RenameResolver {
    /// Create a resolver backed by `store`. `None` disables resolution
    /// entirely (identity mapping).
    pub fn new(store: Option<LookupStore>) -> Self {
        if store.is_none() {
            warn!("lookup store unavailable, path resolution degrades to identity");
        }
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Drop all cached resolutions. Called when the descriptor set is
    /// refreshed; cached entries are keyed per query, so staleness is bounded
    /// by the descriptor set lifetime.
    pub fn invalidate(&self) {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// Resolve `path`'s location at `to`, chasing every rename that took
    /// effect strictly after `from` and no later than `to`.
    #[instrument(skip(self), fields(repo = repository))]
    pub fn resolve_rename(
        &self,
        repository: &str,
        path: &str,
        from: &Version,
        to: &Version,
    ) -> String {
        let key = (
            repository.to_string(),
            path.to_string(),
            from.clone(),
            to.clone(),
        );
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&key)
        {
            return hit.clone();
        }

        let resolved = match self.chase_renames(repository, path, from, to) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, path, "lookup query failed, returning path unchanged");
                path.to_string()
            }
        };

        self.cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key, resolved.clone());
        resolved
    }

    /// Resolve `path` through the symmetric link table at `to`.
    ///
    /// A row matches when the probed prefix equals either side of the pair
    /// and the link took effect no later than `to`; the non-matching side is
    /// returned. Links are not chased across link boundaries: an artifact is
    /// presumed to have at most one active link point per ancestor chain.
    #[instrument(skip(self), fields(repo = repository))]
    pub fn resolve_link(&self, repository: &str, path: &str, to: &Version) -> String {
        let Some(store) = &self.store else {
            return path.to_string();
        };

        for prefix in prefixes_deepest_first(path) {
            let rows = match store.links_at(repository, prefix) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, path, "link query failed, returning path unchanged");
                    return path.to_string();
                }
            };
            let best = rows
                .into_iter()
                .filter(|r| r.effective_version <= *to)
                .max_by(|a, b| a.effective_version.cmp(&b.effective_version));
            if let Some(row) = best {
                let other = if row.path_a == prefix {
                    row.path_b
                } else {
                    row.path_a
                };
                let translated = join_suffix(&other, suffix_below(path, prefix));
                debug!(path, %translated, "resolved link");
                return translated;
            }
        }
        path.to_string()
    }

    fn chase_renames(
        &self,
        repository: &str,
        path: &str,
        from: &Version,
        to: &Version,
    ) -> Result<String, LookupError> {
        let Some(store) = &self.store else {
            return Ok(path.to_string());
        };

        let mut current = path.to_string();
        let mut lower = from.clone();
        loop {
            // A path may be renamed multiple times within one interval; each
            // hop must be chased with the narrowed interval (hop_version, to].
            match first_hop(store, repository, &current, &lower, to)? {
                Some((next, hop_version)) => {
                    debug!(from_path = %current, to_path = %next, version = %hop_version, "rename hop");
                    current = next;
                    lower = hop_version;
                }
                None => return Ok(current),
            }
        }
    }
}

/// Find the first applicable rename for `path` or its nearest ancestor.
///
/// At each prefix, the winning row is the one with the smallest effective
/// version inside `(lower, to]` — the first rename that took effect after
/// `lower`. The suffix below the matched prefix is re-appended after
/// translation.
fn first_hop(
    store: &LookupStore,
    repository: &str,
    path: &str,
    lower: &Version,
    to: &Version,
) -> Result<Option<(String, Version)>, LookupError> {
    for prefix in prefixes_deepest_first(path) {
        let rows = store.renames_from(repository, prefix)?;
        let best = rows
            .into_iter()
            .filter(|r| r.effective_version.is_within(lower, to))
            .min_by(|a, b| a.effective_version.cmp(&b.effective_version));
        if let Some(row) = best {
            let translated = join_suffix(&row.new_path, suffix_below(path, prefix));
            return Ok(Some((translated, row.effective_version)));
        }
    }
    Ok(None)
}

/// Iterate a path and its ancestors, deepest first: `a/b/c`, `a/b`, `a`.
fn prefixes_deepest_first(path: &str) -> impl Iterator<Item = &str> {
    let mut prefixes = vec![path];
    let mut rest = path;
    while let Some(pos) = rest.rfind('/') {
        rest = &rest[..pos];
        if !rest.is_empty() {
            prefixes.push(rest);
        }
    }
    prefixes.into_iter()
}

/// The part of `path` below `prefix`, without a leading slash.
fn suffix_below<'a>(path: &'a str, prefix: &str) -> &'a str {
    if path.len() <= prefix.len() {
        ""
    } else {
        &path[prefix.len() + 1..]
    }
}

fn join_suffix(base: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(renames: &[(&str, &str, &str)]) -> LookupStore {
        let store = LookupStore::in_memory().unwrap();
        for (old, new, ver) in renames {
            store
                .insert_rename("repo", old, new, &Version::parse(ver).unwrap())
                .unwrap();
        }
        store
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_no_store_is_identity() {
        let resolver = RenameResolver::new(None);
        assert_eq!(
            resolver.resolve_rename("repo", "trunk/src/A.java", &v("0"), &v("99")),
            "trunk/src/A.java"
        );
        assert_eq!(
            resolver.resolve_link("repo", "trunk/src/A.java", &v("99")),
            "trunk/src/A.java"
        );
    }

    #[test]
    fn test_no_matching_row_is_identity() {
        let store = store_with(&[("other/dir", "moved/dir", "10")]);
        let resolver = RenameResolver::new(Some(store));
        assert_eq!(
            resolver.resolve_rename("repo", "trunk/src/A.java", &v("0"), &v("99")),
            "trunk/src/A.java"
        );
    }

    #[test]
    fn test_direct_rename() {
        let store = store_with(&[("trunk/src", "trunk/newsrc", "50")]);
        let resolver = RenameResolver::new(Some(store));
        assert_eq!(
            resolver.resolve_rename("repo", "trunk/src/A.java", &v("0"), &v("60")),
            "trunk/newsrc/A.java"
        );
    }

    #[test]
    fn test_rename_before_interval_ignored() {
        let store = store_with(&[("trunk/src", "trunk/newsrc", "50")]);
        let resolver = RenameResolver::new(Some(store));
        // Resolving to a version strictly before the rename: unchanged.
        assert_eq!(
            resolver.resolve_rename("repo", "trunk/src/A.java", &v("0"), &v("49")),
            "trunk/src/A.java"
        );
        // From bound is exclusive: a rename at exactly `from` does not apply.
        assert_eq!(
            resolver.resolve_rename("repo", "trunk/src/A.java", &v("50"), &v("60")),
            "trunk/src/A.java"
        );
    }

    #[test]
    fn test_chained_renames() {
        let store = store_with(&[
            ("a", "b", "10"),
            ("b", "c", "20"),
            ("c", "d", "30"),
        ]);
        let resolver = RenameResolver::new(Some(store));
        assert_eq!(resolver.resolve_rename("repo", "a", &v("0"), &v("30")), "d");
        assert_eq!(resolver.resolve_rename("repo", "a", &v("0"), &v("25")), "c");
        assert_eq!(resolver.resolve_rename("repo", "a", &v("0"), &v("9")), "a");
    }

    #[test]
    fn test_smallest_version_wins_first() {
        // Two renames of the same path in the interval: the earlier one is
        // the first hop, and the later one applies to the renamed location
        // only if its old path matches.
        let store = store_with(&[
            ("dir", "dir-v2", "10"),
            ("dir-v2", "dir-v3", "20"),
            ("dir", "dir-wrong", "15"),
        ]);
        let resolver = RenameResolver::new(Some(store));
        assert_eq!(
            resolver.resolve_rename("repo", "dir/f.txt", &v("0"), &v("30")),
            "dir-v3/f.txt"
        );
    }

    #[test]
    fn test_ancestor_rename_reappends_suffix() {
        let store = store_with(&[("proj/module", "proj/renamed", "5")]);
        let resolver = RenameResolver::new(Some(store));
        assert_eq!(
            resolver.resolve_rename("repo", "proj/module/sub/deep/F.java", &v("0"), &v("9")),
            "proj/renamed/sub/deep/F.java"
        );
    }

    #[test]
    fn test_deeper_prefix_wins_over_ancestor() {
        let store = store_with(&[
            ("proj", "proj-moved", "10"),
            ("proj/module", "elsewhere/module", "10"),
        ]);
        let resolver = RenameResolver::new(Some(store));
        // The probe is deepest-first, so the module-level rename applies.
        assert_eq!(
            resolver.resolve_rename("repo", "proj/module/F.java", &v("0"), &v("20")),
            "elsewhere/module/F.java"
        );
    }

    #[test]
    fn test_resolution_cache_and_invalidate() {
        let store = store_with(&[("a", "b", "10")]);
        let resolver = RenameResolver::new(Some(store));
        assert_eq!(resolver.resolve_rename("repo", "a", &v("0"), &v("20")), "b");
        // Cached result survives; invalidation clears it without changing
        // the answer.
        assert_eq!(resolver.resolve_rename("repo", "a", &v("0"), &v("20")), "b");
        resolver.invalidate();
        assert_eq!(resolver.resolve_rename("repo", "a", &v("0"), &v("20")), "b");
    }

    #[test]
    fn test_link_resolution_symmetric() {
        let store = LookupStore::in_memory().unwrap();
        store
            .insert_link("repo", "trees/main", "trees/mirror", &v("10"))
            .unwrap();
        let resolver = RenameResolver::new(Some(store));

        assert_eq!(
            resolver.resolve_link("repo", "trees/main/f.txt", &v("20")),
            "trees/mirror/f.txt"
        );
        assert_eq!(
            resolver.resolve_link("repo", "trees/mirror/f.txt", &v("20")),
            "trees/main/f.txt"
        );
        // Link not yet effective at the target version.
        assert_eq!(
            resolver.resolve_link("repo", "trees/main/f.txt", &v("9")),
            "trees/main/f.txt"
        );
    }

    #[test]
    fn test_prefixes_deepest_first() {
        let prefixes: Vec<&str> = prefixes_deepest_first("a/b/c").collect();
        assert_eq!(prefixes, vec!["a/b/c", "a/b", "a"]);
        let single: Vec<&str> = prefixes_deepest_first("a").collect();
        assert_eq!(single, vec!["a"]);
    }
}
