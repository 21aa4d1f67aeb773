//! Glob expansion over a secret namespace
//!
//! Patterns use shell-style globs inside a single path segment: `*` and `?` never match `/`, and
//! `[...]` is a character class. Any number of segments may contain globs, e.g.
//! `secret/data/apps/*/postgre*`.
//!
//! A pattern resolves to concrete **secret** paths: a directory that matches the last segment
//! contributes every secret below it.

use anyhow::{Context, Result};

use crate::path;
use crate::store::{NodeKind, SecretStore};
use crate::walk;

const GLOB_TOKENS: [char; 3] = ['*', '?', '['];

pub fn has_glob(path: &str) -> bool {
    path.contains(GLOB_TOKENS)
}

/// Segments in front of the first glob segment.
///
/// Secrets found by expanding `pattern` are all below this path.
pub fn literal_prefix(pattern: &str) -> String {
    path::segments(pattern)
        .into_iter()
        .take_while(|segment| !has_glob(segment))
        .collect::<Vec<_>>()
        .join("/")
}

fn segment_matcher(segment: &str) -> Result<globset::GlobMatcher> {
    let glob = globset::GlobBuilder::new(segment)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob pattern: {segment}"))?;
    Ok(glob.compile_matcher())
}

async fn collect_matches<S: SecretStore + ?Sized>(
    store: &S,
    path: String,
    kind: NodeKind,
    matches: &mut Vec<String>,
) -> Result<()> {
    match kind {
        NodeKind::Missing => {}
        NodeKind::Leaf => matches.push(path),
        NodeKind::Directory | NodeKind::Both => {
            matches.extend(walk::leaf_paths(store, &path).await?);
        }
    }
    Ok(())
}

/// Resolve `pattern` into the secret paths it matches.
///
/// A pattern without glob tokens is returned as is. A pattern that matches nothing yields an empty
/// list; whether that is an error is up to the caller. The order of the results is unspecified
/// and overlapping matches are not de-duplicated.
pub async fn expand<S: SecretStore + ?Sized>(store: &S, pattern: &str) -> Result<Vec<String>> {
    if !has_glob(pattern) {
        return Ok(vec![pattern.to_string()]);
    }
    tracing::debug!("expanding wildcard path: {}", pattern);
    let segments: Vec<String> = path::segments(pattern)
        .into_iter()
        .map(String::from)
        .collect();
    let mut matches = Vec::new();
    // (resolved base path, index of the first unresolved segment)
    let mut pending = vec![(String::new(), 0usize)];
    while let Some((base, start)) = pending.pop() {
        let rest = &segments[start..];
        let Some(glob_offset) = rest.iter().position(|segment| has_glob(segment)) else {
            let literal = path::join(&base, &rest.join("/"));
            let kind = store.node_kind(&literal).await?;
            collect_matches(store, literal, kind, &mut matches).await?;
            continue;
        };
        let base = rest[..glob_offset]
            .iter()
            .fold(base, |acc, segment| path::join(&acc, segment));
        let matcher = segment_matcher(&rest[glob_offset])?;
        let next = start + glob_offset + 1;
        let children = store
            .list_children(&base)
            .await
            .with_context(|| format!("failed listing {base:?} in {}", store.name()))?;
        for child in children {
            if !matcher.is_match(&child) {
                continue;
            }
            let candidate = path::join(&base, &child);
            let kind = store.node_kind(&candidate).await?;
            if next == segments.len() {
                collect_matches(store, candidate, kind, &mut matches).await?;
            } else if kind.has_children() {
                pending.push((candidate, next));
            } else {
                tracing::trace!(
                    "{:?} matches {:?} but the pattern continues below it",
                    candidate,
                    rest[glob_offset]
                );
            }
        }
    }
    tracing::debug!(
        "expanded wildcard path {} to {} paths",
        pattern,
        matches.len()
    );
    Ok(matches)
}
