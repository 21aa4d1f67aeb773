//! Secret path helpers and the source-to-destination path transformation
//!
//! Paths are `/`-delimited and start with the engine (mount) name, e.g. `secret/data/apps/db`.
//! Versioned KV engines expect a `data` marker segment right after the mount name.

/// Marker segment versioned KV engines place between the mount name and the key path.
pub const DATA_MARKER: &str = "data";

/// Non-empty segments of `path`.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join two path fragments with exactly one separator between them.
pub fn join(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        return child.to_string();
    }
    if child.is_empty() {
        return base.to_string();
    }
    format!("{base}/{child}")
}

/// The engine (mount) name is the first segment.
pub fn engine(path: &str) -> Option<&str> {
    segments(path).first().copied()
}

/// True if any segment after the mount name is the `data` marker.
pub fn has_data_marker(path: &str) -> bool {
    segments(path).iter().skip(1).any(|s| *s == DATA_MARKER)
}

/// Strip `root` from `path` on segment boundaries.
///
/// Returns `None` if `path` is not `root` or below it, `Some("")` if they are equal.
pub fn strip_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let path = path.trim_end_matches('/');
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return Some(path.trim_start_matches('/'));
    }
    let rest = path.strip_prefix(root)?;
    if rest.is_empty() {
        return Some(rest);
    }
    rest.strip_prefix('/')
}

/// Everything after the mount name and, if present, the `data` marker right after it.
fn relative_to_engine(path: &str) -> String {
    let segs = segments(path);
    let skip = if segs.get(1) == Some(&DATA_MARKER) {
        2
    } else {
        1
    };
    segs.iter().skip(skip).copied().collect::<Vec<_>>().join("/")
}

/// Compute where `source_path` lands under `dest_root`.
///
/// The part of `source_path` below `source_root` is appended to the destination. If `dest_root`
/// has no `data` marker it is treated as a path inside the *source's* engine and prefixed with
/// `<source engine>/data/`. Copying the root onto the root yields `dest_root` unchanged, as does a
/// source path too short to hold an engine, a marker and a key.
pub fn transform(source_path: &str, source_root: &str, dest_root: &str) -> String {
    let dest_root = dest_root.trim_end_matches('/');
    let source_segments = segments(source_path);
    if source_segments.len() < 3 {
        return dest_root.to_string();
    }
    let relative = match strip_root(source_path, source_root) {
        Some(relative) => relative.to_string(),
        None => {
            tracing::debug!(
                "{:?} is not under source root {:?}, using its engine-relative path",
                source_path,
                source_root
            );
            relative_to_engine(source_path)
        }
    };
    if relative.is_empty() {
        return dest_root.to_string();
    }
    if has_data_marker(dest_root) {
        return join(dest_root, &relative);
    }
    let base = format!(
        "{}/{}/{}",
        source_segments[0],
        DATA_MARKER,
        dest_root.trim_start_matches('/')
    );
    join(&base, &relative)
}

/// Insert the `data` marker after a `secret` or `kv` mount if it is missing.
///
/// Paths on other mounts, or already carrying the marker, are returned unchanged.
pub fn normalize_kv_path(path: &str) -> String {
    let segs = segments(path);
    match segs.first() {
        Some(&mount) if mount == "secret" || mount == "kv" => {
            if segs.get(1) == Some(&DATA_MARKER) {
                return path.to_string();
            }
            let mut normalized = vec![mount, DATA_MARKER];
            normalized.extend(segs.iter().skip(1));
            normalized.join("/")
        }
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn join_normalizes_separators() {
        assert_eq!(join("secret/data/", "/app"), "secret/data/app");
        assert_eq!(join("secret/data", "app/db"), "secret/data/app/db");
        assert_eq!(join("", "app"), "app");
        assert_eq!(join("secret", ""), "secret");
    }

    #[test]
    fn strip_root_respects_segments() {
        assert_eq!(strip_root("secret/data/app/db", "secret/data/app"), Some("db"));
        assert_eq!(strip_root("secret/data/app", "secret/data/app/"), Some(""));
        assert_eq!(strip_root("secret/data/apple", "secret/data/app"), None);
        assert_eq!(strip_root("kv/data/app", "secret/data"), None);
    }

    #[test]
    fn transform_cases() {
        let cases = [
            // (source path, source root, destination root, expected)
            (
                "secret/data/source/app1",
                "secret/data/source",
                "secret/data/dest",
                "secret/data/dest/app1",
            ),
            (
                "secret/data/source/apps/prod/db",
                "secret/data/source",
                "secret/data/backup",
                "secret/data/backup/apps/prod/db",
            ),
            (
                "secret/data/source/config",
                "secret/data/source",
                "kv/data/backup",
                "kv/data/backup/config",
            ),
            (
                "secret/data/source",
                "secret/data/source",
                "secret/data/backup",
                "secret/data/backup",
            ),
            // no marker on the destination: source engine is used
            (
                "team/data/source/app",
                "team/data/source",
                "backup/prod",
                "team/data/backup/prod/app",
            ),
            // too short to transform
            ("secret/app", "secret", "secret/data/dest", "secret/data/dest"),
        ];
        for (source, source_root, dest_root, expected) in cases {
            assert_eq!(
                transform(source, source_root, dest_root),
                expected,
                "transform({source:?}, {source_root:?}, {dest_root:?})"
            );
        }
    }

    #[test]
    fn transform_outside_root_keeps_engine_relative_path() {
        assert_eq!(
            transform("secret/data/other/db", "secret/data/source", "kv/data/dest"),
            "kv/data/dest/other/db"
        );
    }

    #[test]
    fn normalize_inserts_marker() {
        assert_eq!(normalize_kv_path("secret"), "secret/data");
        assert_eq!(normalize_kv_path("secret/apps/db"), "secret/data/apps/db");
        assert_eq!(normalize_kv_path("kv/apps"), "kv/data/apps");
        assert_eq!(normalize_kv_path("secret/data/apps"), "secret/data/apps");
        assert_eq!(normalize_kv_path("team/apps"), "team/apps");
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z0-9_-]{1,8}"
    }

    proptest! {
        #[test]
        fn root_onto_root_is_identity(tail in prop::collection::vec(segment(), 1..4)) {
            let root = format!("secret/data/{}", tail.join("/"));
            prop_assert_eq!(transform(&root, &root, &root), root.clone());
        }

        #[test]
        fn relative_suffix_is_preserved(
            root_tail in prop::collection::vec(segment(), 1..3),
            rel in prop::collection::vec(segment(), 1..4),
            dest_tail in prop::collection::vec(segment(), 1..3),
            dest_has_marker in any::<bool>(),
        ) {
            let root = format!("secret/data/{}", root_tail.join("/"));
            let source = format!("{root}/{}", rel.join("/"));
            let dest = if dest_has_marker {
                format!("kv/data/{}", dest_tail.join("/"))
            } else {
                dest_tail.join("/")
            };
            let result = transform(&source, &root, &dest);
            let suffix = format!("/{}", rel.join("/"));
            prop_assert!(result.ends_with(&suffix), "{} does not end with {}", result, suffix);
            prop_assert!(has_data_marker(&result));
        }
    }
}
