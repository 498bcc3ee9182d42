//! Relative import resolution against the set of known project paths.
//!
//! There is no module resolver behind this: a relative import string is
//! joined onto the importer's directory and matched against project paths by
//! extension guessing and index-file fallback.

use std::collections::HashSet;

/// Extensions tried, in order, when an import omits one.
pub const EXTENSION_ORDER: &[&str] = &[
    ".ts", ".tsx", ".js", ".jsx", ".py", ".go", ".rs", ".java", ".rb", ".cs", ".php",
];

/// Collapse `.` and `..` segments and duplicate slashes. A `..` that would
/// climb above the root is dropped.
pub fn normalize_posix_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            _ => stack.push(part),
        }
    }
    stack.join("/")
}

/// Directory portion of a project path, empty for top-level files.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

pub fn is_relative(source: &str) -> bool {
    source.starts_with("./") || source.starts_with("../")
}

/// Candidate project paths for `source` imported from `importer`, in the
/// order they are tried.
pub fn resolution_candidates(importer: &str, source: &str) -> Vec<String> {
    let base = normalize_posix_path(&format!("{}/{}", parent_dir(importer), source));
    let mut candidates = Vec::with_capacity(1 + EXTENSION_ORDER.len() * 2);
    candidates.push(base.clone());
    candidates.extend(EXTENSION_ORDER.iter().map(|ext| format!("{base}{ext}")));
    candidates.extend(
        EXTENSION_ORDER
            .iter()
            .map(|ext| normalize_posix_path(&format!("{base}/index{ext}"))),
    );
    candidates
}

/// Resolve a relative import to a known path. Non-relative sources and
/// imports with no matching candidate resolve to `None`.
pub fn resolve_import_path(
    importer: &str,
    source: &str,
    known_paths: &HashSet<String>,
) -> Option<String> {
    if !is_relative(source) {
        return None;
    }
    resolution_candidates(importer, source)
        .into_iter()
        .find(|candidate| known_paths.contains(candidate))
}
