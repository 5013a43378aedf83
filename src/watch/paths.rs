// src/watch/paths.rs

use std::path::{Path, PathBuf};

/// Express `path` relative to `root` using forward slashes.
///
/// Backends may report paths under a different absolute prefix than the one
/// the watch was started with (symlinked temp dirs such as `/var` vs
/// `/private/var`). When a plain prefix strip fails we retry with both sides
/// canonicalised, canonicalising the parent directory for files that no
/// longer exist.
///
/// Returns `None` for paths outside `root` and for `root` itself.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if let Some(rel) = strip(root, path) {
        return Some(rel);
    }

    let root = root.canonicalize().ok()?;
    let path = canonical_or_parent(path)?;
    strip(&root, &path)
}

fn strip(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let s = rel.to_string_lossy().replace('\\', "/");
    if s.is_empty() { None } else { Some(s) }
}

fn canonical_or_parent(path: &Path) -> Option<PathBuf> {
    if let Ok(canon) = path.canonicalize() {
        return Some(canon);
    }
    let parent = path.parent()?.canonicalize().ok()?;
    Some(parent.join(path.file_name()?))
}
