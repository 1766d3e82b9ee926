use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("path escapes the data root: {0}")]
    OutsideRoot(String),
}

/// Maps a client-supplied virtual path onto the filesystem below `root`.
///
/// Traversal components are rejected before any filesystem access. The
/// joined path is then canonicalized (or, if it does not exist yet, its
/// deepest existing ancestor) so symlinks cannot lead outside the root.
pub fn resolve(root: &Path, virtual_path: &str) -> Result<PathBuf, SandboxError> {
    let outside = || SandboxError::OutsideRoot(virtual_path.to_string());
    let trimmed = virtual_path.trim_start_matches(['/', '\\']);

    let mut relative = PathBuf::new();
    for part in trimmed.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => relative.push(name),
            _ => return Err(outside()),
        }
    }

    let canonical_root = root.canonicalize().map_err(|_| outside())?;
    let candidate = canonical_root.join(&relative);
    let resolved = canonicalize_existing(&candidate).ok_or_else(outside)?;

    if !resolved.starts_with(&canonical_root) {
        return Err(outside());
    }
    Ok(resolved)
}

/// Canonicalizes the deepest existing ancestor and re-appends the rest.
fn canonicalize_existing(path: &Path) -> Option<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Some(canonical);
    }

    let mut missing = Vec::new();
    let mut current = path;
    loop {
        missing.push(current.file_name()?.to_os_string());
        current = current.parent()?;
        if let Ok(canonical) = current.canonicalize() {
            let mut out = canonical;
            for name in missing.iter().rev() {
                out.push(name);
            }
            return Some(out);
        }
    }
}
