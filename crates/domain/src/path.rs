//! Pure helpers for mapping between on-disk paths and the root-relative
//! "virtual" paths clients see.

use std::path::{Component, Path, PathBuf};

pub const THUMBNAIL_DIR: &str = ".thumbs";
/// The catalog database and its `-wal`/`-shm` siblings share this prefix.
pub const DATABASE_FILE_PREFIX: &str = "metadata.db";

/// Dot-entries (thumbnails, staging files) and the catalog database are
/// internal to the store and never exposed as library content.
pub fn is_reserved_entry(name: &str, is_dir: bool) -> bool {
    name.starts_with('.') || (!is_dir && name.starts_with(DATABASE_FILE_PREFIX))
}

/// Whether any component of a root-relative file path is reserved.
pub fn is_reserved_path(relative: &Path) -> bool {
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    let last = parts.len().saturating_sub(1);
    parts
        .iter()
        .enumerate()
        .any(|(index, part)| is_reserved_entry(part, index < last))
}

/// Reduces a client-supplied name (file name, device id) to a single safe
/// path component. Returns `None` when nothing usable is left.
pub fn sanitize_component(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .trim()
        .trim_start_matches('.')
        .to_string();

    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned)
}

/// `/devices/phone/a.jpg` style path of `absolute` relative to `root`.
pub fn virtual_path(root: &Path, absolute: &Path) -> String {
    match absolute.strip_prefix(root) {
        Ok(relative) => {
            let parts: Vec<String> = relative
                .components()
                .filter_map(|component| match component {
                    Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                    _ => None,
                })
                .collect();
            format!("/{}", parts.join("/"))
        }
        Err(_) => absolute.to_string_lossy().to_string(),
    }
}

/// `name.ext` -> `name_<n>.ext`; names without an extension get the suffix
/// appended.
pub fn numbered_name(file_name: &str, n: u32) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    }
}

/// Location of the thumbnail for `relative` (a path below the data root)
/// at the given width, itself relative to the data root.
pub fn thumbnail_relative_path(relative: &Path, width: u32) -> PathBuf {
    let mut out = PathBuf::from(THUMBNAIL_DIR).join(format!("w{width}"));
    if let Some(parent) = relative.parent() {
        out.push(parent);
    }
    let file_name = relative
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());
    out.push(format!("{file_name}.jpg"));
    out
}
