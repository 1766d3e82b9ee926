use std::fs;
use std::path::{Path, PathBuf};

use homecloud_application::{ApplicationError, FileScanSummary, FileScanner, ScannedFile};
use homecloud_domain::detect_media_kind;
use homecloud_domain::path::is_reserved_entry;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Walks the data root, skipping dot-entries (thumbnails, staging files),
/// the SQLite database with its WAL siblings, and any extra directories such
/// as a backup root placed inside the data root.
#[derive(Debug, Default)]
pub struct WalkdirFileScanner {
    skip: Vec<PathBuf>,
}

impl WalkdirFileScanner {
    pub fn new(skip: Vec<PathBuf>) -> Self {
        Self { skip }
    }

    fn is_skipped(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        if is_reserved_entry(&name, !entry.file_type().is_file()) {
            return true;
        }
        self.skip.iter().any(|skipped| entry.path() == skipped)
    }
}

impl FileScanner for WalkdirFileScanner {
    fn scan(&self, root: &Path) -> Result<FileScanSummary, ApplicationError> {
        if !root.is_dir() {
            return Err(ApplicationError::InvalidInput(format!(
                "data root does not exist or is not a directory: {}",
                root.display()
            )));
        }

        let mut summary = FileScanSummary::default();
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| !self.is_skipped(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    debug!(%error, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            summary.scanned_files += 1;
            if let Some(file) = scanned_file(entry.path()) {
                summary.files.push(file);
            }
        }

        Ok(summary)
    }
}

/// `None` when the file vanished or became unreadable after being listed,
/// e.g. a staged upload renamed into place mid-scan.
fn scanned_file(path: &Path) -> Option<ScannedFile> {
    let canonical = match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(error) => {
            debug!(path = %path.display(), %error, "file disappeared during scan");
            return None;
        }
    };
    let metadata = match fs::metadata(&canonical) {
        Ok(metadata) => metadata,
        Err(error) => {
            debug!(path = %canonical.display(), %error, "file unreadable during scan");
            return None;
        }
    };
    Some(ScannedFile {
        media_kind: detect_media_kind(&canonical),
        canonical_path: canonical,
        file_size: metadata.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use homecloud_domain::MediaKind;
    use tempfile::TempDir;

    #[test]
    fn skips_hidden_entries_database_and_backups() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical root");
        for (relative, bytes) in [
            ("uploads/a.jpg", &b"jpg"[..]),
            ("devices/phone/clip.mp4", b"mp4"),
            ("notes.txt", b"txt"),
            ("metadata.db", b"db"),
            ("metadata.db-wal", b"wal"),
            (".thumbs/w360/uploads/a.jpg.jpg", b"thumb"),
            ("uploads/.upload-123-b.jpg", b"partial"),
            ("mirror/uploads/a.jpg", b"jpg"),
        ] {
            let path = root.join(relative);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, bytes).expect("write");
        }

        let summary = WalkdirFileScanner::new(vec![root.join("mirror")])
            .scan(&root)
            .expect("scan");

        let mut found: Vec<_> = summary
            .files
            .iter()
            .map(|file| {
                (
                    file.canonical_path
                        .strip_prefix(&root)
                        .expect("below root")
                        .to_string_lossy()
                        .replace('\\', "/"),
                    file.media_kind,
                )
            })
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![
                ("devices/phone/clip.mp4".to_string(), MediaKind::Video),
                ("notes.txt".to_string(), MediaKind::Other),
                ("uploads/a.jpg".to_string(), MediaKind::Image),
            ]
        );
        assert_eq!(summary.scanned_files, 3);
        assert!(summary.files.iter().all(|file| file.file_size == 3));
    }

    #[test]
    fn vanished_files_are_skipped_not_fatal() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical root");
        let kept = root.join("kept.jpg");
        fs::write(&kept, b"jpg").expect("write");

        assert!(scanned_file(&root.join("renamed-away.jpg")).is_none());
        let file = scanned_file(&kept).expect("listed file");
        assert_eq!(file.canonical_path, kept);
        assert_eq!(file.file_size, 3);
        assert_eq!(file.media_kind, MediaKind::Image);
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlinks_do_not_abort_the_scan() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical root");
        fs::write(root.join("a.jpg"), b"jpg").expect("write");
        std::os::unix::fs::symlink(root.join("gone.jpg"), root.join("link.jpg"))
            .expect("symlink");

        let summary = WalkdirFileScanner::default().scan(&root).expect("scan");
        assert_eq!(summary.files.len(), 1);
        assert_eq!(summary.files[0].canonical_path, root.join("a.jpg"));
    }

    #[test]
    fn missing_root_is_invalid_input() {
        let dir = TempDir::new().expect("tempdir");
        let result = WalkdirFileScanner::default().scan(&dir.path().join("missing"));
        assert!(matches!(result, Err(ApplicationError::InvalidInput(_))));
    }
}
