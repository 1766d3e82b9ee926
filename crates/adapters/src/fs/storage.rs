use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use homecloud_application::{ApplicationError, MediaStorage, StagedUpload};
use homecloud_domain::path::numbered_name;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

const COPY_BUFFER_BYTES: usize = 64 * 1024;
const MAX_NAME_ATTEMPTS: u32 = 10_000;

fn io_error(error: io::Error) -> ApplicationError {
    ApplicationError::Io(error.to_string())
}

/// Stores uploads below the data root, hashing while writing.
#[derive(Debug, Clone)]
pub struct FsMediaStorage {
    root: PathBuf,
}

impl FsMediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn write_hashed(
        file: &mut File,
        reader: &mut dyn Read,
        max_bytes: u64,
    ) -> Result<(String, u64), ApplicationError> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0_u8; COPY_BUFFER_BYTES];
        let mut written: u64 = 0;

        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Err(io_error(error)),
            };
            written += read as u64;
            if written > max_bytes {
                return Err(ApplicationError::PayloadTooLarge(max_bytes));
            }
            hasher.update(&buffer[..read]);
            file.write_all(&buffer[..read]).map_err(io_error)?;
        }

        file.sync_all().map_err(io_error)?;
        Ok((hex::encode(hasher.finalize()), written))
    }
}

/// Moves `source` to `target` unless `target` exists. Returns false when the
/// name is taken.
fn place_without_clobber(source: &Path, target: &Path) -> io::Result<bool> {
    match fs::hard_link(source, target) {
        Ok(()) => {
            release_source(source, target, |path| fs::remove_file(path))?;
            Ok(true)
        }
        Err(error) if error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(error) => {
            debug!(%error, "hard link unavailable; falling back to rename");
            if target.exists() {
                return Ok(false);
            }
            move_file(source, target)?;
            Ok(true)
        }
    }
}

/// Drops the staged name once the target link exists. If that fails the
/// target link is removed too, so no uncatalogued copy stays behind.
fn release_source(
    source: &Path,
    target: &Path,
    remove: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<()> {
    if let Err(error) = remove(source) {
        if let Err(cleanup) = fs::remove_file(target) {
            warn!(path = %target.display(), error = %cleanup, "failed to undo link");
        }
        return Err(error);
    }
    Ok(())
}

/// Hidden temp name next to `file_name`. Only the extension is kept so the
/// result stays within file name limits.
pub(crate) fn temp_name(prefix: &str, file_name: &str) -> String {
    match Path::new(file_name).extension() {
        Some(ext) => format!(".{prefix}-{}.{}", Uuid::new_v4(), ext.to_string_lossy()),
        None => format!(".{prefix}-{}", Uuid::new_v4()),
    }
}

/// Rename, or copy to a sibling temp file and rename when the rename fails.
fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }

    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let sibling = parent.join(format!(".move-{}", Uuid::new_v4()));
    let copied = fs::copy(source, &sibling)
        .and_then(|_| File::open(&sibling)?.sync_all())
        .and_then(|_| fs::rename(&sibling, target));
    if let Err(error) = copied {
        let _ = fs::remove_file(&sibling);
        return Err(error);
    }
    fs::remove_file(source)
}

impl MediaStorage for FsMediaStorage {
    fn stage(
        &self,
        directory: &Path,
        file_name: &str,
        reader: &mut dyn Read,
        max_bytes: u64,
    ) -> Result<StagedUpload, ApplicationError> {
        let target_dir = self.root.join(directory);
        fs::create_dir_all(&target_dir).map_err(io_error)?;

        let temp_path = target_dir.join(temp_name("upload", file_name));
        let mut file = File::create(&temp_path).map_err(io_error)?;

        match Self::write_hashed(&mut file, reader, max_bytes) {
            Ok((sha256, size)) => Ok(StagedUpload {
                temp_path,
                sha256,
                size,
            }),
            Err(error) => {
                drop(file);
                self.discard(&temp_path);
                Err(error)
            }
        }
    }

    fn commit(
        &self,
        staged: &StagedUpload,
        directory: &Path,
        file_name: &str,
    ) -> Result<PathBuf, ApplicationError> {
        let target_dir = self.root.join(directory);
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                file_name.to_string()
            } else {
                numbered_name(file_name, attempt)
            };
            let candidate = target_dir.join(name);
            if place_without_clobber(&staged.temp_path, &candidate).map_err(io_error)? {
                return Ok(candidate);
            }
        }
        Err(ApplicationError::Io(format!(
            "no free name for {file_name} in {}",
            target_dir.display()
        )))
    }

    fn discard(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!(path = %path.display(), %error, "failed to remove file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn stage(
        storage: &FsMediaStorage,
        bytes: &[u8],
        max: u64,
    ) -> Result<StagedUpload, ApplicationError> {
        let mut reader = Cursor::new(bytes.to_vec());
        storage.stage(Path::new("uploads"), "a.jpg", &mut reader, max)
    }

    #[test]
    fn staging_hashes_content() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FsMediaStorage::new(dir.path());

        let staged = stage(&storage, b"hello", 1024).expect("stage");
        assert_eq!(
            staged.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(staged.size, 5);
        assert_eq!(fs::read(&staged.temp_path).expect("read"), b"hello");
    }

    #[test]
    fn oversized_upload_leaves_no_temp_file() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FsMediaStorage::new(dir.path());

        let result = stage(&storage, &[1_u8; 200_000], 100_000);
        assert!(matches!(result, Err(ApplicationError::PayloadTooLarge(100_000))));
        let leftovers = fs::read_dir(dir.path().join("uploads")).expect("dir").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn commit_never_overwrites() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FsMediaStorage::new(dir.path());

        let first = stage(&storage, b"one", 1024).expect("stage");
        let first_path = storage
            .commit(&first, Path::new("uploads"), "a.jpg")
            .expect("commit");
        let second = stage(&storage, b"two", 1024).expect("stage");
        let second_path = storage
            .commit(&second, Path::new("uploads"), "a.jpg")
            .expect("commit");

        assert_eq!(first_path, dir.path().join("uploads").join("a.jpg"));
        assert_eq!(second_path, dir.path().join("uploads").join("a_1.jpg"));
        assert_eq!(fs::read(&first_path).expect("read"), b"one");
        assert_eq!(fs::read(&second_path).expect("read"), b"two");
        assert!(!second.temp_path.exists());
    }

    #[test]
    fn staging_accepts_names_at_the_length_limit() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FsMediaStorage::new(dir.path());
        let long_name = format!("{}.jpg", "x".repeat(250));

        let mut reader = Cursor::new(b"pixels".to_vec());
        let staged = storage
            .stage(Path::new("uploads"), &long_name, &mut reader, 1024)
            .expect("stage");
        let temp_name = staged
            .temp_path
            .file_name()
            .expect("name")
            .to_string_lossy()
            .to_string();
        assert!(temp_name.starts_with(".upload-"));
        assert!(temp_name.ends_with(".jpg"));

        let committed = storage
            .commit(&staged, Path::new("uploads"), &long_name)
            .expect("commit");
        assert_eq!(committed, dir.path().join("uploads").join(&long_name));
    }

    #[test]
    fn failed_source_removal_undoes_the_link() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join(".upload-x.jpg");
        let target = dir.path().join("a.jpg");
        fs::write(&source, b"bytes").expect("write");
        fs::hard_link(&source, &target).expect("link");

        let result = release_source(&source, &target, |_| {
            Err(io::Error::new(ErrorKind::PermissionDenied, "read-only"))
        });

        assert_eq!(
            result.expect_err("removal fails").kind(),
            ErrorKind::PermissionDenied
        );
        assert!(!target.exists());
        assert!(source.exists());
    }

    #[test]
    fn discard_ignores_missing_files() {
        let dir = TempDir::new().expect("tempdir");
        let storage = FsMediaStorage::new(dir.path());
        storage.discard(&dir.path().join("nope"));
    }
}
