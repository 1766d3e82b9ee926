use std::fs::{self, File};
use std::io::{self, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use homecloud_application::{ApplicationError, Archive, LibraryEntry, MediaLibrary};
use homecloud_domain::path::is_reserved_entry;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const ROOT_ARCHIVE_NAME: &str = "homecloud";

fn io_error(path: &Path, error: io::Error) -> ApplicationError {
    match error.kind() {
        ErrorKind::NotFound => ApplicationError::NotFound(path.display().to_string()),
        _ => ApplicationError::Io(error.to_string()),
    }
}

fn zip_error(error: zip::result::ZipError) -> ApplicationError {
    ApplicationError::Io(error.to_string())
}

/// Browsing, deletion and zip export over the data root. Reserved entries
/// and the `skip` directories are invisible here, the same way the scanner
/// ignores them.
#[derive(Debug, Clone)]
pub struct FsMediaLibrary {
    root: PathBuf,
    skip: Vec<PathBuf>,
}

impl FsMediaLibrary {
    pub fn new(root: impl Into<PathBuf>, skip: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            skip,
        }
    }

    fn is_hidden(&self, path: &Path, name: &str, is_dir: bool) -> bool {
        is_reserved_entry(name, is_dir)
            || self.skip.iter().any(|skipped| path.starts_with(skipped))
    }

    fn is_walk_hidden(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && self.is_hidden(
                entry.path(),
                &entry.file_name().to_string_lossy(),
                entry.file_type().is_dir(),
            )
    }

    fn archive_name(&self, source: &Path, is_dir: bool) -> String {
        let base = if source == self.root {
            None
        } else if is_dir {
            source.file_name()
        } else {
            source.file_stem()
        };
        let base = base
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| ROOT_ARCHIVE_NAME.to_string());
        format!("{base}.zip")
    }

    /// Writes every visible file below `source` into `writer`, named relative
    /// to `source` (or by file name when `source` is a single file).
    fn write_entries(
        &self,
        writer: &mut ZipWriter<File>,
        source: &Path,
    ) -> Result<usize, ApplicationError> {
        let prefix = if source.is_dir() {
            source
        } else {
            source.parent().unwrap_or(source)
        };
        let walker = WalkDir::new(source)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_walk_hidden(entry));

        let mut written = 0;
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    debug!(%error, "skipping unreadable entry while archiving");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(prefix) else {
                continue;
            };
            let name = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let mut input = match File::open(entry.path()) {
                Ok(input) => input,
                Err(error) => {
                    debug!(
                        path = %entry.path().display(),
                        %error,
                        "file disappeared while archiving"
                    );
                    continue;
                }
            };
            let size = input.metadata().map(|meta| meta.len()).unwrap_or_default();
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .large_file(size >= u64::from(u32::MAX));
            writer.start_file(name, options).map_err(zip_error)?;
            io::copy(&mut input, writer).map_err(|error| io_error(entry.path(), error))?;
            written += 1;
        }
        Ok(written)
    }
}

impl MediaLibrary for FsMediaLibrary {
    fn list_dir(&self, dir: &Path) -> Result<Vec<LibraryEntry>, ApplicationError> {
        let metadata = fs::metadata(dir).map_err(|error| io_error(dir, error))?;
        if !metadata.is_dir() {
            return Err(ApplicationError::InvalidInput(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(|error| io_error(dir, error))? {
            let Ok(entry) = entry else { continue };
            // Entries can vanish between listing and stat.
            let Ok(metadata) = entry.metadata() else { continue };
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_hidden(&path, &name, metadata.is_dir()) {
                continue;
            }
            entries.push(LibraryEntry {
                is_dir: metadata.is_dir(),
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                path,
                name,
            });
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    fn remove_file(&self, path: &Path) -> Result<(), ApplicationError> {
        let metadata = fs::metadata(path).map_err(|error| io_error(path, error))?;
        if metadata.is_dir() {
            return Err(ApplicationError::InvalidInput(
                "directories cannot be deleted".to_string(),
            ));
        }
        if self.skip.iter().any(|skipped| path.starts_with(skipped)) {
            return Err(ApplicationError::NotFound(path.display().to_string()));
        }
        fs::remove_file(path).map_err(|error| io_error(path, error))
    }

    fn archive(&self, source: &Path) -> Result<Archive, ApplicationError> {
        let metadata = fs::metadata(source).map_err(|error| io_error(source, error))?;
        if self.skip.iter().any(|skipped| source.starts_with(skipped)) {
            return Err(ApplicationError::NotFound(source.display().to_string()));
        }

        // Unlinked on creation, so an abandoned download leaves nothing behind.
        let file =
            tempfile::tempfile_in(&self.root).map_err(|error| io_error(&self.root, error))?;
        let mut writer = ZipWriter::new(file);
        let entries = self.write_entries(&mut writer, source)?;
        let mut file = writer.finish().map_err(zip_error)?;
        let size = file
            .seek(SeekFrom::End(0))
            .map_err(|error| io_error(source, error))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|error| io_error(source, error))?;

        let file_name = self.archive_name(source, metadata.is_dir());
        info!(source = %source.display(), entries, size, name = %file_name, "built archive");
        Ok(Archive {
            file,
            file_name,
            size,
        })
    }
}
