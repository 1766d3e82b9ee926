use std::path::Path;

use homecloud_domain::path::is_reserved_path;
use homecloud_domain::{guess_mime, BrowseItem, EntryKind, FileRecord, GridPage, SearchFilters};
use tracing::info;

use crate::search::thumbnail_link;
use crate::{
    timestamp, ApplicationError, ApplicationService, Archive, ArchiveCommand, BrowseCommand,
    DeleteFileCommand, GridCommand, LibraryEntry, ListFilesCommand,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub path: String,
    /// False when the file existed on disk but was never catalogued.
    pub record_removed: bool,
}

impl ApplicationService {
    pub fn browse_tree(
        &self,
        command: BrowseCommand,
    ) -> Result<Vec<BrowseItem>, ApplicationError> {
        let entries = self.library.list_dir(self.library_path(&command.dir)?)?;
        Ok(entries
            .iter()
            .map(|entry| self.browse_item(entry, false))
            .collect())
    }

    /// One page of a directory listing, with thumbnail links for files.
    pub fn browse_grid(&self, command: GridCommand) -> Result<GridPage, ApplicationError> {
        let entries = self.library.list_dir(self.library_path(&command.dir)?)?;
        let total = entries.len();
        let items = entries
            .iter()
            .skip(command.offset as usize)
            .take(command.limit as usize)
            .map(|entry| self.browse_item(entry, true))
            .collect();
        Ok(GridPage {
            items,
            offset: command.offset,
            limit: command.limit,
            total,
        })
    }

    pub fn list_files(
        &self,
        command: ListFilesCommand,
    ) -> Result<Vec<FileRecord>, ApplicationError> {
        self.catalog
            .recent_files(&SearchFilters::default(), command.page)
    }

    /// Removes a file from disk and its catalog row. Thumbnails and backups
    /// are left in place.
    pub fn delete_file(
        &self,
        command: DeleteFileCommand,
    ) -> Result<DeleteReport, ApplicationError> {
        let path = self.library_path(&command.path)?;
        self.library.remove_file(path)?;
        let record_removed = self.catalog.delete_by_path(&path.to_string_lossy())?;
        let report = DeleteReport {
            path: self.virtual_path(path),
            record_removed,
        };
        info!(path = %report.path, record_removed, "deleted file");
        Ok(report)
    }

    pub fn archive(&self, command: ArchiveCommand) -> Result<Archive, ApplicationError> {
        self.library.archive(self.library_path(&command.path)?)
    }

    /// Paths must sit below the data root and outside its reserved entries.
    fn library_path<'a>(&self, path: &'a Path) -> Result<&'a Path, ApplicationError> {
        let relative = path
            .strip_prefix(&self.settings.data_root)
            .map_err(|_| {
                ApplicationError::InvalidInput(format!(
                    "{} is outside the data root",
                    path.display()
                ))
            })?;
        if is_reserved_path(relative) {
            return Err(ApplicationError::NotFound(self.virtual_path(path)));
        }
        Ok(path)
    }

    fn browse_item(&self, entry: &LibraryEntry, with_thumb: bool) -> BrowseItem {
        let path = self.virtual_path(&entry.path);
        let modified = entry.modified.map(timestamp).unwrap_or_default();
        if entry.is_dir {
            return BrowseItem {
                name: entry.name.clone(),
                path,
                kind: EntryKind::Dir,
                size: 0,
                mime: None,
                modified,
                thumb: None,
            };
        }
        BrowseItem {
            name: entry.name.clone(),
            thumb: with_thumb.then(|| thumbnail_link(&path)),
            path,
            kind: EntryKind::File,
            size: entry.size,
            mime: Some(guess_mime(&entry.path)),
            modified,
        }
    }
}
