use std::io::Read;
use std::path::PathBuf;

use homecloud_domain::{Page, SearchFilters};

#[derive(Debug, Clone, Default)]
pub struct BootstrapCatalogCommand;

pub struct IngestCommand<'a> {
    pub reader: &'a mut dyn Read,
    pub filename: String,
    /// Set for device-sync uploads; those are also queued for backup.
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IndexDataDirCommand;

#[derive(Debug, Clone, Default)]
pub struct RetryBackupsCommand;

#[derive(Debug, Clone, Default)]
pub struct SyncStatusQuery {
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchCommand {
    pub query: String,
    pub page: Page,
    pub filters: SearchFilters,
    pub regex: bool,
    pub semantic: bool,
}

#[derive(Debug, Clone)]
pub struct ThumbnailCommand {
    pub source: PathBuf,
    pub width: u32,
}

#[derive(Debug, Clone)]
pub struct DescribeFileCommand {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BrowseCommand {
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct GridCommand {
    pub dir: PathBuf,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilesCommand {
    pub page: Page,
}

#[derive(Debug, Clone)]
pub struct DeleteFileCommand {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArchiveCommand {
    pub path: PathBuf,
}
