mod backup;
mod error;
mod library;
mod ports;
mod search;
mod service;
mod use_cases;

use chrono::{DateTime, SecondsFormat, Utc};

pub use backup::BackupRetryPolicy;
pub use error::ApplicationError;
pub use library::DeleteReport;
pub use ports::{
    Archive, BackupJob, Clock, FileScanSummary, FileScanner, JobQueue, LibraryEntry, MediaInsert,
    MediaLibrary, MediaRepository, MediaStorage, MetadataExtractor, NewFile, NewMedia,
    PendingBackup, ScannedFile, ScoredFile, SemanticHit, SemanticIndex, StagedUpload,
    ThumbnailArtifact, ThumbnailGenerator, ThumbnailJob, UpsertFileResult,
};
pub use search::{MAX_REGEX_LEN, REGEX_SCAN_CAP};
pub use service::{
    ApplicationService, IngestReport, MediaDescription, ServicePorts, ServiceSettings,
    DEFAULT_THUMBNAIL_WIDTH,
};
pub use use_cases::{
    ArchiveCommand, BootstrapCatalogCommand, BrowseCommand, DeleteFileCommand,
    DescribeFileCommand, GridCommand, IndexDataDirCommand, IngestCommand, ListFilesCommand,
    RetryBackupsCommand, SearchCommand, SyncStatusQuery, ThumbnailCommand,
};

/// Timestamps are stored as RFC 3339 UTC with second precision so they sort
/// lexically and SQLite's `date()` understands them.
pub fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}
