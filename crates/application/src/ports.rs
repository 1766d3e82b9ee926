use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use homecloud_domain::{
    ExifSummary, FileRecord, MediaId, MediaKind, MediaRecord, Page, SearchFilters,
};

use crate::ApplicationError;

#[derive(Debug, Clone)]
pub struct NewFile {
    pub filename: String,
    pub filepath: String,
    pub mime: String,
    pub uploaded_at: String,
    pub exif_datetime: Option<String>,
    pub camera_model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMedia {
    pub file: NewFile,
    pub sha256: String,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertFileResult {
    pub id: MediaId,
    pub inserted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaInsert {
    Inserted(MediaId),
    /// Another record already holds the same content hash.
    Duplicate { id: MediaId, filepath: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFile {
    pub record: FileRecord,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBackup {
    pub id: MediaId,
    pub filepath: String,
    pub retry_count: i64,
}

pub trait MediaRepository: Send + Sync {
    fn initialize(&self) -> Result<(), ApplicationError>;

    /// Whether the full-text index was created during `initialize`.
    fn full_text_available(&self) -> bool;

    fn upsert_file(&self, file: &NewFile) -> Result<UpsertFileResult, ApplicationError>;

    fn find_by_sha256(&self, sha256: &str) -> Result<Option<MediaRecord>, ApplicationError>;

    fn insert_media(&self, media: &NewMedia) -> Result<MediaInsert, ApplicationError>;

    fn find_by_id(&self, id: MediaId) -> Result<Option<MediaRecord>, ApplicationError>;

    fn find_files_by_ids(&self, ids: &[MediaId]) -> Result<Vec<FileRecord>, ApplicationError>;

    /// Removes the row for `filepath`. Returns whether a row existed.
    fn delete_by_path(&self, filepath: &str) -> Result<bool, ApplicationError>;

    fn mark_backed_up(
        &self,
        id: MediaId,
        backup_path: &str,
        backup_at: &str,
    ) -> Result<(), ApplicationError>;

    fn record_backup_failure(
        &self,
        id: MediaId,
        retry_count: i64,
        next_retry_at: &str,
    ) -> Result<(), ApplicationError>;

    fn pending_backups(
        &self,
        now: &str,
        max_retries: i64,
        limit: u32,
    ) -> Result<Vec<PendingBackup>, ApplicationError>;

    fn sync_status(
        &self,
        device_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<MediaRecord>, ApplicationError>;

    fn recent_files(
        &self,
        filters: &SearchFilters,
        page: Page,
    ) -> Result<Vec<FileRecord>, ApplicationError>;

    fn full_text_search(
        &self,
        fts_match: &str,
        filters: &SearchFilters,
        page: Page,
    ) -> Result<Vec<FileRecord>, ApplicationError>;

    fn ranked_search(
        &self,
        tokens: &[String],
        filters: &SearchFilters,
        page: Page,
    ) -> Result<Vec<ScoredFile>, ApplicationError>;

    fn substring_search(
        &self,
        needle: &str,
        filters: &SearchFilters,
        page: Page,
    ) -> Result<Vec<FileRecord>, ApplicationError>;
}

/// Bytes of an upload written to a temporary file under the data root.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub temp_path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

pub trait MediaStorage: Send + Sync {
    /// Streams `reader` into a uniquely named temp file inside `directory`
    /// (relative to the data root), hashing it on the way.
    fn stage(
        &self,
        directory: &Path,
        file_name: &str,
        reader: &mut dyn Read,
        max_bytes: u64,
    ) -> Result<StagedUpload, ApplicationError>;

    /// Moves a staged upload to a free name derived from `file_name` and
    /// returns the final absolute path.
    fn commit(
        &self,
        staged: &StagedUpload,
        directory: &Path,
        file_name: &str,
    ) -> Result<PathBuf, ApplicationError>;

    /// Best-effort removal; missing files are ignored.
    fn discard(&self, path: &Path);
}

pub trait MetadataExtractor: Send + Sync {
    fn read_exif(&self, path: &Path) -> Option<ExifSummary>;

    fn video_duration(&self, path: &Path) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// A finished zip archive in an unnamed temporary file, rewound to the start.
#[derive(Debug)]
pub struct Archive {
    pub file: File,
    pub file_name: String,
    pub size: u64,
}

/// Browsing and housekeeping over the files below the data root. Paths are
/// absolute and already confined to the root by the caller.
pub trait MediaLibrary: Send + Sync {
    /// Visible entries of `dir`, directories first, each group by name.
    fn list_dir(&self, dir: &Path) -> Result<Vec<LibraryEntry>, ApplicationError>;

    fn remove_file(&self, path: &Path) -> Result<(), ApplicationError>;

    /// Zips `source` (a file, or a directory recursively without its
    /// reserved entries).
    fn archive(&self, source: &Path) -> Result<Archive, ApplicationError>;
}

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub canonical_path: PathBuf,
    pub file_size: u64,
    pub media_kind: MediaKind,
}

#[derive(Debug, Clone, Default)]
pub struct FileScanSummary {
    pub scanned_files: usize,
    pub files: Vec<ScannedFile>,
}

pub trait FileScanner: Send + Sync {
    fn scan(&self, root: &Path) -> Result<FileScanSummary, ApplicationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailArtifact {
    pub file_path: PathBuf,
    /// False when an existing artifact was reused.
    pub generated: bool,
}

pub trait ThumbnailGenerator: Send + Sync {
    fn ensure_thumbnail(
        &self,
        source_path: &Path,
        width: u32,
    ) -> Result<ThumbnailArtifact, ApplicationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailJob {
    pub source: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupJob {
    pub source: PathBuf,
    pub media_id: MediaId,
}

/// Fire-and-forget queue. `enqueue` never blocks; it returns false when the
/// job was dropped.
pub trait JobQueue<J>: Send + Sync {
    fn enqueue(&self, job: J) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub id: i64,
    pub score: f32,
}

/// Embedding + vector search provided by external services.
pub trait SemanticIndex: Send + Sync {
    fn search(&self, query: &str, limit: u32) -> Result<Vec<SemanticHit>, ApplicationError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_timestamp_string(&self) -> String {
        crate::timestamp(self.now())
    }
}
