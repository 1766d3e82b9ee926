use std::path::{Path, PathBuf};
use std::sync::Arc;

use homecloud_domain::path::{sanitize_component, virtual_path};
use homecloud_domain::{
    detect_media_kind, guess_mime, ExifSummary, IndexReport, MediaId, MediaKind, MediaRecord,
};
use tracing::{debug, info, warn};

use crate::{
    ApplicationError, BackupJob, BackupRetryPolicy, BootstrapCatalogCommand, Clock,
    DescribeFileCommand, FileScanner, IndexDataDirCommand, IngestCommand, JobQueue, MediaInsert,
    MediaLibrary, MediaRepository, MediaStorage, MetadataExtractor, NewFile, NewMedia,
    RetryBackupsCommand, SemanticIndex, StagedUpload, SyncStatusQuery, ThumbnailArtifact,
    ThumbnailCommand, ThumbnailGenerator, ThumbnailJob,
};

pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 360;
const SHARED_UPLOAD_DIR: &str = "uploads";
const DEVICE_UPLOAD_DIR: &str = "devices";
const UNKNOWN_DEVICE: &str = "unknown";
const SYNC_STATUS_LIMIT: u32 = 200;
const RETRY_BATCH_SIZE: u32 = 500;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Canonical data root; stored file paths live below it.
    pub data_root: PathBuf,
    pub max_upload_bytes: u64,
    pub thumbnail_width: u32,
    pub media_server_url: Option<String>,
    pub backup_retry: BackupRetryPolicy,
}

impl ServiceSettings {
    pub fn new(data_root: PathBuf) -> Self {
        Self {
            data_root,
            max_upload_bytes: 3 << 30,
            thumbnail_width: DEFAULT_THUMBNAIL_WIDTH,
            media_server_url: None,
            backup_retry: BackupRetryPolicy::default(),
        }
    }
}

pub struct ServicePorts {
    pub catalog: Arc<dyn MediaRepository>,
    pub storage: Box<dyn MediaStorage>,
    pub library: Arc<dyn MediaLibrary>,
    pub scanner: Box<dyn FileScanner>,
    pub metadata: Box<dyn MetadataExtractor>,
    pub thumbnails: Arc<dyn ThumbnailGenerator>,
    pub thumbnail_queue: Arc<dyn JobQueue<ThumbnailJob>>,
    pub backup_queue: Arc<dyn JobQueue<BackupJob>>,
    pub semantic: Option<Box<dyn SemanticIndex>>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub id: MediaId,
    /// Virtual path of the stored file (the existing one when skipped).
    pub path: String,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaDescription {
    pub exif: Option<ExifSummary>,
    pub duration_seconds: Option<f64>,
}

pub struct ApplicationService {
    pub(crate) catalog: Arc<dyn MediaRepository>,
    storage: Box<dyn MediaStorage>,
    pub(crate) library: Arc<dyn MediaLibrary>,
    scanner: Box<dyn FileScanner>,
    metadata: Box<dyn MetadataExtractor>,
    thumbnails: Arc<dyn ThumbnailGenerator>,
    thumbnail_queue: Arc<dyn JobQueue<ThumbnailJob>>,
    backup_queue: Arc<dyn JobQueue<BackupJob>>,
    pub(crate) semantic: Option<Box<dyn SemanticIndex>>,
    clock: Arc<dyn Clock>,
    pub(crate) settings: ServiceSettings,
}

impl ApplicationService {
    pub fn new(ports: ServicePorts, settings: ServiceSettings) -> Self {
        Self {
            catalog: ports.catalog,
            storage: ports.storage,
            library: ports.library,
            scanner: ports.scanner,
            metadata: ports.metadata,
            thumbnails: ports.thumbnails,
            thumbnail_queue: ports.thumbnail_queue,
            backup_queue: ports.backup_queue,
            semantic: ports.semantic,
            clock: ports.clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn bootstrap_catalog(
        &self,
        _command: BootstrapCatalogCommand,
    ) -> Result<(), ApplicationError> {
        self.catalog.initialize()
    }

    pub fn ingest(&self, command: IngestCommand<'_>) -> Result<IngestReport, ApplicationError> {
        let file_name = sanitize_component(&command.filename).ok_or_else(|| {
            ApplicationError::InvalidInput("a file name is required".to_string())
        })?;
        let device_id = command.device_id.as_deref().map(|raw| {
            sanitize_component(raw).unwrap_or_else(|| UNKNOWN_DEVICE.to_string())
        });
        let directory = match &device_id {
            Some(device) => PathBuf::from(DEVICE_UPLOAD_DIR).join(device),
            None => PathBuf::from(SHARED_UPLOAD_DIR),
        };

        let staged = self.storage.stage(
            &directory,
            &file_name,
            command.reader,
            self.settings.max_upload_bytes,
        )?;

        match self.store_staged(&staged, &directory, &file_name, device_id) {
            Ok(report) => Ok(report),
            Err(error) => {
                self.storage.discard(&staged.temp_path);
                Err(error)
            }
        }
    }

    fn store_staged(
        &self,
        staged: &StagedUpload,
        directory: &Path,
        file_name: &str,
        device_id: Option<String>,
    ) -> Result<IngestReport, ApplicationError> {
        if let Some(existing) = self.catalog.find_by_sha256(&staged.sha256)? {
            self.storage.discard(&staged.temp_path);
            debug!(sha256 = %staged.sha256, "duplicate upload skipped");
            return Ok(self.skipped(existing.file.id, &existing.file.filepath));
        }

        let final_path = self.storage.commit(staged, directory, file_name)?;
        let exif = match detect_media_kind(&final_path) {
            MediaKind::Image => self.metadata.read_exif(&final_path).unwrap_or_default(),
            _ => ExifSummary::default(),
        };

        let stored_name = final_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.to_string());
        let media = NewMedia {
            file: NewFile {
                filename: stored_name,
                filepath: final_path.to_string_lossy().to_string(),
                mime: guess_mime(&final_path),
                uploaded_at: self.clock.now_timestamp_string(),
                exif_datetime: exif.datetime,
                camera_model: exif.camera_model,
            },
            sha256: staged.sha256.clone(),
            device_id: device_id.clone(),
        };

        let id = match self.catalog.insert_media(&media) {
            Ok(MediaInsert::Inserted(id)) => id,
            Ok(MediaInsert::Duplicate { id, filepath }) => {
                self.storage.discard(&final_path);
                debug!(sha256 = %staged.sha256, "concurrent duplicate upload skipped");
                return Ok(self.skipped(id, &filepath));
            }
            Err(error) => {
                self.storage.discard(&final_path);
                return Err(error);
            }
        };

        info!(
            id = id.get(),
            path = %final_path.display(),
            bytes = staged.size,
            "stored upload"
        );

        self.queue_thumbnail(&final_path);
        if device_id.is_some() && !self.backup_queue.enqueue(BackupJob {
            source: final_path.clone(),
            media_id: id,
        }) {
            warn!(id = id.get(), "backup queue full; left for the retry scan");
        }

        Ok(IngestReport {
            id,
            path: virtual_path(&self.settings.data_root, &final_path),
            skipped: false,
        })
    }

    fn skipped(&self, id: MediaId, filepath: &str) -> IngestReport {
        IngestReport {
            id,
            path: virtual_path(&self.settings.data_root, Path::new(filepath)),
            skipped: true,
        }
    }

    fn queue_thumbnail(&self, source: &Path) -> bool {
        let queued = self.thumbnail_queue.enqueue(ThumbnailJob {
            source: source.to_path_buf(),
        });
        if !queued {
            debug!(path = %source.display(), "thumbnail queue full; job dropped");
        }
        queued
    }

    /// Records every file under the data root and queues thumbnails for media.
    pub fn index_data_dir(
        &self,
        _command: IndexDataDirCommand,
    ) -> Result<IndexReport, ApplicationError> {
        let scan = self.scanner.scan(&self.settings.data_root)?;
        let now = self.clock.now_timestamp_string();
        let mut report = IndexReport {
            scanned_files: scan.scanned_files,
            ..IndexReport::default()
        };

        for file in scan.files {
            let filename = file
                .canonical_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let upsert = self.catalog.upsert_file(&NewFile {
                filename,
                filepath: file.canonical_path.to_string_lossy().to_string(),
                mime: guess_mime(&file.canonical_path),
                uploaded_at: now.clone(),
                exif_datetime: None,
                camera_model: None,
            });
            if let Err(error) = upsert {
                warn!(path = %file.canonical_path.display(), %error, "index upsert failed");
                continue;
            }
            report.indexed_files += 1;
            report.indexed_bytes += file.file_size;

            if file.media_kind != MediaKind::Other && self.queue_thumbnail(&file.canonical_path) {
                report.thumbnails_queued += 1;
            }
        }

        info!(
            scanned = report.scanned_files,
            indexed = report.indexed_files,
            bytes = report.indexed_bytes,
            "indexed data directory"
        );
        Ok(report)
    }

    /// Re-queues device uploads whose backup failed and whose backoff elapsed.
    pub fn retry_pending_backups(
        &self,
        _command: RetryBackupsCommand,
    ) -> Result<usize, ApplicationError> {
        let pending = self.catalog.pending_backups(
            &self.clock.now_timestamp_string(),
            self.settings.backup_retry.max_retries,
            RETRY_BATCH_SIZE,
        )?;

        let mut queued = 0;
        for backup in pending {
            let accepted = self.backup_queue.enqueue(BackupJob {
                source: PathBuf::from(&backup.filepath),
                media_id: backup.id,
            });
            if !accepted {
                break;
            }
            queued += 1;
        }
        if queued > 0 {
            info!(queued, "re-queued pending backups");
        }
        Ok(queued)
    }

    pub fn sync_status(
        &self,
        query: SyncStatusQuery,
    ) -> Result<Vec<MediaRecord>, ApplicationError> {
        let device = query
            .device_id
            .as_deref()
            .map(str::trim)
            .filter(|device| !device.is_empty());
        self.catalog.sync_status(device, SYNC_STATUS_LIMIT)
    }

    pub fn virtual_path(&self, absolute: &Path) -> String {
        virtual_path(&self.settings.data_root, absolute)
    }

    pub fn thumbnail(
        &self,
        command: ThumbnailCommand,
    ) -> Result<ThumbnailArtifact, ApplicationError> {
        if !command.source.is_file() {
            return Err(ApplicationError::NotFound(format!(
                "no file at {}",
                self.virtual_path(&command.source)
            )));
        }
        self.thumbnails
            .ensure_thumbnail(&command.source, command.width)
    }

    pub fn describe_file(&self, command: DescribeFileCommand) -> MediaDescription {
        match detect_media_kind(&command.path) {
            MediaKind::Image => MediaDescription {
                exif: self.metadata.read_exif(&command.path),
                duration_seconds: None,
            },
            MediaKind::Video => MediaDescription {
                exif: None,
                duration_seconds: self.metadata.video_duration(&command.path),
            },
            MediaKind::Other => MediaDescription::default(),
        }
    }
}
