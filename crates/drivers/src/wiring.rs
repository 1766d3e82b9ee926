use std::sync::Arc;
use std::time::Duration;

use homecloud_adapters::{
    FsBackupReplicator, FsMediaLibrary, FsMediaStorage, FsThumbnailGenerator, HttpSemanticIndex,
    KamadakExifReader, SqliteMediaRepository, SystemClock, WalkdirFileScanner, WorkerPool,
    BACKUP_QUEUE_CAPACITY, THUMBNAIL_QUEUE_CAPACITY,
};
use homecloud_application::{
    ApplicationService, BackupJob, BackupRetryPolicy, Clock, MediaRepository, SemanticIndex,
    ServicePorts, ServiceSettings, ThumbnailJob, DEFAULT_THUMBNAIL_WIDTH,
};
use tracing::{debug, info};

use crate::config::AppConfig;

const DRAIN_POLL: Duration = Duration::from_millis(100);

pub struct Components {
    pub service: Arc<ApplicationService>,
    pub thumbnail_pool: Arc<WorkerPool<ThumbnailJob>>,
    pub backup_pool: Arc<WorkerPool<BackupJob>>,
}

impl Components {
    pub fn start_workers(&self, config: &AppConfig) {
        self.thumbnail_pool.start(config.thumb_workers);
        self.backup_pool.start(config.backup_workers);
    }

    /// Blocks until both pools have finished every accepted job.
    pub fn drain_workers(&self) {
        loop {
            let pending = self.thumbnail_pool.metrics().pending_jobs()
                + self.backup_pool.metrics().pending_jobs();
            if pending == 0 {
                return;
            }
            debug!(pending, "waiting for background jobs");
            std::thread::sleep(DRAIN_POLL);
        }
    }
}

pub fn build_components(config: &AppConfig) -> Components {
    let catalog: Arc<dyn MediaRepository> =
        Arc::new(SqliteMediaRepository::new(config.database_path.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let retry_policy = BackupRetryPolicy {
        max_retries: config.backup_max_retries,
        ..BackupRetryPolicy::default()
    };

    let thumbnails = Arc::new(FsThumbnailGenerator::new(
        config.data_dir.clone(),
        DEFAULT_THUMBNAIL_WIDTH,
    ));
    let thumbnail_pool = Arc::new(WorkerPool::<ThumbnailJob>::new(
        "thumbs",
        THUMBNAIL_QUEUE_CAPACITY,
        thumbnails.clone(),
    ));

    let replicator = Arc::new(FsBackupReplicator::new(
        config.data_dir.clone(),
        config.backup_dir.clone(),
        catalog.clone(),
        clock.clone(),
        retry_policy,
    ));
    let backup_pool = Arc::new(WorkerPool::<BackupJob>::new(
        "backup",
        BACKUP_QUEUE_CAPACITY,
        replicator,
    ));

    let semantic = config.semantic.as_ref().map(|endpoints| {
        info!(
            ai = %endpoints.ai_service_url,
            qdrant = %endpoints.qdrant_url,
            "semantic search enabled"
        );
        Box::new(HttpSemanticIndex::new(
            endpoints.ai_service_url.clone(),
            endpoints.qdrant_url.clone(),
        )) as Box<dyn SemanticIndex>
    });

    let settings = ServiceSettings {
        max_upload_bytes: config.max_upload_bytes,
        media_server_url: config.media_server_url.clone(),
        backup_retry: retry_policy,
        ..ServiceSettings::new(config.data_dir.clone())
    };

    let service = ApplicationService::new(
        ServicePorts {
            catalog,
            storage: Box::new(FsMediaStorage::new(config.data_dir.clone())),
            library: Arc::new(FsMediaLibrary::new(
                config.data_dir.clone(),
                vec![config.backup_dir.clone()],
            )),
            scanner: Box::new(WalkdirFileScanner::new(vec![config.backup_dir.clone()])),
            metadata: Box::new(KamadakExifReader),
            thumbnails,
            thumbnail_queue: thumbnail_pool.clone(),
            backup_queue: backup_pool.clone(),
            semantic,
            clock,
        },
        settings,
    );

    Components {
        service: Arc::new(service),
        thumbnail_pool,
        backup_pool,
    }
}
