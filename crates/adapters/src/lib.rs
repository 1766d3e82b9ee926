pub mod fs;
pub mod migrations;
pub mod presenters;
pub mod semantic;
pub mod sqlite;
pub mod workers;

pub use fs::{
    resolve, BackupOutcome, FsBackupReplicator, FsMediaLibrary, FsMediaStorage,
    FsThumbnailGenerator, KamadakExifReader, SandboxError, SystemClock, WalkdirFileScanner,
};
pub use presenters::{
    present_index_report, present_media_item, present_search_results, present_sync_row,
};
pub use semantic::HttpSemanticIndex;
pub use sqlite::SqliteMediaRepository;
pub use workers::{
    JobHandler, PoolMetrics, WorkerPool, BACKUP_QUEUE_CAPACITY, THUMBNAIL_QUEUE_CAPACITY,
};
