mod backup;
mod clock;
mod library;
mod metadata;
pub mod sandbox;
mod scanner;
mod storage;
mod thumbs;

pub use backup::{BackupOutcome, FsBackupReplicator};
pub use clock::SystemClock;
pub use library::FsMediaLibrary;
pub use metadata::{normalize_exif_datetime, KamadakExifReader};
pub use sandbox::{resolve, SandboxError};
pub use scanner::WalkdirFileScanner;
pub use storage::FsMediaStorage;
pub use thumbs::{FsThumbnailGenerator, Renderer, ThumbnailRegistry};
