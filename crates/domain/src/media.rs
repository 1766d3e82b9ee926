use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaId(i64);

impl MediaId {
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value <= 0 {
            return Err(DomainError::InvalidMediaId(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

/// A row of the `files` table as seen by search and listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: MediaId,
    pub filename: String,
    pub filepath: String,
    pub mime: Option<String>,
    pub uploaded_at: String,
    pub exif_datetime: Option<String>,
    pub camera_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackupState {
    pub backed_up: bool,
    pub backup_path: Option<String>,
    pub backup_at: Option<String>,
    pub retry_count: i64,
}

/// Device-sync view of a file: the file record plus dedup and backup tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRecord {
    pub file: FileRecord,
    pub sha256: Option<String>,
    pub device_id: Option<String>,
    pub backup: BackupState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifSummary {
    pub datetime: Option<String>,
    pub camera_model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub scanned_files: usize,
    pub indexed_files: usize,
    pub indexed_bytes: u64,
    pub thumbnails_queued: usize,
}

pub fn detect_media_kind(path: &Path) -> MediaKind {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return MediaKind::Other;
    };

    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "png" | "webp" | "bmp" | "tif" | "tiff" | "gif" | "heic" => {
            MediaKind::Image
        }
        "mp4" | "mov" | "m4v" | "mkv" | "avi" | "webm" | "3gp" => MediaKind::Video,
        _ => MediaKind::Other,
    }
}

/// Content type inferred from the file extension.
pub fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}
