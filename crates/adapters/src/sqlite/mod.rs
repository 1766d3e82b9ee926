mod queries;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use homecloud_application::{
    ApplicationError, MediaInsert, MediaRepository, NewFile, NewMedia, PendingBackup, ScoredFile,
    UpsertFileResult,
};
use homecloud_domain::{FileRecord, MediaId, MediaRecord, Page, SearchFilters};
use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use crate::migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn persistence(error: rusqlite::Error) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

#[derive(Debug)]
pub struct SqliteMediaRepository {
    path: PathBuf,
    full_text: AtomicBool,
}

impl SqliteMediaRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            full_text: AtomicBool::new(false),
        }
    }

    fn open_connection(&self) -> Result<Connection, ApplicationError> {
        let conn = Connection::open(&self.path).map_err(persistence)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(persistence)?;
        Ok(conn)
    }

    fn media_id(value: i64) -> Result<MediaId, ApplicationError> {
        Ok(MediaId::new(value)?)
    }
}

impl MediaRepository for SqliteMediaRepository {
    fn initialize(&self) -> Result<(), ApplicationError> {
        if self.path.as_os_str().is_empty() {
            return Err(ApplicationError::InvalidInput(
                "database path must not be empty".to_string(),
            ));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|error| ApplicationError::Io(error.to_string()))?;
            }
        }

        let conn = self.open_connection()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(persistence)?;

        let full_text = migrations::migrate(&conn).map_err(persistence)?;
        self.full_text.store(full_text, Ordering::Release);
        info!(path = %self.path.display(), full_text, "metadata store ready");
        Ok(())
    }

    fn full_text_available(&self) -> bool {
        self.full_text.load(Ordering::Acquire)
    }

    fn upsert_file(&self, file: &NewFile) -> Result<UpsertFileResult, ApplicationError> {
        let mut conn = self.open_connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(persistence)?;

        let existing = queries::find_id_by_path(&tx, &file.filepath).map_err(persistence)?;
        let (id, inserted) = match existing {
            Some(id) => {
                queries::refresh_file(&tx, id, file).map_err(persistence)?;
                (id, false)
            }
            None => (queries::insert_file(&tx, file).map_err(persistence)?, true),
        };
        tx.commit().map_err(persistence)?;

        Ok(UpsertFileResult {
            id: Self::media_id(id)?,
            inserted,
        })
    }

    fn find_by_sha256(&self, sha256: &str) -> Result<Option<MediaRecord>, ApplicationError> {
        let conn = self.open_connection()?;
        queries::find_media_by_sha256(&conn, sha256).map_err(persistence)
    }

    fn insert_media(&self, media: &NewMedia) -> Result<MediaInsert, ApplicationError> {
        let mut conn = self.open_connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(persistence)?;

        if let Some(existing) =
            queries::find_media_by_sha256(&tx, &media.sha256).map_err(persistence)?
        {
            return Ok(MediaInsert::Duplicate {
                id: existing.file.id,
                filepath: existing.file.filepath,
            });
        }

        let id = queries::store_media(&tx, media).map_err(persistence)?;
        tx.commit().map_err(persistence)?;
        Ok(MediaInsert::Inserted(Self::media_id(id)?))
    }

    fn delete_by_path(&self, filepath: &str) -> Result<bool, ApplicationError> {
        let conn = self.open_connection()?;
        queries::delete_by_path(&conn, filepath).map_err(persistence)
    }

    fn find_by_id(&self, id: MediaId) -> Result<Option<MediaRecord>, ApplicationError> {
        let conn = self.open_connection()?;
        queries::find_media_by_id(&conn, id.get()).map_err(persistence)
    }

    fn find_files_by_ids(&self, ids: &[MediaId]) -> Result<Vec<FileRecord>, ApplicationError> {
        let conn = self.open_connection()?;
        let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        queries::find_files_by_ids(&conn, &raw).map_err(persistence)
    }

    fn mark_backed_up(
        &self,
        id: MediaId,
        backup_path: &str,
        backup_at: &str,
    ) -> Result<(), ApplicationError> {
        let conn = self.open_connection()?;
        queries::mark_backed_up(&conn, id.get(), backup_path, backup_at).map_err(persistence)
    }

    fn record_backup_failure(
        &self,
        id: MediaId,
        retry_count: i64,
        next_retry_at: &str,
    ) -> Result<(), ApplicationError> {
        let conn = self.open_connection()?;
        queries::record_backup_failure(&conn, id.get(), retry_count, next_retry_at)
            .map_err(persistence)
    }

    fn pending_backups(
        &self,
        now: &str,
        max_retries: i64,
        limit: u32,
    ) -> Result<Vec<PendingBackup>, ApplicationError> {
        let conn = self.open_connection()?;
        queries::pending_backups(&conn, now, max_retries, limit).map_err(persistence)
    }

    fn sync_status(
        &self,
        device_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<MediaRecord>, ApplicationError> {
        let conn = self.open_connection()?;
        queries::sync_status(&conn, device_id, limit).map_err(persistence)
    }

    fn recent_files(
        &self,
        filters: &SearchFilters,
        page: Page,
    ) -> Result<Vec<FileRecord>, ApplicationError> {
        let conn = self.open_connection()?;
        queries::recent_files(&conn, filters, page).map_err(persistence)
    }

    fn full_text_search(
        &self,
        fts_match: &str,
        filters: &SearchFilters,
        page: Page,
    ) -> Result<Vec<FileRecord>, ApplicationError> {
        if !self.full_text_available() {
            return Err(ApplicationError::Persistence(
                "full-text index is not available".to_string(),
            ));
        }
        let conn = self.open_connection()?;
        queries::full_text_search(&conn, fts_match, filters, page).map_err(persistence)
    }

    fn ranked_search(
        &self,
        tokens: &[String],
        filters: &SearchFilters,
        page: Page,
    ) -> Result<Vec<ScoredFile>, ApplicationError> {
        let conn = self.open_connection()?;
        queries::ranked_search(&conn, tokens, filters, page).map_err(persistence)
    }

    fn substring_search(
        &self,
        needle: &str,
        filters: &SearchFilters,
        page: Page,
    ) -> Result<Vec<FileRecord>, ApplicationError> {
        let conn = self.open_connection()?;
        queries::substring_search(&conn, needle, filters, page).map_err(persistence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homecloud_domain::build_full_text_match;
    use tempfile::TempDir;

    fn repo(dir: &TempDir) -> SqliteMediaRepository {
        let repo = SqliteMediaRepository::new(dir.path().join("db").join("metadata.db"));
        repo.initialize().expect("initialize");
        repo
    }

    fn new_file(name: &str, uploaded_at: &str) -> NewFile {
        NewFile {
            filename: name.to_string(),
            filepath: format!("/data/uploads/{name}"),
            mime: "image/jpeg".to_string(),
            uploaded_at: uploaded_at.to_string(),
            exif_datetime: None,
            camera_model: None,
        }
    }

    fn new_media(name: &str, sha256: &str) -> NewMedia {
        NewMedia {
            file: NewFile {
                filepath: format!("/data/devices/phone/{name}"),
                ..new_file(name, "2026-02-17T00:00:00Z")
            },
            sha256: sha256.to_string(),
            device_id: Some("phone".to_string()),
        }
    }

    #[test]
    fn initialize_creates_schema_and_is_repeatable() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);
        repo.upsert_file(&new_file("a.jpg", "2026-02-17T00:00:00Z"))
            .expect("upsert");
        repo.initialize().expect("second initialize");

        let conn = Connection::open(dir.path().join("db").join("metadata.db")).expect("open");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .expect("query");
        assert_eq!(count, 1);
    }

    #[test]
    fn upsert_same_path_updates_in_place() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);

        let first = repo
            .upsert_file(&new_file("a.jpg", "2026-02-17T00:00:00Z"))
            .expect("first");
        let second = repo
            .upsert_file(&new_file("a.jpg", "2026-02-18T00:00:00Z"))
            .expect("second");

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(first.id, second.id);
        let recent = repo
            .recent_files(&SearchFilters::default(), Page::default())
            .expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].uploaded_at, "2026-02-18T00:00:00Z");
    }

    #[test]
    fn duplicate_hash_is_reported_not_inserted() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);

        let first = repo.insert_media(&new_media("a.jpg", "abc")).expect("first");
        let MediaInsert::Inserted(id) = first else {
            panic!("expected insert, got {first:?}");
        };
        let second = repo.insert_media(&new_media("b.jpg", "abc")).expect("second");

        assert_eq!(
            second,
            MediaInsert::Duplicate {
                id,
                filepath: "/data/devices/phone/a.jpg".to_string(),
            }
        );
        let found = repo.find_by_sha256("abc").expect("find").expect("record");
        assert_eq!(found.device_id.as_deref(), Some("phone"));
        assert!(!found.backup.backed_up);
    }

    #[test]
    fn backup_bookkeeping_drives_pending_list() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);
        let MediaInsert::Inserted(id) = repo.insert_media(&new_media("a.jpg", "h1")).expect("insert")
        else {
            panic!("expected insert");
        };
        let now = "2026-02-17T10:00:00Z";

        assert_eq!(repo.pending_backups(now, 5, 10).expect("pending").len(), 1);

        repo.record_backup_failure(id, 1, "2026-02-17T10:00:30Z")
            .expect("failure");
        assert!(repo.pending_backups(now, 5, 10).expect("pending").is_empty());
        assert_eq!(
            repo.pending_backups("2026-02-17T10:01:00Z", 5, 10)
                .expect("pending")
                .len(),
            1
        );
        assert!(repo
            .pending_backups("2026-02-17T10:01:00Z", 1, 10)
            .expect("pending")
            .is_empty());

        repo.mark_backed_up(id, "/backup/a.jpg", now).expect("mark");
        let record = repo.find_by_id(id).expect("find").expect("record");
        assert!(record.backup.backed_up);
        assert_eq!(record.backup.backup_path.as_deref(), Some("/backup/a.jpg"));
        assert_eq!(record.backup.backup_at.as_deref(), Some(now));
        assert!(repo
            .pending_backups("2026-02-18T00:00:00Z", 5, 10)
            .expect("pending")
            .is_empty());
    }

    #[test]
    fn sync_status_filters_by_device() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);
        repo.insert_media(&new_media("a.jpg", "h1")).expect("insert");
        let mut other = new_media("b.jpg", "h2");
        other.device_id = Some("tablet".to_string());
        other.file.filepath = "/data/devices/tablet/b.jpg".to_string();
        repo.insert_media(&other).expect("insert");
        repo.upsert_file(&new_file("indexed.jpg", "2026-02-17T00:00:00Z"))
            .expect("upsert");

        assert_eq!(repo.sync_status(None, 200).expect("all").len(), 2);
        let phone = repo.sync_status(Some("phone"), 200).expect("phone");
        assert_eq!(phone.len(), 1);
        assert_eq!(phone[0].file.filename, "a.jpg");
    }

    #[test]
    fn ranked_scan_prefers_prefix_matches() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);
        repo.upsert_file(&new_file("sunset.jpg", "2026-02-17T00:00:01Z"))
            .expect("upsert");
        repo.upsert_file(&new_file("sunset_beach.jpg", "2026-02-17T00:00:02Z"))
            .expect("upsert");
        repo.upsert_file(&new_file("my_sunset.jpg", "2026-02-17T00:00:03Z"))
            .expect("upsert");
        repo.upsert_file(&new_file("beach.jpg", "2026-02-17T00:00:04Z"))
            .expect("upsert");

        let hits = repo
            .ranked_search(
                &["sunset".to_string()],
                &SearchFilters::default(),
                Page::default(),
            )
            .expect("ranked");
        let names: Vec<&str> = hits.iter().map(|hit| hit.record.filename.as_str()).collect();
        assert_eq!(names, vec!["sunset.jpg", "sunset_beach.jpg", "my_sunset.jpg"]);
        assert_eq!(hits[0].score, 250.0);
        assert_eq!(hits[2].score, 50.0);
    }

    #[test]
    fn ranked_scan_treats_wildcards_literally() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);
        repo.upsert_file(&new_file("100_percent.jpg", "2026-02-17T00:00:01Z"))
            .expect("upsert");
        repo.upsert_file(&new_file("1000percent.jpg", "2026-02-17T00:00:02Z"))
            .expect("upsert");

        let hits = repo
            .ranked_search(&["0%".to_string()], &SearchFilters::default(), Page::default())
            .expect("ranked");
        assert!(hits.is_empty());
    }

    #[test]
    fn filters_apply_to_recent_listing() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);
        repo.upsert_file(&new_file("a.jpg", "2026-01-10T08:00:00Z"))
            .expect("upsert");
        let mut video = new_file("b.mp4", "2026-02-10T08:00:00Z");
        video.mime = "video/mp4".to_string();
        repo.upsert_file(&video).expect("upsert");

        let only_video = SearchFilters::parse(Some("video/mp4"), None, None);
        let hits = repo
            .recent_files(&only_video, Page::default())
            .expect("recent");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "b.mp4");

        let january = SearchFilters::parse(None, Some("2026-01-01"), Some("2026-01-31"));
        let hits = repo.recent_files(&january, Page::default()).expect("recent");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "a.jpg");
    }

    #[test]
    fn full_text_index_follows_table_changes() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);
        if !repo.full_text_available() {
            return;
        }
        repo.upsert_file(&new_file("holiday_rome.jpg", "2026-02-17T00:00:01Z"))
            .expect("upsert");
        repo.upsert_file(&new_file("office.jpg", "2026-02-17T00:00:02Z"))
            .expect("upsert");

        let fts_match = build_full_text_match("rom").expect("match");
        let hits = repo
            .full_text_search(&fts_match, &SearchFilters::default(), Page::default())
            .expect("fts");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "holiday_rome.jpg");
    }

    fn full_text_hits(repo: &SqliteMediaRepository, query: &str) -> Vec<FileRecord> {
        let fts_match = build_full_text_match(query).expect("match");
        repo.full_text_search(&fts_match, &SearchFilters::default(), Page::default())
            .expect("fts")
    }

    #[test]
    fn full_text_index_tracks_takeover_and_delete() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);
        if !repo.full_text_available() {
            return;
        }
        repo.upsert_file(&NewFile {
            filepath: "/data/devices/phone/holiday.jpg".to_string(),
            ..new_file("holiday.jpg", "2026-02-17T00:00:01Z")
        })
        .expect("upsert");
        assert!(full_text_hits(&repo, "Pixel").is_empty());

        let mut synced = new_media("holiday.jpg", "h1");
        synced.file.camera_model = Some("Pixel 8".to_string());
        repo.insert_media(&synced).expect("takeover");

        let hits = full_text_hits(&repo, "Pixel");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filepath, "/data/devices/phone/holiday.jpg");
        assert_eq!(full_text_hits(&repo, "holiday").len(), 1);

        assert!(repo
            .delete_by_path("/data/devices/phone/holiday.jpg")
            .expect("delete"));
        assert!(full_text_hits(&repo, "holiday").is_empty());
        assert!(full_text_hits(&repo, "Pixel").is_empty());
        assert!(!repo
            .delete_by_path("/data/devices/phone/holiday.jpg")
            .expect("second delete"));
    }

    #[test]
    fn ranked_scan_requires_every_token_in_some_column() {
        let dir = TempDir::new().expect("tempdir");
        let repo = repo(&dir);
        let located = |name: &str, dir: &str, camera: &str, at: &str| NewFile {
            filepath: format!("/data/{dir}/{name}"),
            camera_model: Some(camera.to_string()),
            ..new_file(name, at)
        };
        repo.upsert_file(&located("rome.jpg", "italy", "Canon", "2026-02-17T00:00:01Z"))
            .expect("upsert");
        repo.upsert_file(&located("rome2.jpg", "france", "Canon", "2026-02-17T00:00:02Z"))
            .expect("upsert");
        repo.upsert_file(&located("italy.jpg", "uploads", "Nikon", "2026-02-17T00:00:03Z"))
            .expect("upsert");

        let search = |tokens: &[&str]| {
            let tokens: Vec<String> = tokens.iter().map(|token| token.to_string()).collect();
            repo.ranked_search(&tokens, &SearchFilters::default(), Page::default())
                .expect("ranked")
        };

        let by_path = search(&["rome", "italy"]);
        let names: Vec<&str> = by_path.iter().map(|hit| hit.record.filename.as_str()).collect();
        assert_eq!(names, vec!["rome.jpg"]);

        let by_camera = search(&["rome", "canon"]);
        let names: Vec<&str> = by_camera
            .iter()
            .map(|hit| hit.record.filename.as_str())
            .collect();
        assert_eq!(names, vec!["rome.jpg", "rome2.jpg"]);
        assert_eq!(by_camera[0].score, 270.0);
    }
}
