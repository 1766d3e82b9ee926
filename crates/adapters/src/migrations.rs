use std::collections::HashSet;

use rusqlite::{Connection, Result};
use tracing::{info, warn};

pub const CREATE_FILES: &str = "CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    filepath TEXT NOT NULL UNIQUE,
    mime TEXT,
    uploaded_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    exif_datetime TEXT,
    camera_model TEXT
)";

/// Columns added to pre-existing `files` tables, with their definitions.
/// SQLite only accepts constant defaults in `ADD COLUMN`.
pub const FILE_COLUMNS: &[(&str, &str)] = &[
    ("mime", "TEXT"),
    ("uploaded_at", "DATETIME"),
    ("exif_datetime", "TEXT"),
    ("camera_model", "TEXT"),
    ("sha256", "TEXT"),
    ("device_id", "TEXT"),
    ("backed_up", "INTEGER NOT NULL DEFAULT 0"),
    ("backup_path", "TEXT"),
    ("backup_at", "TEXT"),
    ("retry_count", "INTEGER NOT NULL DEFAULT 0"),
    ("next_retry_at", "TEXT"),
];

pub const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_files_filename ON files(filename)",
    "CREATE INDEX IF NOT EXISTS idx_files_uploaded_at ON files(uploaded_at)",
    "CREATE INDEX IF NOT EXISTS idx_files_mime ON files(mime)",
    "CREATE INDEX IF NOT EXISTS idx_files_device_id ON files(device_id)",
    "CREATE INDEX IF NOT EXISTS idx_files_sha256 ON files(sha256)",
    "CREATE INDEX IF NOT EXISTS idx_files_exif_datetime ON files(exif_datetime)",
    "CREATE INDEX IF NOT EXISTS idx_files_backed_up ON files(backed_up)",
];

const FTS_SUPPORT_CHECK: &str = "CREATE VIRTUAL TABLE IF NOT EXISTS temp.fts_check USING fts5(x);
DROP TABLE IF EXISTS temp.fts_check;";

const FTS_SCHEMA: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
    filename, exif_datetime, camera_model, filepath, mime,
    content='files', content_rowid='id'
);
INSERT INTO files_fts(files_fts) VALUES('rebuild');
CREATE TRIGGER IF NOT EXISTS files_fts_ai AFTER INSERT ON files BEGIN
    INSERT INTO files_fts(rowid, filename, exif_datetime, camera_model, filepath, mime)
    VALUES (new.id, new.filename, new.exif_datetime, new.camera_model, new.filepath, new.mime);
END;
CREATE TRIGGER IF NOT EXISTS files_fts_ad AFTER DELETE ON files BEGIN
    INSERT INTO files_fts(files_fts, rowid, filename, exif_datetime, camera_model, filepath, mime)
    VALUES ('delete', old.id, old.filename, old.exif_datetime, old.camera_model, old.filepath, old.mime);
END;
CREATE TRIGGER IF NOT EXISTS files_fts_au AFTER UPDATE OF filename, exif_datetime, camera_model, filepath, mime ON files BEGIN
    INSERT INTO files_fts(files_fts, rowid, filename, exif_datetime, camera_model, filepath, mime)
    VALUES ('delete', old.id, old.filename, old.exif_datetime, old.camera_model, old.filepath, old.mime);
    INSERT INTO files_fts(rowid, filename, exif_datetime, camera_model, filepath, mime)
    VALUES (new.id, new.filename, new.exif_datetime, new.camera_model, new.filepath, new.mime);
END;
";

/// Brings the schema up to date. Returns whether full-text search is usable.
pub fn migrate(conn: &Connection) -> Result<bool> {
    conn.execute_batch(CREATE_FILES)?;
    add_missing_columns(conn)?;

    for statement in INDEXES {
        if let Err(error) = conn.execute_batch(statement) {
            warn!(%error, statement, "index creation failed");
        }
    }

    Ok(ensure_full_text(conn))
}

fn existing_columns(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(files)")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    names.collect()
}

fn add_missing_columns(conn: &Connection) -> Result<()> {
    let existing = existing_columns(conn)?;
    for (column, definition) in FILE_COLUMNS {
        if existing.contains(*column) {
            continue;
        }
        conn.execute_batch(&format!("ALTER TABLE files ADD COLUMN {column} {definition}"))?;
        info!(column, "added column to files");
    }
    Ok(())
}

fn ensure_full_text(conn: &Connection) -> bool {
    if let Err(error) = conn.execute_batch(FTS_SUPPORT_CHECK) {
        warn!(%error, "FTS5 unavailable; search uses ranked scans");
        return false;
    }
    match conn.execute_batch(FTS_SCHEMA) {
        Ok(()) => true,
        Err(error) => {
            warn!(%error, "full-text index setup failed; search uses ranked scans");
            false
        }
    }
}
