use homecloud_application::{NewFile, NewMedia, PendingBackup, ScoredFile};
use homecloud_domain::{BackupState, FileRecord, MediaId, MediaRecord, Page, SearchFilters};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result, Row};

const FILE_COLUMNS: &str = "id, filename, filepath, mime, uploaded_at, exif_datetime, camera_model";
const MEDIA_COLUMNS: &str = "id, filename, filepath, mime, uploaded_at, exif_datetime, camera_model, \
     sha256, device_id, backed_up, backup_path, backup_at, retry_count";

const PREFIX_SCORE: i64 = 200;
const FILENAME_TOKEN_SCORE: i64 = 50;
const CAMERA_TOKEN_SCORE: i64 = 20;

fn media_id(value: i64) -> Result<MediaId> {
    MediaId::new(value)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error)))
}

fn file_from_row(row: &Row<'_>) -> Result<FileRecord> {
    Ok(FileRecord {
        id: media_id(row.get(0)?)?,
        filename: row.get(1)?,
        filepath: row.get(2)?,
        mime: row.get(3)?,
        uploaded_at: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        exif_datetime: row.get(5)?,
        camera_model: row.get(6)?,
    })
}

fn media_from_row(row: &Row<'_>) -> Result<MediaRecord> {
    Ok(MediaRecord {
        file: file_from_row(row)?,
        sha256: row.get(7)?,
        device_id: row.get(8)?,
        backup: BackupState {
            backed_up: row.get::<_, i64>(9)? != 0,
            backup_path: row.get(10)?,
            backup_at: row.get(11)?,
            retry_count: row.get(12)?,
        },
    })
}

/// `a%b_c\` -> `a\%b\_c\\` for use with `LIKE ? ESCAPE '\'`.
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn contains_pattern(token: &str) -> Value {
    Value::Text(format!("%{}%", escape_like(token)))
}

/// Appends the optional mime/date conditions. `table` qualifies the columns
/// when the query joins the full-text table.
fn push_filters(
    filters: &SearchFilters,
    table: &str,
    clauses: &mut Vec<String>,
    args: &mut Vec<Value>,
) {
    if let Some(mime) = &filters.mime {
        clauses.push(format!("{table}mime = ?"));
        args.push(Value::Text(mime.clone()));
    }
    if let Some(from) = filters.date_from {
        clauses.push(format!("date({table}uploaded_at) >= date(?)"));
        args.push(Value::Text(from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = filters.date_to {
        clauses.push(format!("date({table}uploaded_at) <= date(?)"));
        args.push(Value::Text(to.format("%Y-%m-%d").to_string()));
    }
}

fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

fn push_page(page: Page, args: &mut Vec<Value>) {
    args.push(Value::Integer(i64::from(page.limit)));
    args.push(Value::Integer(i64::from(page.offset)));
}

fn query_files(conn: &Connection, sql: &str, args: Vec<Value>) -> Result<Vec<FileRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(args), file_from_row)?;
    rows.collect()
}

pub fn find_id_by_path(conn: &Connection, filepath: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM files WHERE filepath = ?1",
        params![filepath],
        |row| row.get(0),
    )
    .optional()
}

pub fn insert_file(conn: &Connection, file: &NewFile) -> Result<i64> {
    conn.execute(
        "INSERT INTO files (filename, filepath, mime, uploaded_at, exif_datetime, camera_model)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            file.filename,
            file.filepath,
            file.mime,
            file.uploaded_at,
            file.exif_datetime,
            file.camera_model,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Refreshes mime and timestamp; EXIF columns only change when new values are known.
pub fn refresh_file(conn: &Connection, id: i64, file: &NewFile) -> Result<()> {
    conn.execute(
        "UPDATE files SET
            mime = ?1,
            uploaded_at = ?2,
            exif_datetime = COALESCE(?3, exif_datetime),
            camera_model = COALESCE(?4, camera_model)
         WHERE id = ?5",
        params![
            file.mime,
            file.uploaded_at,
            file.exif_datetime,
            file.camera_model,
            id
        ],
    )?;
    Ok(())
}

pub fn find_media_by_sha256(conn: &Connection, sha256: &str) -> Result<Option<MediaRecord>> {
    conn.query_row(
        &format!("SELECT {MEDIA_COLUMNS} FROM files WHERE sha256 = ?1 ORDER BY id LIMIT 1"),
        params![sha256],
        media_from_row,
    )
    .optional()
}

pub fn find_media_by_id(conn: &Connection, id: i64) -> Result<Option<MediaRecord>> {
    conn.query_row(
        &format!("SELECT {MEDIA_COLUMNS} FROM files WHERE id = ?1"),
        params![id],
        media_from_row,
    )
    .optional()
}

/// Writes a synced upload. A row left behind for the same path is taken over.
pub fn store_media(conn: &Connection, media: &NewMedia) -> Result<i64> {
    let file = &media.file;
    conn.execute(
        "INSERT INTO files
            (filename, filepath, mime, uploaded_at, exif_datetime, camera_model, sha256, device_id,
             backed_up, backup_path, backup_at, retry_count, next_retry_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, NULL, 0, NULL)
         ON CONFLICT(filepath) DO UPDATE SET
            filename = excluded.filename,
            mime = excluded.mime,
            uploaded_at = excluded.uploaded_at,
            exif_datetime = excluded.exif_datetime,
            camera_model = excluded.camera_model,
            sha256 = excluded.sha256,
            device_id = excluded.device_id,
            backed_up = 0,
            backup_path = NULL,
            backup_at = NULL,
            retry_count = 0,
            next_retry_at = NULL",
        params![
            file.filename,
            file.filepath,
            file.mime,
            file.uploaded_at,
            file.exif_datetime,
            file.camera_model,
            media.sha256,
            media.device_id,
        ],
    )?;
    conn.query_row(
        "SELECT id FROM files WHERE filepath = ?1",
        params![file.filepath],
        |row| row.get(0),
    )
}

/// True when a row was removed.
pub fn delete_by_path(conn: &Connection, filepath: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM files WHERE filepath = ?1", params![filepath])?;
    Ok(removed > 0)
}

pub fn find_files_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<FileRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id IN ({placeholders})");
    let args = ids.iter().map(|id| Value::Integer(*id)).collect();
    query_files(conn, &sql, args)
}

pub fn mark_backed_up(conn: &Connection, id: i64, backup_path: &str, backup_at: &str) -> Result<()> {
    conn.execute(
        "UPDATE files
         SET backed_up = 1, backup_path = ?1, backup_at = ?2, next_retry_at = NULL
         WHERE id = ?3",
        params![backup_path, backup_at, id],
    )?;
    Ok(())
}

pub fn record_backup_failure(
    conn: &Connection,
    id: i64,
    retry_count: i64,
    next_retry_at: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE files SET retry_count = ?1, next_retry_at = ?2 WHERE id = ?3",
        params![retry_count, next_retry_at, id],
    )?;
    Ok(())
}

pub fn pending_backups(
    conn: &Connection,
    now: &str,
    max_retries: i64,
    limit: u32,
) -> Result<Vec<PendingBackup>> {
    let mut stmt = conn.prepare(
        "SELECT id, filepath, retry_count FROM files
         WHERE device_id IS NOT NULL
           AND backed_up = 0
           AND retry_count < ?1
           AND (next_retry_at IS NULL OR next_retry_at <= ?2)
         ORDER BY id
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![max_retries, now, i64::from(limit)], |row| {
        Ok(PendingBackup {
            id: media_id(row.get(0)?)?,
            filepath: row.get(1)?,
            retry_count: row.get(2)?,
        })
    })?;
    rows.collect()
}

pub fn sync_status(
    conn: &Connection,
    device_id: Option<&str>,
    limit: u32,
) -> Result<Vec<MediaRecord>> {
    let mut clauses = vec!["sha256 IS NOT NULL".to_string()];
    let mut args = Vec::new();
    if let Some(device) = device_id {
        clauses.push("device_id = ?".to_string());
        args.push(Value::Text(device.to_string()));
    }
    args.push(Value::Integer(i64::from(limit)));
    let sql = format!(
        "SELECT {MEDIA_COLUMNS} FROM files{} ORDER BY uploaded_at DESC, id DESC LIMIT ?",
        where_sql(&clauses)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), media_from_row)?;
    rows.collect()
}

pub fn recent_files(
    conn: &Connection,
    filters: &SearchFilters,
    page: Page,
) -> Result<Vec<FileRecord>> {
    let mut clauses = Vec::new();
    let mut args = Vec::new();
    push_filters(filters, "", &mut clauses, &mut args);
    push_page(page, &mut args);
    let sql = format!(
        "SELECT {FILE_COLUMNS} FROM files{} ORDER BY uploaded_at DESC, id DESC LIMIT ? OFFSET ?",
        where_sql(&clauses)
    );
    query_files(conn, &sql, args)
}

pub fn full_text_search(
    conn: &Connection,
    fts_match: &str,
    filters: &SearchFilters,
    page: Page,
) -> Result<Vec<FileRecord>> {
    let mut clauses = vec!["files_fts MATCH ?".to_string()];
    let mut args = vec![Value::Text(fts_match.to_string())];
    push_filters(filters, "f.", &mut clauses, &mut args);
    push_page(page, &mut args);
    let sql = format!(
        "SELECT f.id, f.filename, f.filepath, f.mime, f.uploaded_at, f.exif_datetime, f.camera_model
         FROM files_fts JOIN files f ON f.id = files_fts.rowid{}
         ORDER BY f.uploaded_at DESC, f.id DESC LIMIT ? OFFSET ?",
        where_sql(&clauses)
    );
    query_files(conn, &sql, args)
}

/// Every token must appear in one of the searchable columns. The score is
/// computed in SQL from bound patterns: a filename prefix match on the first
/// token, plus per-token hits in the filename and camera model.
pub fn ranked_search(
    conn: &Connection,
    tokens: &[String],
    filters: &SearchFilters,
    page: Page,
) -> Result<Vec<ScoredFile>> {
    let Some(first) = tokens.first() else {
        return Ok(Vec::new());
    };

    let mut args = Vec::new();
    let mut score_terms = vec![format!(
        "CASE WHEN filename LIKE ? ESCAPE '\\' THEN {PREFIX_SCORE} ELSE 0 END"
    )];
    args.push(Value::Text(format!("{}%", escape_like(first))));
    for token in tokens {
        score_terms.push(format!(
            "CASE WHEN filename LIKE ? ESCAPE '\\' THEN {FILENAME_TOKEN_SCORE} ELSE 0 END"
        ));
        args.push(contains_pattern(token));
        score_terms.push(format!(
            "CASE WHEN camera_model LIKE ? ESCAPE '\\' THEN {CAMERA_TOKEN_SCORE} ELSE 0 END"
        ));
        args.push(contains_pattern(token));
    }

    let mut clauses = Vec::new();
    for token in tokens {
        clauses.push(
            "(filename LIKE ? ESCAPE '\\' OR camera_model LIKE ? ESCAPE '\\' \
             OR exif_datetime LIKE ? ESCAPE '\\' OR filepath LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        for _ in 0..4 {
            args.push(contains_pattern(token));
        }
    }
    push_filters(filters, "", &mut clauses, &mut args);
    push_page(page, &mut args);

    let sql = format!(
        "SELECT {FILE_COLUMNS}, ({}) AS score FROM files{}
         ORDER BY score DESC, length(filename) ASC, uploaded_at DESC, id DESC
         LIMIT ? OFFSET ?",
        score_terms.join(" + "),
        where_sql(&clauses)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), |row| {
        Ok(ScoredFile {
            record: file_from_row(row)?,
            score: row.get::<_, i64>(7)? as f64,
        })
    })?;
    rows.collect()
}

pub fn substring_search(
    conn: &Connection,
    needle: &str,
    filters: &SearchFilters,
    page: Page,
) -> Result<Vec<FileRecord>> {
    let pattern = contains_pattern(needle);
    let mut clauses = vec![
        "(filename LIKE ? ESCAPE '\\' OR exif_datetime LIKE ? ESCAPE '\\' \
         OR camera_model LIKE ? ESCAPE '\\')"
            .to_string(),
    ];
    let mut args = vec![pattern.clone(), pattern.clone(), pattern];
    push_filters(filters, "", &mut clauses, &mut args);
    push_page(page, &mut args);
    let sql = format!(
        "SELECT {FILE_COLUMNS} FROM files{} ORDER BY uploaded_at DESC, id DESC LIMIT ? OFFSET ?",
        where_sql(&clauses)
    );
    query_files(conn, &sql, args)
}
