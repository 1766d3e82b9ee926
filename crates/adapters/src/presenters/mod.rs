use homecloud_domain::{IndexReport, MediaItem, MediaRecord, SearchResults};

pub fn present_media_item(item: &MediaItem) -> String {
    let score = item
        .score
        .map(|score| format!("{score:.0}"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}\t{}\t{}\t{}\t{}",
        item.id, score, item.uploaded_at, item.mime, item.path
    )
}

pub fn present_search_results(results: &SearchResults) -> Vec<String> {
    let mut lines = Vec::with_capacity(results.items.len() + 1);
    lines.push(format!(
        "{} result(s) via {} (offset={}, limit={})",
        results.items.len(),
        source_label(results),
        results.offset,
        results.limit
    ));
    lines.extend(results.items.iter().map(present_media_item));
    lines
}

pub fn present_index_report(report: &IndexReport) -> String {
    format!(
        "scanned={} indexed={} bytes={} thumbnails_queued={}",
        report.scanned_files, report.indexed_files, report.indexed_bytes, report.thumbnails_queued
    )
}

pub fn present_sync_row(record: &MediaRecord) -> String {
    let backup = if record.backup.backed_up {
        record.backup.backup_at.as_deref().unwrap_or("yes").to_string()
    } else if record.backup.retry_count > 0 {
        format!("pending (retries={})", record.backup.retry_count)
    } else {
        "pending".to_string()
    };
    format!(
        "{}\t{}\t{}\t{}\t{}",
        record.file.id.get(),
        record.device_id.as_deref().unwrap_or("-"),
        record.sha256.as_deref().map(short_hash).unwrap_or("-"),
        backup,
        record.file.filename
    )
}

fn source_label(results: &SearchResults) -> String {
    serde_json::to_value(results.source)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", results.source))
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
