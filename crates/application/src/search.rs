use std::collections::HashMap;
use std::path::Path;

use homecloud_domain::{
    build_full_text_match, detect_media_kind, guess_mime, tokenize, ExifBlock, FileRecord,
    MediaId, MediaItem, MediaKind, Page, SearchResults, SearchSource,
};
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::{ApplicationError, ApplicationService, SearchCommand, DEFAULT_THUMBNAIL_WIDTH};

/// Longest regex pattern accepted from clients, in characters.
pub const MAX_REGEX_LEN: usize = 200;
/// Regex search only looks at this many of the most recent rows.
pub const REGEX_SCAN_CAP: u32 = 5000;
const REGEX_SIZE_LIMIT: usize = 1 << 20;

impl ApplicationService {
    pub fn search(&self, command: SearchCommand) -> Result<SearchResults, ApplicationError> {
        let query = command.query.trim();
        let page = command.page;

        if command.regex {
            let pattern = compile_pattern(query)?;
            return self.regex_search(&pattern, &command);
        }

        if query.is_empty() {
            let files = self.catalog.recent_files(&command.filters, page)?;
            return Ok(self.results(files, page, SearchSource::Recent));
        }

        if command.semantic {
            if let Some(results) = self.semantic_search(query, page) {
                return Ok(results);
            }
        }

        if self.catalog.full_text_available() {
            if let Some(fts_match) = build_full_text_match(query) {
                match self
                    .catalog
                    .full_text_search(&fts_match, &command.filters, page)
                {
                    Ok(files) => return Ok(self.results(files, page, SearchSource::FullText)),
                    Err(error) => debug!(%error, "full-text query failed; using ranked scan"),
                }
            }
        }

        let tokens = tokenize(query);
        if tokens.is_empty() {
            let files = self
                .catalog
                .substring_search(query, &command.filters, page)?;
            return Ok(self.results(files, page, SearchSource::Substring));
        }

        let scored = self
            .catalog
            .ranked_search(&tokens, &command.filters, page)?;
        Ok(SearchResults {
            items: scored
                .into_iter()
                .map(|hit| self.present(&hit.record, Some(hit.score)))
                .collect(),
            offset: page.offset,
            limit: page.limit,
            source: SearchSource::RankedScan,
        })
    }

    fn regex_search(
        &self,
        pattern: &Regex,
        command: &SearchCommand,
    ) -> Result<SearchResults, ApplicationError> {
        let window = Page {
            limit: REGEX_SCAN_CAP,
            offset: 0,
        };
        let candidates = self.catalog.recent_files(&command.filters, window)?;
        let page = command.page;
        let files = candidates
            .into_iter()
            .filter(|file| regex_matches(pattern, file))
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok(self.results(files, page, SearchSource::Regex))
    }

    /// `None` sends the caller on to the text strategies.
    fn semantic_search(&self, query: &str, page: Page) -> Option<SearchResults> {
        let index = self.semantic.as_ref()?;
        let wanted = page.offset.saturating_add(page.limit);
        let hits = match index.search(query, wanted) {
            Ok(hits) if !hits.is_empty() => hits,
            Ok(_) => return None,
            Err(error) => {
                warn!(%error, "semantic search unavailable");
                return None;
            }
        };

        let ranked: Vec<(MediaId, f32)> = hits
            .iter()
            .filter_map(|hit| MediaId::new(hit.id).ok().map(|id| (id, hit.score)))
            .collect();
        let ids: Vec<MediaId> = ranked.iter().map(|(id, _)| *id).collect();
        let records = match self.catalog.find_files_by_ids(&ids) {
            Ok(records) => records,
            Err(error) => {
                warn!(%error, "semantic hits could not be loaded");
                return None;
            }
        };
        let mut by_id: HashMap<MediaId, FileRecord> =
            records.into_iter().map(|record| (record.id, record)).collect();

        let items = ranked
            .into_iter()
            .filter_map(|(id, score)| {
                by_id
                    .remove(&id)
                    .map(|record| self.present(&record, Some(f64::from(score))))
            })
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Some(SearchResults {
            items,
            offset: page.offset,
            limit: page.limit,
            source: SearchSource::Semantic,
        })
    }

    fn results(&self, files: Vec<FileRecord>, page: Page, source: SearchSource) -> SearchResults {
        SearchResults {
            items: files.iter().map(|file| self.present(file, None)).collect(),
            offset: page.offset,
            limit: page.limit,
            source,
        }
    }

    pub(crate) fn present(&self, file: &FileRecord, score: Option<f64>) -> MediaItem {
        let path = self.virtual_path(Path::new(&file.filepath));
        let mime = file
            .mime
            .clone()
            .filter(|mime| !mime.is_empty())
            .unwrap_or_else(|| guess_mime(Path::new(&file.filename)));
        let stream = self.stream_url(&path, &file.filename, &mime);

        MediaItem {
            id: file.id.get(),
            name: file.filename.clone(),
            thumb: thumbnail_link(&path),
            path,
            mime,
            uploaded_at: file.uploaded_at.clone(),
            exif: ExifBlock {
                datetime: file.exif_datetime.clone().unwrap_or_default(),
                camera_model: file.camera_model.clone().unwrap_or_default(),
            },
            score,
            stream,
        }
    }

    fn stream_url(&self, path: &str, filename: &str, mime: &str) -> Option<String> {
        let base = self.settings.media_server_url.as_deref()?;
        let playable = mime.starts_with("video/")
            || mime.starts_with("audio/")
            || detect_media_kind(Path::new(filename)) == MediaKind::Video;
        if !playable {
            return None;
        }
        Some(format!("{}{}", base.trim_end_matches('/'), path))
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, ApplicationError> {
    if pattern.chars().count() > MAX_REGEX_LEN {
        return Err(ApplicationError::InvalidInput(format!(
            "regex longer than {MAX_REGEX_LEN} characters"
        )));
    }
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|error| ApplicationError::InvalidInput(format!("invalid regex: {error}")))
}

fn regex_matches(pattern: &Regex, file: &FileRecord) -> bool {
    pattern.is_match(&file.filename)
        || file
            .exif_datetime
            .as_deref()
            .is_some_and(|value| pattern.is_match(value))
        || file
            .camera_model
            .as_deref()
            .is_some_and(|value| pattern.is_match(value))
}

/// Thumbnail URL for a virtual path at the default grid width.
pub(crate) fn thumbnail_link(path: &str) -> String {
    let escaped: String = url::form_urlencoded::byte_serialize(path.as_bytes()).collect();
    format!("/api/thumbnail?path={escaped}&w={DEFAULT_THUMBNAIL_WIDTH}")
}

#[cfg(test)]
mod tests {
    use homecloud_domain::SearchFilters;

    use super::*;
    use crate::service::tests::{harness, harness_with, FakeCatalog, FixedSemantic};
    use crate::SemanticHit;

    fn names(results: &SearchResults) -> Vec<&str> {
        results.items.iter().map(|item| item.name.as_str()).collect()
    }

    fn query(text: &str) -> SearchCommand {
        SearchCommand {
            query: text.to_string(),
            ..SearchCommand::default()
        }
    }

    #[test]
    fn empty_query_lists_newest_first() {
        let h = harness(FakeCatalog::with_files(&[
            ("t1.jpg", "2026-01-01T00:00:01Z"),
            ("t2.jpg", "2026-01-01T00:00:02Z"),
            ("t3.jpg", "2026-01-01T00:00:03Z"),
        ]));

        let results = h.service.search(query("   ")).expect("search");
        assert_eq!(results.source, SearchSource::Recent);
        assert_eq!(names(&results), vec!["t3.jpg", "t2.jpg", "t1.jpg"]);
        assert_eq!(results.limit, 100);
    }

    #[test]
    fn long_regex_is_rejected_before_scanning() {
        let h = harness(FakeCatalog::with_files(&[("a.jpg", "2026-01-01T00:00:00Z")]));
        let command = SearchCommand {
            query: "a".repeat(250),
            regex: true,
            ..SearchCommand::default()
        };

        let result = h.service.search(command);
        assert!(matches!(result, Err(ApplicationError::InvalidInput(_))));
        assert!(h.catalog.scans.lock().expect("lock").is_empty());
    }

    #[test]
    fn invalid_regex_is_bad_input() {
        let h = harness(FakeCatalog::default());
        let command = SearchCommand {
            query: "([".to_string(),
            regex: true,
            ..SearchCommand::default()
        };
        assert!(matches!(
            h.service.search(command),
            Err(ApplicationError::InvalidInput(_))
        ));
    }

    #[test]
    fn regex_pages_over_matches() {
        let h = harness(FakeCatalog::with_files(&[
            ("IMG_001.JPG", "2026-01-01T00:00:01Z"),
            ("notes.txt", "2026-01-01T00:00:02Z"),
            ("img_002.jpg", "2026-01-01T00:00:03Z"),
            ("img_003.jpg", "2026-01-01T00:00:04Z"),
        ]));
        let command = SearchCommand {
            query: r"^img_\d+\.jpg$".to_string(),
            regex: true,
            page: Page::new(Some(2), Some(1)),
            ..SearchCommand::default()
        };

        let results = h.service.search(command).expect("search");
        assert_eq!(results.source, SearchSource::Regex);
        assert_eq!(names(&results), vec!["img_002.jpg", "IMG_001.JPG"]);
        assert_eq!(results.offset, 1);
    }

    #[test]
    fn failing_full_text_falls_back_to_ranked_scan() {
        let catalog = FakeCatalog {
            full_text: true,
            fail_full_text: true,
            ..FakeCatalog::with_files(&[
                ("sunset_beach.jpg", "2026-01-01T00:00:02Z"),
                ("sunset.jpg", "2026-01-01T00:00:01Z"),
            ])
        };
        let h = harness(catalog);

        let results = h.service.search(query("sunset")).expect("search");
        assert_eq!(results.source, SearchSource::RankedScan);
        assert_eq!(
            *h.catalog.scans.lock().expect("lock"),
            vec!["fts", "ranked"]
        );
        assert!(results.items.iter().all(|item| item.score.is_some()));
    }

    #[test]
    fn short_queries_use_substring_match() {
        let h = harness(FakeCatalog::with_files(&[("a.jpg", "2026-01-01T00:00:00Z")]));
        let results = h.service.search(query("a")).expect("search");
        assert_eq!(results.source, SearchSource::Substring);
        assert_eq!(names(&results), vec!["a.jpg"]);
    }

    #[test]
    fn semantic_hits_keep_ranked_order() {
        let catalog = FakeCatalog::with_files(&[
            ("dog.jpg", "2026-01-01T00:00:01Z"),
            ("cat.jpg", "2026-01-01T00:00:02Z"),
        ]);
        let semantic = FixedSemantic(vec![
            SemanticHit { id: 1, score: 0.9 },
            SemanticHit { id: 42, score: 0.8 },
            SemanticHit { id: 2, score: 0.5 },
        ]);
        let h = harness_with(catalog, vec![], Some(Box::new(semantic)));
        let command = SearchCommand {
            query: "a dog in the park".to_string(),
            semantic: true,
            ..SearchCommand::default()
        };

        let results = h.service.search(command).expect("search");
        assert_eq!(results.source, SearchSource::Semantic);
        assert_eq!(names(&results), vec!["dog.jpg", "cat.jpg"]);
    }

    #[test]
    fn semantic_without_index_uses_text_search() {
        let h = harness(FakeCatalog::with_files(&[("dog.jpg", "2026-01-01T00:00:01Z")]));
        let command = SearchCommand {
            query: "dog".to_string(),
            semantic: true,
            filters: SearchFilters::default(),
            ..SearchCommand::default()
        };
        let results = h.service.search(command).expect("search");
        assert_eq!(results.source, SearchSource::RankedScan);
    }

    #[test]
    fn items_carry_virtual_path_and_thumbnail_link() {
        let h = harness(FakeCatalog::with_files(&[(
            "my photo.jpg",
            "2026-01-01T00:00:00Z",
        )]));
        let results = h.service.search(query("")).expect("search");
        let item = &results.items[0];
        assert_eq!(item.path, "/uploads/my photo.jpg");
        assert_eq!(item.mime, "image/jpeg");
        assert_eq!(
            item.thumb,
            "/api/thumbnail?path=%2Fuploads%2Fmy+photo.jpg&w=360"
        );
        assert!(item.stream.is_none());
    }
}
