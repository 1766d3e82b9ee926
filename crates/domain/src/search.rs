use chrono::NaiveDate;
use serde::Serialize;

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;
const MIN_TOKEN_CHARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    /// Out-of-range limits fall back to the default, negative offsets to zero.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(value) if value > 0 && value <= i64::from(MAX_LIMIT) => value as u32,
            _ => DEFAULT_LIMIT,
        };
        let offset = match offset {
            Some(value) if value > 0 => value.min(i64::from(u32::MAX)) as u32,
            _ => 0,
        };
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub mime: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl SearchFilters {
    /// Builds filters from raw query parameters. Blank values and dates that
    /// are not `YYYY-MM-DD` are ignored.
    pub fn parse(mime: Option<&str>, date_from: Option<&str>, date_to: Option<&str>) -> Self {
        Self {
            mime: mime
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            date_from: date_from.and_then(parse_day),
            date_to: date_to.and_then(parse_day),
        }
    }
}

fn parse_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchSource {
    #[serde(rename = "recent")]
    Recent,
    #[serde(rename = "fts")]
    FullText,
    #[serde(rename = "like_ranked")]
    RankedScan,
    #[serde(rename = "like")]
    Substring,
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "semantic")]
    Semantic,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExifBlock {
    pub datetime: String,
    pub camera_model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub mime: String,
    pub uploaded_at: String,
    pub exif: ExifBlock,
    pub thumb: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub items: Vec<MediaItem>,
    pub offset: u32,
    pub limit: u32,
    pub source: SearchSource,
}

/// Splits a query into terms of at least two characters.
pub fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|ch: char| ch.is_whitespace() || matches!(ch, ',' | ';' | ':' | '-' | '_' | '.'))
        .map(str::trim)
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// FTS5 expression matching any token as a prefix: `"a"* OR "b"*`.
/// Returns `None` when the query has no usable token.
pub fn build_full_text_match(query: &str) -> Option<String> {
    let terms: Vec<String> = tokenize(query)
        .into_iter()
        .map(|token| format!("\"{}\"*", token.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        return None;
    }
    Some(terms.join(" OR "))
}
