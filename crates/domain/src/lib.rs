mod browse;
mod error;
mod media;
pub mod path;
pub mod range;
pub mod search;

pub use browse::{grid_window, BrowseItem, EntryKind, GridPage, GRID_DEFAULT_LIMIT};
pub use error::DomainError;
pub use media::{
    detect_media_kind, guess_mime, BackupState, ExifSummary, FileRecord, IndexReport, MediaId,
    MediaKind, MediaRecord,
};
pub use range::{parse_byte_range, ByteRange, RangeError};
pub use search::{
    build_full_text_match, tokenize, ExifBlock, MediaItem, Page, SearchFilters, SearchResults,
    SearchSource,
};
