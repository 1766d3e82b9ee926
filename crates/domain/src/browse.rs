use serde::Serialize;

pub const GRID_DEFAULT_LIMIT: u32 = 60;
pub const GRID_MAX_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One directory entry as shown by the tree and grid views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowseItem {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    pub modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridPage {
    pub items: Vec<BrowseItem>,
    pub offset: u32,
    pub limit: u32,
    pub total: usize,
}

/// Grid paging: limits outside `1..=GRID_MAX_LIMIT` use the default, negative
/// offsets start at zero.
pub fn grid_window(limit: Option<i64>, offset: Option<i64>) -> (u32, u32) {
    let limit = match limit {
        Some(value) if value > 0 && value <= i64::from(GRID_MAX_LIMIT) => value as u32,
        _ => GRID_DEFAULT_LIMIT,
    };
    let offset = match offset {
        Some(value) if value > 0 => value.min(i64::from(u32::MAX)) as u32,
        _ => 0,
    };
    (limit, offset)
}
