use axum::extract::{Query, State};
use axum::Json;
use homecloud_application::SearchCommand;
use homecloud_domain::{Page, SearchFilters, SearchResults};
use serde::Deserialize;

use super::{blocking, ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    query: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
    mime: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    regex: Option<String>,
    semantic: Option<String>,
}

fn flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|raw| raw.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

pub(super) fn number(value: Option<&str>) -> Option<i64> {
    value.and_then(|raw| raw.trim().parse().ok())
}

impl SearchParams {
    fn into_command(self) -> SearchCommand {
        let query = self
            .q
            .filter(|value| !value.trim().is_empty())
            .or(self.query)
            .unwrap_or_default();
        SearchCommand {
            query: query.trim().to_string(),
            page: Page::new(number(self.limit.as_deref()), number(self.offset.as_deref())),
            filters: SearchFilters::parse(
                self.mime.as_deref(),
                self.date_from.as_deref(),
                self.date_to.as_deref(),
            ),
            regex: flag(self.regex.as_deref()),
            semantic: flag(self.semantic.as_deref()),
        }
    }
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResults>, ApiError> {
    let command = params.into_command();
    let service = state.service.clone();
    let results = blocking(move || service.search(command).map_err(ApiError::from)).await?;
    Ok(Json(results))
}
