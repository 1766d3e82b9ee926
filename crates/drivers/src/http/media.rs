use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use homecloud_adapters::resolve;
use homecloud_application::{timestamp, DescribeFileCommand, ThumbnailCommand};
use homecloud_domain::{guess_mime, parse_byte_range};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{blocking, ApiError, AppState};

const STREAM_CAPACITY: usize = 64 * 1024;
const DEFAULT_THUMB_WIDTH: u32 = 320;
const MAX_THUMB_WIDTH: u32 = 2000;
const THUMB_CACHE_CONTROL: &str = "public, max-age=86400";

#[derive(Debug, Default, Deserialize)]
pub struct PathParams {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ThumbnailParams {
    path: Option<String>,
    w: Option<String>,
}

fn resolve_param(state: &AppState, path: Option<String>) -> Result<PathBuf, ApiError> {
    let raw = path
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("path required".to_string()))?;
    Ok(resolve(&state.data_root, &raw)?)
}

fn internal(error: impl std::fmt::Display) -> ApiError {
    ApiError::Internal(error.to_string())
}

pub(super) fn attachment(name: &str) -> String {
    format!("attachment; filename=\"{}\"", name.replace(['"', '\\'], "_"))
}

fn thumbnail_width(raw: Option<&str>) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|width| (1..=MAX_THUMB_WIDTH).contains(width))
        .unwrap_or(DEFAULT_THUMB_WIDTH)
}

/// Streams a file, honouring a single `Range` header.
async fn serve_file(
    path: &Path,
    range: Option<&HeaderValue>,
    disposition: Option<String>,
) -> Result<Response, ApiError> {
    let mut file = File::open(path)
        .await
        .map_err(|_| ApiError::NotFound("file not found".to_string()))?;
    let metadata = file.metadata().await.map_err(internal)?;
    if !metadata.is_file() {
        return Err(ApiError::NotFound("file not found".to_string()));
    }
    let size = metadata.len();

    let mut response = Response::builder()
        .header(CONTENT_TYPE, guess_mime(path))
        .header(ACCEPT_RANGES, "bytes");
    if let Some(disposition) = disposition {
        response = response.header(CONTENT_DISPOSITION, disposition);
    }

    let Some(range) = range else {
        return response
            .status(StatusCode::OK)
            .header(CONTENT_LENGTH, size)
            .body(Body::from_stream(ReaderStream::with_capacity(
                file,
                STREAM_CAPACITY,
            )))
            .map_err(internal);
    };

    let range = range
        .to_str()
        .ok()
        .and_then(|raw| {
            parse_byte_range(raw, size)
                .map_err(|error| debug!(%error, raw, "rejected range"))
                .ok()
        })
        .ok_or(ApiError::RangeNotSatisfiable { size })?;

    file.seek(SeekFrom::Start(range.start))
        .await
        .map_err(internal)?;
    response
        .status(StatusCode::PARTIAL_CONTENT)
        .header(CONTENT_RANGE, range.content_range(size))
        .header(CONTENT_LENGTH, range.len())
        .body(Body::from_stream(ReaderStream::with_capacity(
            file.take(range.len()),
            STREAM_CAPACITY,
        )))
        .map_err(internal)
}

pub async fn file(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = resolve_param(&state, params.path)?;
    serve_file(&path, headers.get(RANGE), None).await
}

pub async fn download(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = resolve_param(&state, params.path)?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    serve_file(&path, headers.get(RANGE), Some(attachment(&name))).await
}

pub async fn thumbnail(
    State(state): State<AppState>,
    Query(params): Query<ThumbnailParams>,
) -> Result<Response, ApiError> {
    let source = resolve_param(&state, params.path)?;
    let width = thumbnail_width(params.w.as_deref());

    let service = state.service.clone();
    let artifact = blocking(move || {
        service
            .thumbnail(ThumbnailCommand { source, width })
            .map_err(|error| {
                debug!(%error, "thumbnail unavailable");
                ApiError::NotFound("no thumbnail".to_string())
            })
    })
    .await?;

    let bytes = tokio::fs::read(&artifact.file_path)
        .await
        .map_err(|_| ApiError::NotFound("no thumbnail".to_string()))?;
    Ok((
        [
            (CONTENT_TYPE, "image/jpeg"),
            (CACHE_CONTROL, THUMB_CACHE_CONTROL),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    name: String,
    path: String,
    size: u64,
    mime: String,
    modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exif_datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    camera_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<f64>,
}

pub async fn metadata(
    State(state): State<AppState>,
    Query(params): Query<PathParams>,
) -> Result<Json<MetadataResponse>, ApiError> {
    let path = resolve_param(&state, params.path)?;
    let stat = tokio::fs::metadata(&path)
        .await
        .map_err(|_| ApiError::NotFound("file not found".to_string()))?;
    let modified = stat
        .modified()
        .map(|time| timestamp(time.into()))
        .unwrap_or_default();

    let service = state.service.clone();
    let described = path.clone();
    let description = blocking(move || {
        Ok(service.describe_file(DescribeFileCommand { path: described }))
    })
    .await?;
    let exif = description.exif.unwrap_or_default();

    Ok(Json(MetadataResponse {
        name: path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: state.service.virtual_path(&path),
        size: stat.len(),
        mime: guess_mime(&path),
        modified,
        exif_datetime: exif.datetime,
        camera_model: exif.camera_model,
        duration_seconds: description.duration_seconds,
    }))
}

pub async fn health() -> &'static str {
    "ok"
}
