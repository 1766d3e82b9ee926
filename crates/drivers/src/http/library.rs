use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use homecloud_adapters::resolve;
use homecloud_application::{
    ArchiveCommand, BrowseCommand, DeleteFileCommand, GridCommand, ListFilesCommand,
};
use homecloud_domain::{grid_window, BrowseItem, GridPage, Page};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use super::media::attachment;
use super::search::number;
use super::{blocking, ApiError, AppState};

const STREAM_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct BrowseParams {
    path: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    limit: Option<String>,
    offset: Option<String>,
}

/// A missing or blank `path` means the data root.
fn resolve_dir(state: &AppState, path: Option<&str>) -> Result<PathBuf, ApiError> {
    let raw = path.filter(|value| !value.trim().is_empty()).unwrap_or("/");
    Ok(resolve(&state.data_root, raw)?)
}

#[derive(Debug, Serialize)]
pub struct TreeResponse {
    items: Vec<BrowseItem>,
}

pub async fn tree(
    State(state): State<AppState>,
    Query(params): Query<BrowseParams>,
) -> Result<Json<TreeResponse>, ApiError> {
    let dir = resolve_dir(&state, params.path.as_deref())?;
    let service = state.service.clone();
    let items = blocking(move || {
        service
            .browse_tree(BrowseCommand { dir })
            .map_err(ApiError::from)
    })
    .await?;
    Ok(Json(TreeResponse { items }))
}

pub async fn grid(
    State(state): State<AppState>,
    Query(params): Query<BrowseParams>,
) -> Result<Json<GridPage>, ApiError> {
    let dir = resolve_dir(&state, params.path.as_deref())?;
    let (limit, offset) = grid_window(
        number(params.limit.as_deref()),
        number(params.offset.as_deref()),
    );
    let service = state.service.clone();
    let page = blocking(move || {
        service
            .browse_grid(GridCommand { dir, limit, offset })
            .map_err(ApiError::from)
    })
    .await?;
    Ok(Json(page))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedFile {
    id: i64,
    filename: String,
    filepath: String,
    uploaded_at: String,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    files: Vec<ListedFile>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    let page = Page::new(
        number(params.limit.as_deref()),
        number(params.offset.as_deref()),
    );
    let service = state.service.clone();
    let records = blocking(move || {
        service
            .list_files(ListFilesCommand { page })
            .map_err(ApiError::from)
    })
    .await?;

    let files = records
        .into_iter()
        .map(|record| ListedFile {
            id: record.id.get(),
            filepath: state.service.virtual_path(Path::new(&record.filepath)),
            filename: record.filename,
            uploaded_at: record.uploaded_at,
        })
        .collect();
    Ok(Json(ListResponse { files }))
}

pub async fn delete(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
) -> Result<&'static str, ApiError> {
    let path = resolve(&state.data_root, &path)?;
    if path == state.data_root {
        return Err(ApiError::BadRequest("file path required".to_string()));
    }
    let service = state.service.clone();
    blocking(move || {
        service
            .delete_file(DeleteFileCommand { path })
            .map_err(ApiError::from)
    })
    .await?;
    Ok("deleted")
}

/// Zips a file or directory into an unlinked temp file, then streams it.
pub async fn download_zip(
    State(state): State<AppState>,
    Query(params): Query<BrowseParams>,
) -> Result<Response, ApiError> {
    let raw = params
        .path
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("path required".to_string()))?;
    let path = resolve(&state.data_root, &raw)?;
    let service = state.service.clone();
    let archive = blocking(move || {
        service
            .archive(ArchiveCommand { path })
            .map_err(ApiError::from)
    })
    .await?;

    let file = tokio::fs::File::from_std(archive.file);
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/zip")
        .header(CONTENT_DISPOSITION, attachment(&archive.file_name))
        .header(CONTENT_LENGTH, archive.size)
        .body(Body::from_stream(ReaderStream::with_capacity(
            file,
            STREAM_CAPACITY,
        )))
        .map_err(|error| ApiError::Internal(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::{get, multipart_body, post, send, test_app, TestApp};
    use axum::http::{HeaderMap, Request};
    use serde_json::Value;

    fn with_file(app: &TestApp, relative: &str, bytes: &[u8]) {
        let path = app.data_root.join(relative);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, bytes).expect("write");
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).expect("json body")
    }

    fn header<'a>(headers: &'a HeaderMap, name: axum::http::HeaderName) -> Option<&'a str> {
        headers.get(name).and_then(|value| value.to_str().ok())
    }

    fn delete_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn upload(app: &TestApp, name: &str, bytes: &[u8]) {
        let (status, _, _) = send(
            &app.router,
            post("/api/upload", multipart_body(&[("file", Some(name), bytes)])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn tree_lists_the_root_without_reserved_entries() {
        let app = test_app();
        with_file(&app, "albums/summer/beach.jpg", b"jpg");
        with_file(&app, "notes.txt", b"hello");
        with_file(&app, ".thumbs/w360/notes.txt.jpg", b"t");

        let (status, _, body) = send(&app.router, get("/api/tree")).await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        let items = body["items"].as_array().expect("items");
        let names: Vec<&str> = items
            .iter()
            .map(|item| item["name"].as_str().expect("name"))
            .collect();
        assert_eq!(names, vec!["albums", "notes.txt"]);
        assert_eq!(items[0]["type"], "dir");
        assert_eq!(items[1]["path"], "/notes.txt");
        assert_eq!(items[1]["size"], 5);
        assert_eq!(items[1]["mime"], "text/plain");

        let (status, _, body) = send(&app.router, get("/api/tree?path=/albums/summer")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["items"][0]["path"], "/albums/summer/beach.jpg");
    }

    #[tokio::test]
    async fn tree_rejects_escapes_and_missing_dirs() {
        let app = test_app();
        let (status, _, _) = send(&app.router, get("/api/tree?path=../../etc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = send(&app.router, get("/api/tree?path=/nowhere")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(&app.router, get("/api/tree?path=/.backups")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn grid_pages_with_thumbnail_links() {
        let app = test_app();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            with_file(&app, &format!("pics/{name}"), b"x");
        }

        let (status, _, body) =
            send(&app.router, get("/api/grid?path=/pics&offset=1&limit=1")).await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["total"], 3);
        assert_eq!(body["offset"], 1);
        assert_eq!(body["limit"], 1);
        assert_eq!(body["items"][0]["name"], "b.jpg");
        assert_eq!(
            body["items"][0]["thumb"],
            "/api/thumbnail?path=%2Fpics%2Fb.jpg&w=360"
        );

        let (_, _, body) = send(&app.router, get("/api/grid?path=/pics&limit=-3")).await;
        assert_eq!(json(&body)["limit"], 60);
    }

    #[tokio::test]
    async fn files_lists_catalogued_uploads_newest_first() {
        let app = test_app();
        upload(&app, "first.txt", b"one").await;
        upload(&app, "second.txt", b"two").await;

        let (status, _, body) = send(&app.router, get("/api/files")).await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        let files = body["files"].as_array().expect("files");
        assert_eq!(files.len(), 2);
        assert!(files
            .iter()
            .any(|file| file["filepath"] == "/uploads/first.txt"));
        assert!(files[0].get("uploadedAt").is_some());

        let (_, _, body) = send(&app.router, get("/api/files?limit=1")).await;
        assert_eq!(json(&body)["files"].as_array().expect("files").len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_the_file_and_its_listing() {
        let app = test_app();
        upload(&app, "gone.txt", b"bye").await;

        let (status, _, body) =
            send(&app.router, delete_request("/api/delete/uploads/gone.txt")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"deleted");
        assert!(!app.data_root.join("uploads/gone.txt").exists());

        let (_, _, body) = send(&app.router, get("/api/files")).await;
        assert!(json(&body)["files"].as_array().expect("files").is_empty());

        let (status, _, _) =
            send(&app.router, delete_request("/api/delete/uploads/gone.txt")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_refuses_directories_database_and_escapes() {
        let app = test_app();
        with_file(&app, "albums/a.jpg", b"x");

        let (status, _, _) = send(&app.router, delete_request("/api/delete/albums")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = send(&app.router, delete_request("/api/delete/metadata.db")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(app.data_root.join("metadata.db").exists());
        let (status, _, _) =
            send(&app.router, delete_request("/api/delete/..%2F..%2Fetc%2Fhosts")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_zip_streams_an_archive() {
        let app = test_app();
        with_file(&app, "albums/summer/beach.jpg", b"jpg bytes");
        with_file(&app, "albums/.hidden", b"secret");

        let (status, headers, body) =
            send(&app.router, get("/api/download-zip?path=/albums")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(header(&headers, CONTENT_TYPE), Some("application/zip"));
        assert_eq!(
            header(&headers, CONTENT_DISPOSITION),
            Some("attachment; filename=\"albums.zip\"")
        );
        assert_eq!(
            header(&headers, CONTENT_LENGTH),
            Some(body.len().to_string().as_str())
        );
        assert!(body.starts_with(b"PK\x03\x04"));

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(body)).expect("zip");
        let names: Vec<&str> = archive.file_names().collect();
        assert_eq!(names, vec!["summer/beach.jpg"]);
        assert_eq!(archive.by_index(0).expect("entry").size(), 9);
    }

    #[tokio::test]
    async fn download_zip_needs_an_existing_path() {
        let app = test_app();
        let (status, _, _) = send(&app.router, get("/api/download-zip")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = send(&app.router, get("/api/download-zip?path=/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
