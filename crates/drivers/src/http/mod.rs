mod error;
mod ingest;
mod library;
mod media;
mod search;

use std::any::Any;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use homecloud_application::ApplicationService;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub use error::ApiError;

/// Room for multipart boundaries and form fields on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 1 << 20;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ApplicationService>,
    /// Canonical data root used by the path sandbox.
    pub data_root: PathBuf,
}

impl AppState {
    pub fn new(service: Arc<ApplicationService>) -> Self {
        let data_root = service.settings().data_root.clone();
        Self { service, data_root }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state
        .service
        .settings()
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/api/upload", post(ingest::upload))
        .route("/api/sync/upload", post(ingest::sync_upload))
        .route("/api/sync/status", get(ingest::sync_status))
        .route("/api/files", get(library::list))
        .route("/api/delete/*path", delete(library::delete))
        .route("/api/tree", get(library::tree))
        .route("/api/grid", get(library::grid))
        .route("/api/download-zip", get(library::download_zip))
        .route("/api/search", get(search::search))
        .route("/api/file", get(media::file))
        .route("/api/download", get(media::download))
        .route("/api/thumbnail", get(media::thumbnail))
        .route("/api/metadata", get(media::metadata))
        .route("/api/health", get(media::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    error!("handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal server error" })),
    )
        .into_response()
}

/// Runs synchronous application code on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
