use std::io::{self, Read};

use axum::extract::{Multipart, Query, State};
use axum::Json;
use bytes::Bytes;
use homecloud_application::{IngestCommand, IngestReport, SyncStatusQuery};
use homecloud_domain::MediaRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::{blocking, ApiError, AppState};

const FILE_FIELD: &str = "file";
const DEVICE_FIELD: &str = "device_id";
const DEFAULT_DEVICE: &str = "unknown";
/// Chunks buffered between the request body and the blocking writer.
const UPLOAD_CHANNEL_DEPTH: usize = 8;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    status: &'static str,
    skipped: bool,
    path: String,
    id: i64,
}

impl From<IngestReport> for UploadResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            status: "ok",
            skipped: report.skipped,
            path: report.path,
            id: report.id.get(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceParams {
    device_id: Option<String>,
}

/// Blocking `Read` over body chunks sent from the async side.
struct ChannelReader {
    chunks: mpsc::Receiver<io::Result<Bytes>>,
    current: Bytes,
}

impl ChannelReader {
    fn new(chunks: mpsc::Receiver<io::Result<Bytes>>) -> Self {
        Self {
            chunks,
            current: Bytes::new(),
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.chunks.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(error)) => return Err(error),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}

pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    receive(state, multipart, None).await
}

/// `device_id` may come from the query string or a form field sent before
/// the file.
pub async fn sync_upload(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let device = params.device_id.unwrap_or_default();
    receive(state, multipart, Some(device)).await
}

async fn receive(
    state: AppState,
    mut multipart: Multipart,
    mut device_id: Option<String>,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(DEVICE_FIELD) if device_id.is_some() => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    device_id = Some(value);
                }
            }
            Some(FILE_FIELD) => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let device_id = device_id.map(|device| {
                    if device.trim().is_empty() {
                        DEFAULT_DEVICE.to_string()
                    } else {
                        device
                    }
                });
                let (sender, receiver) = mpsc::channel(UPLOAD_CHANNEL_DEPTH);
                let service = state.service.clone();
                let ingest = tokio::task::spawn_blocking(move || {
                    let mut reader = ChannelReader::new(receiver);
                    service.ingest(IngestCommand {
                        reader: &mut reader,
                        filename,
                        device_id,
                    })
                });

                let mut stream_error = None;
                loop {
                    match field.chunk().await {
                        Ok(Some(chunk)) => {
                            if sender.send(Ok(chunk)).await.is_err() {
                                debug!("ingest stopped reading; discarding the rest of the body");
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            let _ = sender
                                .send(Err(io::Error::new(
                                    io::ErrorKind::UnexpectedEof,
                                    error.body_text(),
                                )))
                                .await;
                            stream_error = Some(error);
                            break;
                        }
                    }
                }
                drop(sender);

                let report = ingest.await?;
                if let Some(error) = stream_error {
                    return Err(error.into());
                }
                return Ok(Json(report?.into()));
            }
            _ => {}
        }
    }
    Err(ApiError::BadRequest("file field required".to_string()))
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    items: Vec<SyncStatusItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatusItem {
    id: i64,
    filename: String,
    path: String,
    sha256: String,
    #[serde(rename = "backed_up")]
    backed_up: bool,
    backup_path: String,
    backup_at: String,
    uploaded_at: String,
    exif: ExifView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExifView {
    datetime: String,
    camera_model: String,
}

fn sync_item(state: &AppState, record: MediaRecord) -> SyncStatusItem {
    SyncStatusItem {
        id: record.file.id.get(),
        path: state
            .service
            .virtual_path(std::path::Path::new(&record.file.filepath)),
        filename: record.file.filename,
        sha256: record.sha256.unwrap_or_default(),
        backed_up: record.backup.backed_up,
        backup_path: record.backup.backup_path.unwrap_or_default(),
        backup_at: record.backup.backup_at.unwrap_or_default(),
        uploaded_at: record.file.uploaded_at,
        exif: ExifView {
            datetime: record.file.exif_datetime.unwrap_or_default(),
            camera_model: record.file.camera_model.unwrap_or_default(),
        },
    }
}

pub async fn sync_status(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let service = state.service.clone();
    let records = blocking(move || {
        service
            .sync_status(SyncStatusQuery {
                device_id: params.device_id,
            })
            .map_err(ApiError::from)
    })
    .await?;

    Ok(Json(SyncStatusResponse {
        items: records
            .into_iter()
            .map(|record| sync_item(&state, record))
            .collect(),
    }))
}
