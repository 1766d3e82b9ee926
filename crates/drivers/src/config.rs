use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

const DEFAULT_DATA_DIR: &str = "/data";
const DATABASE_FILE: &str = "metadata.db";
const BACKUP_DIR_NAME: &str = ".backups";
const MAX_WORKERS: usize = 16;

#[derive(Debug, Parser)]
#[command(name = "homecloud", version, about = "Personal media store")]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Walk the data directory once and record every file.
    Index,
    /// Query the catalog from the command line.
    Search {
        query: Option<String>,
        #[arg(long)]
        regex: bool,
        #[arg(long)]
        semantic: bool,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
        #[arg(long)]
        mime: Option<String>,
        #[arg(long)]
        date_from: Option<String>,
        #[arg(long)]
        date_to: Option<String>,
    },
    /// Print backup state of recent device uploads.
    SyncStatus {
        #[arg(long)]
        device_id: Option<String>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct Settings {
    #[arg(long, env = "DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Defaults to `<data dir>/.backups`.
    #[arg(long, env = "BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    #[arg(long, env = "THUMB_WORKERS", default_value_t = 3)]
    pub thumb_workers: usize,

    #[arg(long, env = "BACKUP_WORKERS", default_value_t = 3)]
    pub backup_workers: usize,

    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 3 << 30)]
    pub max_upload_bytes: u64,

    #[arg(long, env = "AI_SERVICE_URL")]
    pub ai_service_url: Option<String>,

    #[arg(long, env = "QDRANT_URL")]
    pub qdrant_url: Option<String>,

    #[arg(long, env = "MEDIA_SERVER_URL")]
    pub media_server_url: Option<String>,

    /// Seconds between scans for failed backups.
    #[arg(long, env = "BACKUP_RETRY_SECS", default_value_t = 60)]
    pub backup_retry_secs: u64,

    #[arg(long, env = "BACKUP_MAX_RETRIES", default_value_t = 5)]
    pub backup_max_retries: i64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Canonical path; every stored file lives below it.
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub thumb_workers: usize,
    pub backup_workers: usize,
    pub max_upload_bytes: u64,
    /// Set only when both the embedding service and the vector store are known.
    pub semantic: Option<SemanticEndpoints>,
    pub media_server_url: Option<String>,
    pub backup_retry_interval: Duration,
    pub backup_max_retries: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticEndpoints {
    pub ai_service_url: String,
    pub qdrant_url: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl AppConfig {
    /// Creates the data directory when missing and resolves it to its
    /// canonical form.
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&settings.data_dir).with_context(|| {
            format!("creating data dir {}", settings.data_dir.display())
        })?;
        let data_dir = settings.data_dir.canonicalize().with_context(|| {
            format!("resolving data dir {}", settings.data_dir.display())
        })?;
        let backup_dir = settings
            .backup_dir
            .unwrap_or_else(|| data_dir.join(BACKUP_DIR_NAME));
        std::fs::create_dir_all(&backup_dir)
            .with_context(|| format!("creating backup dir {}", backup_dir.display()))?;
        let backup_dir = backup_dir
            .canonicalize()
            .with_context(|| format!("resolving backup dir {}", backup_dir.display()))?;

        let semantic = match (
            non_blank(settings.ai_service_url),
            non_blank(settings.qdrant_url),
        ) {
            (Some(ai_service_url), Some(qdrant_url)) => Some(SemanticEndpoints {
                ai_service_url,
                qdrant_url,
            }),
            _ => None,
        };

        Ok(Self {
            database_path: data_dir.join(DATABASE_FILE),
            data_dir,
            backup_dir,
            bind_addr: settings.bind_addr,
            thumb_workers: settings.thumb_workers.clamp(1, MAX_WORKERS),
            backup_workers: settings.backup_workers.clamp(1, MAX_WORKERS),
            max_upload_bytes: settings.max_upload_bytes.max(1),
            semantic,
            media_server_url: non_blank(settings.media_server_url),
            backup_retry_interval: Duration::from_secs(settings.backup_retry_secs.max(1)),
            backup_max_retries: settings.backup_max_retries.max(0),
        })
    }
}
