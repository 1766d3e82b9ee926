use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use homecloud_application::{
    timestamp, ApplicationError, BackupJob, BackupRetryPolicy, Clock, MediaRepository,
};
use homecloud_domain::MediaId;
use tracing::{debug, info, warn};
use super::storage::temp_name;
use crate::workers::JobHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Copied(PathBuf),
    /// The destination was already present; only the record was updated.
    AlreadyPresent(PathBuf),
}

/// Copies synced uploads into the backup root, mirroring their layout below
/// the data root, and keeps the record's backup columns current.
pub struct FsBackupReplicator {
    data_root: PathBuf,
    backup_root: PathBuf,
    catalog: Arc<dyn MediaRepository>,
    clock: Arc<dyn Clock>,
    policy: BackupRetryPolicy,
}

impl FsBackupReplicator {
    pub fn new(
        data_root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        catalog: Arc<dyn MediaRepository>,
        clock: Arc<dyn Clock>,
        policy: BackupRetryPolicy,
    ) -> Self {
        Self {
            data_root: data_root.into(),
            backup_root: backup_root.into(),
            catalog,
            clock,
            policy,
        }
    }

    pub fn destination_for(&self, source: &Path) -> Result<PathBuf, ApplicationError> {
        let relative = source.strip_prefix(&self.data_root).map_err(|_| {
            ApplicationError::InvalidInput(format!(
                "{} is outside the data root",
                source.display()
            ))
        })?;
        Ok(self.backup_root.join(relative))
    }

    pub fn replicate(&self, job: &BackupJob) -> Result<BackupOutcome, ApplicationError> {
        if !job.source.is_file() {
            return Err(ApplicationError::NotFound(format!(
                "backup source missing: {}",
                job.source.display()
            )));
        }
        let destination = self.destination_for(&job.source)?;

        let outcome = if destination.exists() {
            BackupOutcome::AlreadyPresent(destination.clone())
        } else {
            copy_atomically(&job.source, &destination)
                .map_err(|error| ApplicationError::Io(error.to_string()))?;
            BackupOutcome::Copied(destination.clone())
        };

        self.catalog.mark_backed_up(
            job.media_id,
            &destination.to_string_lossy(),
            &self.clock.now_timestamp_string(),
        )?;
        Ok(outcome)
    }

    fn record_failure(&self, id: MediaId) {
        let previous = match self.catalog.find_by_id(id) {
            Ok(Some(record)) => record.backup.retry_count,
            Ok(None) => {
                debug!(id = id.get(), "record vanished; nothing to retry");
                return;
            }
            Err(error) => {
                warn!(id = id.get(), %error, "could not load record for retry bookkeeping");
                return;
            }
        };

        let failures = previous + 1;
        let next_retry_at = timestamp(self.policy.next_attempt_at(self.clock.now(), failures));
        if failures >= self.policy.max_retries {
            warn!(id = id.get(), failures, "backup retries exhausted");
        }
        if let Err(error) = self
            .catalog
            .record_backup_failure(id, failures, &next_retry_at)
        {
            warn!(id = id.get(), %error, "failed to record backup failure");
        }
    }
}

/// Copies to a hidden `.part-<uuid>` sibling, syncs it, then renames into place.
fn copy_atomically(source: &Path, destination: &Path) -> io::Result<()> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let partial = parent.join(temp_name("part", &name));

    let copied = fs::copy(source, &partial)
        .and_then(|_| File::open(&partial)?.sync_all())
        .and_then(|_| fs::rename(&partial, destination));
    if copied.is_err() {
        let _ = fs::remove_file(&partial);
    }
    copied
}

impl JobHandler<BackupJob> for FsBackupReplicator {
    fn handle(&self, job: BackupJob) {
        match self.replicate(&job) {
            Ok(BackupOutcome::Copied(destination)) => {
                info!(id = job.media_id.get(), destination = %destination.display(), "backed up");
            }
            Ok(BackupOutcome::AlreadyPresent(destination)) => {
                debug!(id = job.media_id.get(), destination = %destination.display(), "backup already present");
            }
            Err(error) => {
                warn!(id = job.media_id.get(), source = %job.source.display(), %error, "backup failed");
                self.record_failure(job.media_id);
            }
        }
    }
}
