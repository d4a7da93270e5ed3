//! Deduplicated, content-addressed backup.
//!
//! Walks the origin, uploads at most one compressed block per distinct
//! content hash, and records the run as one snapshot in the store.

use crate::store::{RemoteStore, SnapshotStore, STATUS_SKIP, STATUS_UPLOAD};
use crate::types::{self, FileInfo};
use crate::{codec, Error, Result, StorageBackend};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Apply the content codec before upload.
    pub compress: bool,
    /// On a remote hash mismatch, mark the record `skip` instead of paying
    /// for a re-upload. Accepts possible staleness.
    pub skip_hash: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            compress: true,
            skip_hash: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct BackupReport {
    pub snapshot_id: i64,
    pub files_seen: u64,
    pub uploaded: u64,
    pub skipped: u64,
}

enum Decision {
    Upload(&'static str),
    Skip,
    Refresh,
}

/// Backs up `origin` into `destination`, writing one new snapshot.
///
/// The store file is written back to the destination even when the run fails
/// partway; the run error takes precedence over a writeback error.
pub async fn backup(
    origin: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    config: &BackupConfig,
) -> Result<BackupReport> {
    let remote_store = RemoteStore::fetch(destination).await?;
    let result = run(origin, destination, remote_store.store(), config).await;
    let writeback = remote_store.finish(destination).await;
    let report = result?;
    writeback?;
    Ok(report)
}

async fn run(
    origin: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    store: &SnapshotStore,
    config: &BackupConfig,
) -> Result<BackupReport> {
    let snapshot_id = store.create_snapshot().await?;
    info!(snapshot_id, "opened new snapshot");

    let mut report = BackupReport {
        snapshot_id,
        ..Default::default()
    };

    let mut files = origin.list().await?;
    while let Some(file) = files.next().await {
        report.files_seen += 1;
        match backup_file(origin, destination, store, config, snapshot_id, &file, &mut report).await
        {
            Ok(()) => {}
            // Store failures poison the whole run; everything else is
            // best-effort per file.
            Err(err @ Error::Store(_)) => return Err(err),
            Err(err) => error!(path = %file.path, "backing up file failed: {err}"),
        }
    }

    info!(
        files = report.files_seen,
        uploaded = report.uploaded,
        skipped = report.skipped,
        "backup pass finished"
    );
    Ok(report)
}

async fn backup_file(
    origin: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    store: &SnapshotStore,
    config: &BackupConfig,
    snapshot_id: i64,
    file: &FileInfo,
    report: &mut BackupReport,
) -> Result<()> {
    debug!(path = %file.path, hash = %file.content_hash, "considering file");

    let block = types::block_name(&file.content_hash);
    let prior = store
        .find_file_record_by_content_hash(&file.content_hash)
        .await?;
    let exists = destination.exists(&block).await;

    // A destination that cannot produce a hash for an existing block reads
    // as a mismatch, forcing a re-upload.
    let dest_hash = if exists {
        match destination.hash(&block).await {
            Ok(hash) => Some(hash),
            Err(err) => {
                warn!(block = %block, "could not hash remote block: {err}");
                None
            }
        }
    } else {
        None
    };

    let decision = if !exists {
        Decision::Upload("not present remotely")
    } else if prior.is_none() {
        Decision::Upload("never backed up")
    } else if dest_hash.as_deref() != prior.as_ref().map(|r| r.remote_hash.as_str()) {
        if config.skip_hash {
            Decision::Skip
        } else {
            Decision::Upload("remote hash mismatch")
        }
    } else {
        Decision::Refresh
    };

    let (remote_hash, status) = match decision {
        Decision::Upload(reason) => {
            info!(path = %file.path, reason, "uploading content block");
            let data = origin.get_file(&file.path).await?;
            let payload = if config.compress {
                codec::compress(&data)?
            } else {
                data.to_vec()
            };
            let remote_hash = destination.hash_of(&payload);
            debug!(block = %block, "writing block to destination");
            destination
                .save_file(&block, &payload, types::BLOCK_PERMISSION)
                .await?;
            report.uploaded += 1;
            (remote_hash, STATUS_UPLOAD)
        }
        Decision::Skip => {
            info!(path = %file.path, "remote hash mismatch, skip-hash set; leaving block untouched");
            report.skipped += 1;
            let recorded = prior.map(|r| r.remote_hash).unwrap_or_default();
            (recorded, STATUS_SKIP)
        }
        Decision::Refresh => {
            debug!(path = %file.path, "block already current");
            let current = dest_hash
                .or(prior.map(|r| r.remote_hash))
                .unwrap_or_default();
            (current, STATUS_UPLOAD)
        }
    };

    // Only reached once any required upload completed, so no record ever
    // references a partial block.
    store
        .insert_or_replace_file_record(
            &file.path,
            &file.content_hash,
            &file.permission,
            snapshot_id,
            &remote_hash,
            status,
        )
        .await
}
