//! Point-in-time restore from content-addressed blocks plus snapshot
//! metadata.

use crate::store::{RemoteStore, SnapshotRecord, SnapshotStore};
use crate::types;
use crate::{codec, Error, Result, StorageBackend};
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub snapshot_id: i64,
    pub restored: u64,
    pub unchanged: u64,
    /// Origin files matching no record in the snapshot. Reported only,
    /// never deleted.
    pub stray: u64,
}

/// Restores the selected snapshot from `destination` into `origin`.
///
/// `snapshot_date` selects a snapshot by exact date; `None` picks the most
/// recent one. Any failure to fetch, decode, or write a required block is
/// fatal for the run.
pub async fn restore(
    origin: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    snapshot_date: Option<&str>,
    clean: bool,
) -> Result<RestoreReport> {
    let remote_store = RemoteStore::fetch(destination).await?;
    let result = run(origin, destination, remote_store.store(), snapshot_date, clean).await;
    let writeback = remote_store.finish(destination).await;
    let report = result?;
    writeback?;
    Ok(report)
}

async fn run(
    origin: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    store: &SnapshotStore,
    snapshot_date: Option<&str>,
    clean: bool,
) -> Result<RestoreReport> {
    let snapshot = resolve_snapshot(store, snapshot_date).await?;
    info!(id = snapshot.id, date = %snapshot.date, "restoring snapshot");

    let records = store.list_file_records_by_snapshot(snapshot.id).await?;
    let mut report = RestoreReport {
        snapshot_id: snapshot.id,
        ..Default::default()
    };

    if clean {
        report.stray = report_strays(origin, &records).await?;
    }

    for record in &records {
        debug!(path = %record.original_path, "restoring file");

        let current = if origin.exists(&record.original_path).await {
            origin.hash(&record.original_path).await.ok()
        } else {
            None
        };
        if current.as_deref() == Some(record.md5.as_str()) {
            debug!(path = %record.original_path, "file already matches the snapshot");
            report.unchanged += 1;
            continue;
        }

        let block = types::block_name(&record.md5);
        let data = destination.get_file(&block).await.map_err(|err| {
            if err.is_not_found() {
                Error::BlockMissing {
                    name: block.clone(),
                }
            } else {
                err
            }
        })?;
        let plain = codec::decompress(&data)?;
        origin
            .save_file(&record.original_path, &plain, &record.permission)
            .await?;
        report.restored += 1;
    }

    info!(
        restored = report.restored,
        unchanged = report.unchanged,
        "restore pass finished"
    );
    Ok(report)
}

async fn resolve_snapshot(
    store: &SnapshotStore,
    snapshot_date: Option<&str>,
) -> Result<SnapshotRecord> {
    match snapshot_date {
        Some(date) => {
            info!(date, "searching for snapshot by date");
            store
                .find_snapshot_by_date(date)
                .await?
                .ok_or_else(|| Error::SnapshotNotFound {
                    selector: date.to_string(),
                })
        }
        None => {
            warn!("no snapshot date given, using the most recent snapshot");
            store
                .most_recent_snapshot()
                .await?
                .ok_or_else(|| Error::SnapshotNotFound {
                    selector: "latest".to_string(),
                })
        }
    }
}

/// Reports origin files whose content hash matches no record in the target
/// snapshot. Removal stays advisory.
async fn report_strays(
    origin: &dyn StorageBackend,
    records: &[crate::store::FileRecord],
) -> Result<u64> {
    warn!("clean flag set - reporting origin files that are not in the snapshot");
    let known: HashSet<&str> = records.iter().map(|r| r.md5.as_str()).collect();

    let mut stray = 0;
    let mut files = origin.list().await?;
    while let Some(file) = files.next().await {
        if !known.contains(file.content_hash.as_str()) {
            warn!(path = %file.path, "origin file is not part of the snapshot, candidate for removal");
            stray += 1;
        }
    }
    Ok(stray)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{backup, BackupConfig};
    use crate::testutil::MemoryBackend;
    use crate::types::block_name;

    async fn backed_up_destination() -> MemoryBackend {
        let origin = MemoryBackend::new();
        origin.put_with_permission("a.txt", b"hello", "-rw-------");
        origin.put("dir/b.txt", b"world");
        let destination = MemoryBackend::new();
        backup(&origin, &destination, &BackupConfig::default())
            .await
            .unwrap();
        destination
    }

    #[tokio::test]
    async fn test_round_trip_into_empty_origin() {
        let destination = backed_up_destination().await;
        let fresh = MemoryBackend::new();

        let report = restore(&fresh, &destination, None, false).await.unwrap();
        assert_eq!(report.restored, 2);
        assert_eq!(report.unchanged, 0);

        assert_eq!(fresh.contents("a.txt").unwrap(), b"hello");
        assert_eq!(fresh.permission("a.txt").unwrap(), "-rw-------");
        assert_eq!(fresh.contents("dir/b.txt").unwrap(), b"world");
        // The metadata store is not part of the restored tree.
        assert!(fresh.contents(types::STORE_FILE_NAME).is_none());
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        let destination = backed_up_destination().await;
        let fresh = MemoryBackend::new();

        restore(&fresh, &destination, None, false).await.unwrap();
        let second = restore(&fresh, &destination, None, false).await.unwrap();
        assert_eq!(second.restored, 0);
        assert_eq!(second.unchanged, 2);
    }

    #[tokio::test]
    async fn test_unknown_date_is_snapshot_not_found() {
        let destination = backed_up_destination().await;
        let fresh = MemoryBackend::new();

        let err = restore(&fresh, &destination, Some("1999-01-01 00:00:00"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SnapshotNotFound { .. }));
    }

    #[tokio::test]
    async fn test_empty_store_is_snapshot_not_found() {
        let destination = MemoryBackend::new();
        let fresh = MemoryBackend::new();

        let err = restore(&fresh, &destination, None, false).await.unwrap_err();
        assert!(matches!(err, Error::SnapshotNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_block_is_fatal() {
        let destination = backed_up_destination().await;
        let block = block_name(&types::content_hash(b"hello"));
        destination.remove(&block);
        let fresh = MemoryBackend::new();

        let err = restore(&fresh, &destination, None, false).await.unwrap_err();
        assert!(matches!(err, Error::BlockMissing { .. }));
    }

    #[tokio::test]
    async fn test_clean_reports_strays_without_deleting() {
        let destination = backed_up_destination().await;
        let origin = MemoryBackend::new();
        origin.put("stray.txt", b"not backed up");

        let report = restore(&origin, &destination, None, true).await.unwrap();
        assert_eq!(report.stray, 1);
        // Advisory only: the stray file survives.
        assert_eq!(origin.contents("stray.txt").unwrap(), b"not backed up");
    }
}
