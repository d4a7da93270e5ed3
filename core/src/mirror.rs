//! Path-preserving, non-deduplicated mirror sync.
//!
//! Unlike backup this keeps original paths at the destination verbatim, with
//! no content addressing and no metadata store. Conflicts resolve by
//! timestamp: a destination copy newer than the origin's is kept.

use crate::types::{self, FileInfo};
use crate::{Error, Result, StorageBackend};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct MirrorReport {
    pub copied: u64,
    pub skipped: u64,
    /// Destination copies kept because they were newer than the origin's.
    pub kept_newer: u64,
    pub deleted: u64,
}

/// Mirrors `origin` into `destination`. With `delete`, destination entries
/// absent from the origin are removed first.
pub async fn mirror(
    origin: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    delete: bool,
) -> Result<MirrorReport> {
    let mut report = MirrorReport::default();

    if delete {
        info!("deleting destination files that are not in the origin");
        let mut destination_files = destination.list().await?;
        while let Some(file) = destination_files.next().await {
            if origin.exists(&file.path).await {
                continue;
            }
            warn!(path = %file.path, "not found in origin, removing from destination");
            match destination.remove_file(&file.path).await {
                Ok(()) => report.deleted += 1,
                Err(err) => error!(path = %file.path, "removing file failed: {err}"),
            }
        }
    }

    info!("syncing files from origin to destination");
    let mut files = origin.list().await?;
    while let Some(file) = files.next().await {
        match mirror_file(origin, destination, &file, &mut report).await {
            Ok(()) => {}
            Err(err) => error!(path = %file.path, "syncing file failed: {err}"),
        }
    }

    info!(
        copied = report.copied,
        skipped = report.skipped,
        kept_newer = report.kept_newer,
        deleted = report.deleted,
        "mirror pass finished"
    );
    Ok(report)
}

async fn mirror_file(
    origin: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    file: &FileInfo,
    report: &mut MirrorReport,
) -> Result<()> {
    debug!(path = %file.path, hash = %file.content_hash, "considering file");

    let reason = if destination.exists(&file.path).await {
        let remote_hash = match destination.hash(&file.path).await {
            Ok(hash) => hash,
            Err(err) => {
                warn!(path = %file.path, "could not hash destination copy: {err}");
                String::new()
            }
        };
        if remote_hash == file.content_hash {
            debug!(path = %file.path, "destination copy already matches, skipping");
            report.skipped += 1;
            return Ok(());
        }

        let remote_modified = destination.last_modified(&file.path).await.map_err(|err| {
            Error::Transport(format!("last-modified lookup for {}: {err}", file.path))
        })?;
        if remote_modified > file.last_modified {
            warn!(
                path = %file.path,
                origin = %file.last_modified,
                destination = %remote_modified,
                "destination copy is newer, keeping it"
            );
            report.kept_newer += 1;
            return Ok(());
        }
        "destination copy hash does not match"
    } else {
        "not present at destination"
    };

    info!(path = %file.path, reason, "copying file to destination");
    let data = origin.get_file(&file.path).await?;
    destination
        .save_file(&file.path, &data, types::BLOCK_PERMISSION)
        .await?;
    report.copied += 1;
    Ok(())
}
