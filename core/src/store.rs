//! Snapshot metadata store.
//!
//! The store is a single SQLite file that lives at the root of the
//! destination backend and travels with the backed-up data. Each run pulls it
//! into a local scratch directory, mutates it there, and writes it back on
//! completion.

use crate::types::{self, FileInfo};
use crate::{Result, StorageBackend};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};

pub const STATUS_UPLOAD: &str = "upload";
pub const STATUS_SKIP: &str = "skip";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One file record, uniquely keyed by `original_path`.
///
/// `md5` is the content hash of the original, uncompressed file;
/// `remote_hash` is the hash of the compressed block actually stored at the
/// destination. All records sharing an `md5` are expected to reference the
/// same `remote_hash` once uploaded.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FileRecord {
    pub original_path: String,
    pub md5: String,
    pub permission: String,
    pub snapshot_id: i64,
    pub remote_hash: String,
    pub status: String,
}

impl FileRecord {
    /// Rebuilds a listing entry from a stored record. This is the one place
    /// `remote_hash` gets populated; live listings never carry it. Records
    /// store no timestamp, so `last_modified` is the epoch.
    pub fn to_file_info(&self) -> FileInfo {
        FileInfo {
            file_name: self
                .original_path
                .rsplit('/')
                .next()
                .unwrap_or(&self.original_path)
                .to_string(),
            path: self.original_path.clone(),
            content_hash: self.md5.clone(),
            permission: self.permission.clone(),
            last_modified: DateTime::UNIX_EPOCH,
            remote_hash: Some(self.remote_hash.clone()),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRecord {
    pub id: i64,
    pub date: String,
    pub status: String,
}

pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    /// Opens (or creates) the store at the given local path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            // The store must stay a single file for the writeback step;
            // WAL mode would leave sidecar files behind.
            .journal_mode(SqliteJournalMode::Truncate);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshot_files (
                original_path TEXT PRIMARY KEY,
                md5 TEXT NOT NULL,
                permission TEXT,
                snapshot_id INTEGER,
                remote_hash TEXT,
                status TEXT DEFAULT 'pending'
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                status TEXT DEFAULT 'pending'
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_or_replace_file_record(
        &self,
        original_path: &str,
        md5: &str,
        permission: &str,
        snapshot_id: i64,
        remote_hash: &str,
        status: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO snapshot_files
                (original_path, md5, permission, snapshot_id, remote_hash, status)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(original_path)
        .bind(md5)
        .bind(permission)
        .bind(snapshot_id)
        .bind(remote_hash)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_file_records(&self) -> Result<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(
            "SELECT original_path, md5, permission, snapshot_id, remote_hash, status
             FROM snapshot_files ORDER BY original_path",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn list_file_records_by_snapshot(&self, snapshot_id: i64) -> Result<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(
            "SELECT original_path, md5, permission, snapshot_id, remote_hash, status
             FROM snapshot_files WHERE snapshot_id = ? ORDER BY original_path",
        )
        .bind(snapshot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn find_file_record_by_content_hash(&self, hash: &str) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT original_path, md5, permission, snapshot_id, remote_hash, status
             FROM snapshot_files WHERE md5 = ? LIMIT 1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Opens a new snapshot, returning its store-assigned id.
    pub async fn create_snapshot(&self) -> Result<i64> {
        let date = Utc::now().format(DATE_FORMAT).to_string();
        let result = sqlx::query("INSERT INTO snapshots (date) VALUES (?)")
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        let snapshots = sqlx::query_as::<_, SnapshotRecord>(
            "SELECT id, date, status FROM snapshots ORDER BY date, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(snapshots)
    }

    pub async fn find_snapshot_by_date(&self, date: &str) -> Result<Option<SnapshotRecord>> {
        let snapshot = sqlx::query_as::<_, SnapshotRecord>(
            "SELECT id, date, status FROM snapshots WHERE date = ?",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(snapshot)
    }

    /// Most recent snapshot by date. Dates have second resolution, so the id
    /// breaks ties between runs landing in the same second.
    pub async fn most_recent_snapshot(&self) -> Result<Option<SnapshotRecord>> {
        let snapshot = sqlx::query_as::<_, SnapshotRecord>(
            "SELECT id, date, status FROM snapshots ORDER BY date DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(snapshot)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Fetch/writeback guard for the destination-resident store file.
///
/// `fetch` pulls `snapshot_files.db` from the destination into a scratch
/// directory (deleting the remote copy so a crashed run cannot be silently
/// resumed against a stale one) and opens it; `finish` closes the store,
/// pushes the file back, and discards the scratch.
pub struct RemoteStore {
    store: SnapshotStore,
    local_path: PathBuf,
    _scratch: TempDir,
}

impl RemoteStore {
    pub async fn fetch(destination: &dyn StorageBackend) -> Result<Self> {
        let scratch = TempDir::new()?;
        let local_path = scratch.path().join(types::STORE_FILE_NAME);

        match destination.get_file(types::STORE_FILE_NAME).await {
            Ok(data) => {
                info!("snapshot store found at destination, pulling a scratch copy");
                tokio::fs::write(&local_path, &data).await?;
                if let Err(err) = destination.remove_file(types::STORE_FILE_NAME).await {
                    warn!("could not remove the remote store copy: {err}");
                }
            }
            Err(err) if err.is_not_found() => {
                info!("no snapshot store at destination, starting a fresh one");
            }
            Err(err) => return Err(err),
        }

        let store = SnapshotStore::open(&local_path).await?;
        Ok(Self {
            store,
            local_path,
            _scratch: scratch,
        })
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Closes the store and writes the scratch file back to the destination.
    pub async fn finish(self, destination: &dyn StorageBackend) -> Result<()> {
        self.store.close().await;
        info!("saving snapshot store back to destination");
        let data = tokio::fs::read(&self.local_path).await?;
        destination
            .save_file(types::STORE_FILE_NAME, &data, types::BLOCK_PERMISSION)
            .await
    }
}
