use crate::types::{self, FileInfo};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// A lazy, finite, non-restartable sequence of listing entries.
///
/// The scanning side runs in a background task and hands entries over through
/// a bounded channel of capacity one, so the producer blocks until the
/// consumer drains the previous entry. Dropping the stream cancels the walk
/// on the producer's next send.
pub struct FileStream {
    rx: mpsc::Receiver<FileInfo>,
}

impl FileStream {
    /// Creates the bounded handoff pair backing a listing pass. The backend
    /// moves the sender into its producer task and returns the stream.
    pub fn channel() -> (mpsc::Sender<FileInfo>, FileStream) {
        let (tx, rx) = mpsc::channel(1);
        (tx, FileStream { rx })
    }

    /// Next entry, or `None` once the walk has finished.
    pub async fn next(&mut self) -> Option<FileInfo> {
        self.rx.recv().await
    }
}

/// Capability set shared by every storage endpoint (local filesystem, SSH
/// host, WebDAV server). The engines are written once against this trait and
/// reused across any origin/destination pairing.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Enumerates every non-directory entry under the backend root,
    /// recursively, with root-relative paths. Unreadable entries are skipped
    /// with a warning; protocol-level failures end the stream early.
    async fn list(&self) -> Result<FileStream>;

    /// Existence check. Never errors; any lookup failure reads as absent.
    async fn exists(&self, path: &str) -> bool;

    async fn get_file(&self, path: &str) -> Result<Bytes>;

    /// Creates missing parent directories, writes the content, then applies
    /// the symbolic permission string. Overwrites unconditionally. A failed
    /// permission change after a successful write is reported but does not
    /// roll the content back.
    async fn save_file(&self, path: &str, data: &[u8], permission: &str) -> Result<()>;

    async fn remove_file(&self, path: &str) -> Result<()>;

    /// Content hash of the file at `path`, computed by whatever means is
    /// native to the backend, in the shared MD5 hex representation.
    async fn hash(&self, path: &str) -> Result<String>;

    /// Backend-native last-modified time, normalized to UTC.
    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>>;

    /// Hash of an already-in-memory buffer. Pure and backend-independent;
    /// used after compression so upload verification never re-reads from the
    /// network.
    fn hash_of(&self, data: &[u8]) -> String {
        types::content_hash(data)
    }
}
