//! In-memory backend for exercising the engines without touching disk or
//! network.

use crate::backend::{FileStream, StorageBackend};
use crate::types::{self, FileInfo};
use crate::{Error, Result, SnapshotStore};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    permission: String,
    modified: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryBackend {
    files: Mutex<BTreeMap<String, Entry>>,
    failing_reads: Mutex<HashSet<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, data: &[u8]) {
        self.put_entry(path, data, types::BLOCK_PERMISSION, Utc::now());
    }

    pub fn put_with_permission(&self, path: &str, data: &[u8], permission: &str) {
        self.put_entry(path, data, permission, Utc::now());
    }

    pub fn put_with_modified(&self, path: &str, data: &[u8], modified: DateTime<Utc>) {
        self.put_entry(path, data, types::BLOCK_PERMISSION, modified);
    }

    fn put_entry(&self, path: &str, data: &[u8], permission: &str, modified: DateTime<Utc>) {
        self.files.lock().unwrap().insert(
            path.to_string(),
            Entry {
                data: data.to_vec(),
                permission: permission.to_string(),
                modified,
            },
        );
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).map(|e| e.data.clone())
    }

    pub fn permission(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|e| e.permission.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    /// Makes every subsequent `get_file` of `path` fail with a transport
    /// error, simulating an unreadable file.
    pub fn fail_reads_of(&self, path: &str) {
        self.failing_reads.lock().unwrap().insert(path.to_string());
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn list(&self) -> Result<FileStream> {
        let entries: Vec<FileInfo> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(path, entry)| FileInfo {
                path: path.clone(),
                content_hash: types::content_hash(&entry.data),
                file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
                permission: entry.permission.clone(),
                last_modified: entry.modified,
                remote_hash: None,
            })
            .collect();

        let (tx, stream) = FileStream::channel();
        tokio::spawn(async move {
            for info in entries {
                if tx.send(info).await.is_err() {
                    break;
                }
            }
        });
        Ok(stream)
    }

    async fn exists(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    async fn get_file(&self, path: &str) -> Result<Bytes> {
        if self.failing_reads.lock().unwrap().contains(path) {
            return Err(Error::Transport(format!("simulated read failure: {path}")));
        }
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|e| Bytes::from(e.data.clone()))
            .ok_or_else(|| Error::not_found(path))
    }

    async fn save_file(&self, path: &str, data: &[u8], permission: &str) -> Result<()> {
        self.put_entry(path, data, permission, Utc::now());
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        match self.files.lock().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(path)),
        }
    }

    async fn hash(&self, path: &str) -> Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|e| types::content_hash(&e.data))
            .ok_or_else(|| Error::not_found(path))
    }

    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|e| e.modified)
            .ok_or_else(|| Error::not_found(path))
    }
}

/// Copies the store file out of a destination backend and opens it for
/// inspection. The returned directory keeps the copy alive.
pub async fn store_from_destination(destination: &MemoryBackend) -> (SnapshotStore, TempDir) {
    let data = destination
        .contents(types::STORE_FILE_NAME)
        .expect("destination has no snapshot store file");
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(types::STORE_FILE_NAME);
    std::fs::write(&path, data).unwrap();
    let store = SnapshotStore::open(&path).await.unwrap();
    (store, dir)
}
