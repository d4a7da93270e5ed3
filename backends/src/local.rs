use async_trait::async_trait;
use blocksync_core::backend::{FileStream, StorageBackend};
use blocksync_core::types::{self, FileInfo};
use blocksync_core::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Local filesystem backend rooted at a directory.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

/// MD5 of a file, streamed in chunks rather than slurped whole.
fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

#[cfg(unix)]
fn permission_of(metadata: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    types::mode_string(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn permission_of(_metadata: &std::fs::Metadata) -> String {
    types::BLOCK_PERMISSION.to_string()
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn list(&self) -> Result<FileStream> {
        let root = self.root.clone();
        let (tx, stream) = FileStream::channel();

        // The walk is blocking I/O; it hands entries to the consumer one at
        // a time through the bounded channel.
        tokio::task::spawn_blocking(move || {
            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!("skipping unreadable entry: {err}");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }

                let relative = match entry.path().strip_prefix(&root) {
                    Ok(relative) => relative.to_string_lossy().into_owned(),
                    Err(_) => continue,
                };
                let metadata = match entry.metadata() {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        warn!(path = %relative, "skipping entry without metadata: {err}");
                        continue;
                    }
                };
                let content_hash = match hash_file(entry.path()) {
                    Ok(hash) => hash,
                    Err(err) => {
                        warn!(path = %relative, "skipping unhashable entry: {err}");
                        continue;
                    }
                };
                let last_modified: DateTime<Utc> = match metadata.modified() {
                    Ok(modified) => modified.into(),
                    Err(_) => DateTime::UNIX_EPOCH,
                };

                debug!(path = %relative, hash = %content_hash, "found file");
                let info = FileInfo {
                    file_name: entry.file_name().to_string_lossy().into_owned(),
                    permission: permission_of(&metadata),
                    path: relative,
                    content_hash,
                    last_modified,
                    remote_hash: None,
                };
                if tx.blocking_send(info).is_err() {
                    // Consumer went away; stop walking.
                    break;
                }
            }
        });

        Ok(stream)
    }

    async fn exists(&self, path: &str) -> bool {
        fs::try_exists(self.full_path(path)).await.unwrap_or(false)
    }

    async fn get_file(&self, path: &str) -> Result<Bytes> {
        match fs::read(self.full_path(path)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(path))
            }
            Err(err) => Err(Error::Transport(format!("reading {path}: {err}"))),
        }
    }

    async fn save_file(&self, path: &str, data: &[u8], permission: &str) -> Result<()> {
        let full_path = self.full_path(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| Error::Write(format!("creating directories for {path}: {err}")))?;
        }
        fs::write(&full_path, data)
            .await
            .map_err(|err| Error::Write(format!("writing {path}: {err}")))?;

        // The content is already on disk; a chmod failure is reported but
        // not rolled back.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = types::mode_bits(permission)?;
            if let Err(err) =
                fs::set_permissions(&full_path, std::fs::Permissions::from_mode(mode)).await
            {
                warn!(path, "could not apply permissions {permission}: {err}");
            }
        }
        #[cfg(not(unix))]
        let _ = permission;

        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.full_path(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(path))
            }
            Err(err) => Err(Error::Write(format!("removing {path}: {err}"))),
        }
    }

    async fn hash(&self, path: &str) -> Result<String> {
        let full_path = self.full_path(path);
        tokio::task::spawn_blocking(move || hash_file(&full_path))
            .await
            .map_err(|err| Error::Transport(format!("hash task failed: {err}")))?
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => Error::not_found(path),
                _ => Error::Transport(format!("hashing {path}: {err}")),
            })
    }

    async fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let metadata = fs::metadata(self.full_path(path))
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => Error::not_found(path),
                _ => Error::Transport(format!("stat {path}: {err}")),
            })?;
        let modified = metadata
            .modified()
            .map_err(|err| Error::Transport(format!("modified time of {path}: {err}")))?;
        Ok(modified.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn drain(backend: &LocalBackend) -> Vec<FileInfo> {
        let mut stream = backend.list().await.unwrap();
        let mut entries = Vec::new();
        while let Some(info) = stream.next().await {
            entries.push(info);
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    #[tokio::test]
    async fn test_list_yields_relative_paths_and_hashes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

        let backend = LocalBackend::new(dir.path());
        let entries = drain(&backend).await;

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "a.txt");
        assert_eq!(entries[0].content_hash, types::content_hash(b"hello"));
        assert_eq!(entries[0].file_name, "a.txt");
        assert_eq!(entries[1].path, "sub/b.txt");
    }

    #[tokio::test]
    async fn test_save_creates_parents_and_applies_mode() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());

        backend
            .save_file("deep/nested/file.txt", b"content", "-rw-------")
            .await
            .unwrap();

        assert_eq!(
            backend.get_file("deep/nested/file.txt").await.unwrap(),
            Bytes::from_static(b"content")
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join("deep/nested/file.txt"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_get_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path());
        let err = backend.get_file("nope.txt").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!backend.exists("nope.txt").await);
    }

    #[tokio::test]
    async fn test_remove_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let backend = LocalBackend::new(dir.path());

        backend.remove_file("a.txt").await.unwrap();
        assert!(!backend.exists("a.txt").await);
        assert!(backend.remove_file("a.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_hash_matches_buffer_hash() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let backend = LocalBackend::new(dir.path());

        assert_eq!(
            backend.hash("a.txt").await.unwrap(),
            backend.hash_of(b"hello")
        );
    }
}
