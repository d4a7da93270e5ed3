pub mod backend;
pub mod backup;
pub mod codec;
pub mod error;
pub mod mirror;
pub mod restore;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use backend::{FileStream, StorageBackend};
pub use backup::{backup, BackupConfig, BackupReport};
pub use error::{Error, Result};
pub use mirror::{mirror, MirrorReport};
pub use restore::{restore, RestoreReport};
pub use store::{FileRecord, RemoteStore, SnapshotRecord, SnapshotStore};
pub use types::FileInfo;
