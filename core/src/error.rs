use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("snapshot store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("snapshot not found: {selector}")]
    SnapshotNotFound { selector: String },

    #[error("content block missing: {name}")]
    BlockMissing { name: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
