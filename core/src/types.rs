use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Name of the metadata store object at the root of the destination backend.
pub const STORE_FILE_NAME: &str = "snapshot_files.db";

/// Permission applied to content blocks and the written-back store file.
pub const BLOCK_PERMISSION: &str = "-rw-r--r--";

const BLOCK_PREFIX: &str = "block_";
const BLOCK_SUFFIX: &str = ".zst";

/// One entry produced by a backend listing pass.
///
/// Ephemeral: recomputed on every listing, never cached across runs.
/// `remote_hash` is only populated when the info was rebuilt from snapshot
/// records, not from a live listing.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub content_hash: String,
    pub file_name: String,
    pub permission: String,
    pub last_modified: DateTime<Utc>,
    pub remote_hash: Option<String>,
}

/// MD5 hex digest of an in-memory buffer.
///
/// This is the one textual hash representation every backend agrees on, so
/// digests computed by different backends stay comparable.
pub fn content_hash(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Deterministic destination name for the content block of a file with the
/// given content hash.
pub fn block_name(content_hash: &str) -> String {
    format!("{BLOCK_PREFIX}{content_hash}{BLOCK_SUFFIX}")
}

/// Parses a 10-character symbolic mode string (`-rw-r--r--`) into Unix
/// permission bits.
pub fn mode_bits(permission: &str) -> Result<u32> {
    let b = permission.as_bytes();
    if b.len() != 10 {
        return Err(Error::Decode(format!(
            "invalid permission string: {permission:?}"
        )));
    }

    let mut mode = 0u32;

    // Owner
    if b[1] == b'r' {
        mode |= 0o400;
    }
    if b[2] == b'w' {
        mode |= 0o200;
    }
    if b[3] == b'x' || b[3] == b's' {
        mode |= 0o100;
    }

    // Group
    if b[4] == b'r' {
        mode |= 0o040;
    }
    if b[5] == b'w' {
        mode |= 0o020;
    }
    if b[6] == b'x' || b[6] == b's' {
        mode |= 0o010;
    }

    // Others
    if b[7] == b'r' {
        mode |= 0o004;
    }
    if b[8] == b'w' {
        mode |= 0o002;
    }
    if b[9] == b'x' || b[9] == b't' {
        mode |= 0o001;
    }

    Ok(mode)
}

/// Renders Unix permission bits as the 10-character symbolic form used in
/// file records. Only the lower nine bits are considered; the type column is
/// always `-` because listings never yield directories.
pub fn mode_string(mode: u32) -> String {
    let mut s = String::with_capacity(10);
    s.push('-');
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}
