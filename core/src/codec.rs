//! Content codec for destination blocks.
//!
//! Blocks are zstd frames. Decompression passes unrecognized payloads through
//! untouched so backups taken with compression disabled restore with the same
//! code path.

use crate::{Error, Result};

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];
const LEVEL: i32 = 3;

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::encode_all(data, LEVEL).map_err(|e| Error::Decode(format!("zstd encode: {e}")))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if !data.starts_with(&ZSTD_MAGIC) {
        return Ok(data.to_vec());
    }
    zstd::stream::decode_all(data).map_err(|e| Error::Decode(format!("zstd decode: {e}")))
}
