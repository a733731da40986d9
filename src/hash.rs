//! Streaming content hashing for change detection.
//!
//! The digest is stored as custom object metadata at upload time so later
//! diffs can detect unchanged content even when timestamps are unreliable.
//! Same bytes always yield the same digest.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::SyncResult;

/// Custom-metadata key holding the content digest
/// (`x-amz-meta-hashtag` on the wire).
pub const HASH_TAG_KEY: &str = "hashtag";

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Hashes a file's content without materializing it in memory.
pub async fn hash_file(path: &Path) -> SyncResult<String> {
    let file = tokio::fs::File::open(path).await?;
    hash_reader(file).await
}

/// Hashes everything the reader yields, in constant memory.
pub async fn hash_reader<R: AsyncRead + Unpin>(mut reader: R) -> SyncResult<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
