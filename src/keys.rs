//! Encryption key provisioning.
//!
//! Generates symmetric key material for SSE-C transfers and persists it
//! base64-encoded at a caller-chosen location. The key's lifetime is owned
//! by the caller; transfers read it fresh from disk each time, and nothing
//! is retained in process memory beyond the call.

use std::path::Path;

use base64::prelude::{Engine, BASE64_STANDARD};
use md5::{Digest, Md5};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Key sizes accepted by AES.
pub const SUPPORTED_KEY_BITS: [u32; 3] = [128, 192, 256];

/// Default key size in bits.
pub const DEFAULT_KEY_BITS: u32 = 256;

/// A key loaded from disk, in the two encodings SSE-C requests need.
#[derive(Clone, Debug)]
pub struct LoadedKey {
    pub key_b64: String,
    pub key_md5_b64: String,
}

/// Generates cryptographically random key material of `bits` length and
/// writes it base64-encoded to `location`.
///
/// Fails with `SyncError::Config` before touching the file system if the
/// length is not a supported symmetric key size.
pub async fn generate_key(location: &Path, bits: u32) -> SyncResult<()> {
    if !SUPPORTED_KEY_BITS.contains(&bits) {
        return Err(SyncError::Config(format!(
            "unsupported key size {bits}; expected one of {SUPPORTED_KEY_BITS:?}"
        )));
    }

    let mut material = vec![0u8; (bits / 8) as usize];
    OsRng.fill_bytes(&mut material);
    let encoded = BASE64_STANDARD.encode(&material);

    if let Some(parent) = location.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(location, encoded).await?;

    debug!("wrote {bits}-bit encryption key to {}", location.display());
    Ok(())
}

/// Reads a persisted key and derives the MD5 digest SSE-C requires
/// alongside it.
pub async fn load_key(location: &Path) -> SyncResult<LoadedKey> {
    let encoded = tokio::fs::read_to_string(location)
        .await
        .map_err(|_| SyncError::NotFound(format!("encryption key {}", location.display())))?;
    let encoded = encoded.trim().to_string();

    let raw = BASE64_STANDARD.decode(&encoded).map_err(|e| {
        SyncError::Config(format!(
            "encryption key {} is not valid base64: {e}",
            location.display()
        ))
    })?;
    if !SUPPORTED_KEY_BITS.contains(&((raw.len() * 8) as u32)) {
        return Err(SyncError::Config(format!(
            "encryption key {} has unsupported length {} bits",
            location.display(),
            raw.len() * 8
        )));
    }

    let key_md5_b64 = BASE64_STANDARD.encode(Md5::digest(&raw));
    Ok(LoadedKey {
        key_b64: encoded,
        key_md5_b64,
    })
}
