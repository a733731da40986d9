//! Pre-signed URL issuing.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{SyncError, SyncResult};
use crate::store::ObjectStore;

/// Issues time-bounded pre-signed URLs against the object store.
pub struct UrlSigner {
    store: Arc<dyn ObjectStore>,
}

impl UrlSigner {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Returns a URL granting access to `key` until `expires_at`.
    ///
    /// Fails with `SyncError::Config` before touching the store if the
    /// expiry is already in the past — callers should never receive an
    /// expired URL.
    pub async fn presigned_url(
        &self,
        key: &str,
        version: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<String> {
        let now = Utc::now();
        if expires_at <= now {
            return Err(SyncError::Config(format!(
                "requested expiry {expires_at} is not in the future"
            )));
        }
        let expires_in = (expires_at - now)
            .to_std()
            .map_err(|e| SyncError::Config(format!("invalid expiry {expires_at}: {e}")))?;

        self.store.presign_get(key, version, expires_in).await
    }
}
