//! Bucket, sync, and transfer configuration.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Minimum multipart part size accepted by S3 (5 MiB).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum multipart part size accepted by S3 (5 GiB).
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts in a single multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// Identity of the target bucket and how to reach it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketConfig {
    /// S3 bucket name.
    pub bucket: String,

    /// AWS region for the bucket.
    pub region: String,

    /// Optional endpoint override (for MinIO in testing).
    pub endpoint_override: Option<String>,

    /// Explicit credentials. When absent the ambient provider chain
    /// (environment, profile, IAM role) is used.
    pub credentials: Option<ExplicitCredentials>,
}

impl BucketConfig {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint_override: None,
            credentials: None,
        }
    }
}

/// Static credentials passed in by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExplicitCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Server-side encryption to apply to uploads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionConfig {
    /// No server-side encryption.
    #[default]
    None,
    /// SSE-S3 (AES-256 with S3-managed keys).
    Managed,
    /// SSE-KMS with the given key id.
    KmsKey(String),
    /// SSE-C with a base64-encoded key read fresh from this file per transfer.
    CustomerKeyFile(PathBuf),
}

/// Bounded retry with exponential backoff for transient failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
    /// Per-attempt timeout applied to every remote call.
    pub timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            timeout_secs: 120,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retrying after `attempt` (0-based) failed.
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        std::time::Duration::from_millis(exp.min(self.max_delay_ms))
    }
}

/// Settings for individual uploads and downloads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Objects at or above this size are uploaded via the multipart API.
    pub part_size_threshold: u64,

    /// Target size of each multipart part. Grows automatically when an
    /// object would otherwise exceed the part-count limit.
    pub part_size: u64,

    /// Hard ceiling on the effective part size.
    pub max_part_size: u64,

    /// Concurrent part uploads within one multipart session.
    pub max_concurrent_parts: usize,

    /// Concurrent per-file transfers within a tree sync or sweep.
    pub max_concurrent_transfers: usize,

    /// S3 storage class (e.g. "STANDARD_IA"). None leaves the bucket default.
    pub storage_class: Option<String>,

    /// Cache-Control header stored with uploaded objects.
    pub cache_control: Option<String>,

    /// Content-Type stored with uploaded objects.
    pub content_type: Option<String>,

    /// Server-side encryption parameters.
    pub encryption: EncryptionConfig,

    /// Re-hash downloaded content and compare against the remote hash tag.
    pub verify_integrity: bool,

    /// Abort a bulk operation on the first per-key failure instead of
    /// collecting failures and continuing.
    pub fail_fast: bool,

    /// Retry policy for every remote call made by the transfer.
    pub retry: RetryPolicy,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            part_size_threshold: 16 * 1024 * 1024,
            part_size: 8 * 1024 * 1024,
            max_part_size: MAX_PART_SIZE,
            max_concurrent_parts: 4,
            max_concurrent_transfers: 8,
            storage_class: None,
            cache_control: None,
            content_type: None,
            encryption: EncryptionConfig::None,
            verify_integrity: false,
            fail_fast: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransferSettings {
    /// Fails fast with `SyncError::Config` before any network call is made.
    pub fn validate(&self) -> SyncResult<()> {
        if self.part_size < MIN_PART_SIZE {
            return Err(SyncError::Config(format!(
                "part size {} below the {} byte minimum",
                self.part_size, MIN_PART_SIZE
            )));
        }
        if self.part_size > self.max_part_size || self.max_part_size > MAX_PART_SIZE {
            return Err(SyncError::Config(format!(
                "part size {} exceeds the configured maximum {}",
                self.part_size, self.max_part_size
            )));
        }
        if self.max_concurrent_parts == 0 || self.max_concurrent_transfers == 0 {
            return Err(SyncError::Config(
                "concurrency bounds must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for a whole-tree or single-file sync.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Key prefix prepended to every local key (and expected on every
    /// remote key) for this sync. Empty means the bucket root.
    pub prefix: String,

    /// Transfer settings applied to every action the plan executes.
    pub transfer: TransferSettings,
}

impl SyncSettings {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }
}

/// Selects which objects a deletion sweep removes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeletionCriteria {
    /// Only objects whose key starts with this prefix are considered.
    pub prefix: String,

    /// Exclusive upper bound: only objects strictly older are deleted.
    /// `None` makes every object under the prefix eligible.
    pub cutoff: Option<DateTime<Utc>>,
}

impl DeletionCriteria {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            cutoff: None,
        }
    }

    pub fn older_than(prefix: impl Into<String>, cutoff: DateTime<Utc>) -> Self {
        Self {
            prefix: prefix.into(),
            cutoff: Some(cutoff),
        }
    }
}
