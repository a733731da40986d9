//! Shared data model for inventories, plans, and operation results.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::hash::HASH_TAG_KEY;

/// A file found by the local inventory scanner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalEntry {
    /// Path relative to the sync root, slash-normalized, with the sync
    /// prefix applied.
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Absolute location to read the bytes from.
    pub path: PathBuf,
}

/// An object found by the remote inventory lister.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub key: String,
    pub version_id: Option<String>,
    pub etag: String,
    /// Last-known content digest stored as custom metadata at upload time.
    /// Absent on objects uploaded by other tools.
    pub hash_tag: Option<String>,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Direction of a sync: push local changes up, or pull remote changes down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    Push,
    Pull,
}

/// What the diff engine decided for one key.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncAction {
    Upload(LocalEntry),
    Download(RemoteEntry),
    Skip(String),
}

impl SyncAction {
    pub fn key(&self) -> &str {
        match self {
            SyncAction::Upload(local) => &local.key,
            SyncAction::Download(remote) => &remote.key,
            SyncAction::Skip(key) => key,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, SyncAction::Skip(_))
    }
}

/// Ordered set of actions covering the key union of both inventories
/// exactly once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
}

impl SyncPlan {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Keys the plan would actually transfer.
    pub fn pending_keys(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|a| !a.is_skip())
            .map(SyncAction::key)
            .collect()
    }
}

/// A per-key failure inside a bulk operation.
#[derive(Debug)]
pub struct KeyFailure {
    pub key: String,
    pub error: SyncError,
}

/// Outcome of a tree sync: keys that changed, keys that failed.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Keys that were uploaded or downloaded (and may need cache
    /// invalidation downstream).
    pub changed: Vec<String>,
    pub failed: Vec<KeyFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of a deletion sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Exactly the keys that were removed.
    pub deleted: Vec<String>,
    pub failed: Vec<KeyFailure>,
}

/// Metadata held by the object store for one object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    /// Custom (x-amz-meta-*) entries, including the hash tag.
    pub custom: HashMap<String, String>,
}

impl ObjectMetadata {
    pub fn hash_tag(&self) -> Option<&str> {
        self.custom.get(HASH_TAG_KEY).map(String::as_str)
    }
}
