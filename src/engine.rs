//! Sync engine facade.
//!
//! `SyncClient` composes the transfer executor, deletion sweeper, and URL
//! signer over one shared object store. Construction is explicit: the store
//! collaborator is a constructor argument and every operation is a function
//! of its explicit inputs — no ambient context, no hidden global state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::config::{BucketConfig, DeletionCriteria, SyncSettings, TransferSettings};
use crate::diff;
use crate::error::{SyncError, SyncResult};
use crate::hash;
use crate::keys;
use crate::local;
use crate::retry::retry;
use crate::s3_store::S3ObjectStore;
use crate::signer::UrlSigner;
use crate::store::{self, ObjectBody, ObjectStore};
use crate::sweeper::DeletionSweeper;
use crate::transfer::TransferExecutor;
use crate::types::{
    KeyFailure, LocalEntry, ObjectMetadata, RemoteEntry, SyncAction, SyncDirection, SyncPlan,
    SyncReport,
};

/// Joins the sync prefix onto a root-relative key.
fn full_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), key)
    }
}

/// Maps a remote key back to a path under the local sync root.
fn dest_path(root: &Path, key: &str, prefix: &str) -> PathBuf {
    let relative = if prefix.is_empty() {
        key
    } else {
        key.strip_prefix(prefix.trim_end_matches('/'))
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(key)
    };
    let mut path = root.to_path_buf();
    for component in relative.split('/').filter(|c| !c.is_empty()) {
        path.push(component);
    }
    path
}

fn remote_from_metadata(key: String, meta: &ObjectMetadata) -> RemoteEntry {
    RemoteEntry {
        key,
        version_id: meta.version_id.clone(),
        etag: meta.etag.clone().unwrap_or_default(),
        hash_tag: meta.hash_tag().map(String::from),
        size: meta.size,
        last_modified: meta.last_modified.unwrap_or(DateTime::UNIX_EPOCH),
    }
}

/// Client for synchronizing a local tree with an object-store bucket.
pub struct SyncClient {
    store: Arc<dyn ObjectStore>,
    transfers: TransferExecutor,
}

impl SyncClient {
    /// Builds a client over an explicit store collaborator.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let transfers = TransferExecutor::new(store.clone());
        Self { store, transfers }
    }

    /// Builds a client backed by S3 for the configured bucket.
    pub async fn connect(config: &BucketConfig) -> SyncResult<Self> {
        let store = S3ObjectStore::connect(config).await?;
        Ok(Self::new(Arc::new(store)))
    }

    // ---- tree sync ----

    /// Syncs a local directory up to the bucket. Returns the keys that were
    /// uploaded (and may need downstream cache invalidation) alongside any
    /// per-key failures.
    pub async fn sync_upload_dir(
        &self,
        root: &Path,
        settings: &SyncSettings,
    ) -> SyncResult<SyncReport> {
        let plan = self.build_plan(root, settings, SyncDirection::Push).await?;
        info!(
            "upload sync of {} plans {} transfers across {} keys",
            root.display(),
            plan.pending_keys().len(),
            plan.len()
        );
        self.execute_plan(plan, root, settings).await
    }

    /// Syncs the bucket down into a local directory.
    pub async fn sync_download_dir(
        &self,
        root: &Path,
        settings: &SyncSettings,
    ) -> SyncResult<SyncReport> {
        let plan = self.build_plan(root, settings, SyncDirection::Pull).await?;
        info!(
            "download sync into {} plans {} transfers across {} keys",
            root.display(),
            plan.pending_keys().len(),
            plan.len()
        );
        self.execute_plan(plan, root, settings).await
    }

    /// Syncs a single local file up, returning its key when it was
    /// uploaded and `None` when the remote copy is already current.
    pub async fn sync_upload_file(
        &self,
        path: &Path,
        settings: &SyncSettings,
    ) -> SyncResult<Option<String>> {
        let (local, remote) = self.stat_pair(path, settings).await?;
        let local = local.ok_or_else(|| {
            SyncError::NotFound(format!("local path {}", path.display()))
        })?;
        let fresh_hash = self.tiebreak_hash(&local, remote.as_ref()).await?;

        match diff::classify_pair(
            Some(&local),
            remote.as_ref(),
            fresh_hash.as_deref(),
            SyncDirection::Push,
        ) {
            SyncAction::Upload(entry) => {
                self.transfers
                    .upload_file(&entry.path, &entry.key, &settings.transfer)
                    .await?;
                Ok(Some(entry.key))
            }
            _ => Ok(None),
        }
    }

    /// Syncs a single file down from the bucket, returning its key when it
    /// was downloaded and `None` when the local copy is already current.
    pub async fn sync_download_file(
        &self,
        path: &Path,
        settings: &SyncSettings,
    ) -> SyncResult<Option<String>> {
        let (local, remote) = self.stat_pair(path, settings).await?;
        let Some(remote) = remote else {
            return match local {
                // Nothing remote to pull; the local file is the only copy.
                Some(_) => Ok(None),
                None => Err(SyncError::NotFound(format!(
                    "no local or remote entry for {}",
                    path.display()
                ))),
            };
        };
        let fresh_hash = match &local {
            Some(local) => self.tiebreak_hash(local, Some(&remote)).await?,
            None => None,
        };

        match diff::classify_pair(
            local.as_ref(),
            Some(&remote),
            fresh_hash.as_deref(),
            SyncDirection::Pull,
        ) {
            SyncAction::Download(entry) => {
                self.transfers
                    .download_to_file(
                        &entry.key,
                        entry.version_id.as_deref(),
                        path,
                        &settings.transfer,
                    )
                    .await?;
                Ok(Some(entry.key))
            }
            _ => Ok(None),
        }
    }

    /// Stats the local file and its remote counterpart for single-file sync.
    async fn stat_pair(
        &self,
        path: &Path,
        settings: &SyncSettings,
    ) -> SyncResult<(Option<LocalEntry>, Option<RemoteEntry>)> {
        let name = path
            .file_name()
            .ok_or_else(|| {
                SyncError::Config(format!("{} has no file name to sync by", path.display()))
            })?
            .to_string_lossy()
            .into_owned();
        let key = full_key(&settings.prefix, &name);

        let local = match local::stat_entry(path, key.clone()).await {
            Ok(entry) => Some(entry),
            Err(SyncError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let remote = match self.store.get_object_metadata(&key, None).await {
            Ok(meta) => Some(remote_from_metadata(key, &meta)),
            Err(SyncError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok((local, remote))
    }

    /// Hashes the local file only when the pair's timestamps tie and the
    /// remote entry carries a hash tag to compare against.
    async fn tiebreak_hash(
        &self,
        local: &LocalEntry,
        remote: Option<&RemoteEntry>,
    ) -> SyncResult<Option<String>> {
        match remote {
            Some(remote)
                if remote.last_modified == local.last_modified && remote.hash_tag.is_some() =>
            {
                Ok(Some(hash::hash_file(&local.path).await?))
            }
            _ => Ok(None),
        }
    }

    /// Builds fresh inventories for both sides and diffs them. Inventories
    /// are never cached across invocations.
    async fn build_plan(
        &self,
        root: &Path,
        settings: &SyncSettings,
        direction: SyncDirection,
    ) -> SyncResult<SyncPlan> {
        let locals = match local::scan(root) {
            Ok(walk) => {
                let mut entries = Vec::new();
                for item in walk {
                    let mut entry = item?;
                    entry.key = full_key(&settings.prefix, &entry.key);
                    entries.push(entry);
                }
                entries
            }
            // A pull may target a directory that does not exist yet.
            Err(SyncError::NotFound(_)) if direction == SyncDirection::Pull => Vec::new(),
            Err(e) => return Err(e),
        };

        let remotes = store::list_all(self.store.as_ref(), &settings.prefix).await?;
        diff::plan_tree(locals, remotes, direction).await
    }

    async fn execute_plan(
        &self,
        plan: SyncPlan,
        root: &Path,
        settings: &SyncSettings,
    ) -> SyncResult<SyncReport> {
        let transfer = &settings.transfer;
        transfer.validate()?;
        let pending: Vec<SyncAction> =
            plan.actions.into_iter().filter(|a| !a.is_skip()).collect();

        let mut report = SyncReport::default();
        if transfer.fail_fast {
            for action in pending {
                let key = action.key().to_string();
                self.run_action(action, root, settings).await?;
                report.changed.push(key);
            }
        } else {
            let results = stream::iter(pending)
                .map(|action| {
                    let key = action.key().to_string();
                    async move {
                        let outcome = self.run_action(action, root, settings).await;
                        (key, outcome)
                    }
                })
                .buffer_unordered(transfer.max_concurrent_transfers)
                .collect::<Vec<_>>()
                .await;
            for (key, outcome) in results {
                match outcome {
                    Ok(()) => report.changed.push(key),
                    Err(error) => report.failed.push(KeyFailure { key, error }),
                }
            }
        }

        report.changed.sort_unstable();
        debug!(
            "sync changed {} keys, {} failed",
            report.changed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn run_action(
        &self,
        action: SyncAction,
        root: &Path,
        settings: &SyncSettings,
    ) -> SyncResult<()> {
        match action {
            SyncAction::Upload(entry) => {
                self.transfers
                    .upload_file(&entry.path, &entry.key, &settings.transfer)
                    .await?;
            }
            SyncAction::Download(entry) => {
                let dest = dest_path(root, &entry.key, &settings.prefix);
                self.transfers
                    .download_to_file(
                        &entry.key,
                        entry.version_id.as_deref(),
                        &dest,
                        &settings.transfer,
                    )
                    .await?;
            }
            SyncAction::Skip(_) => {}
        }
        Ok(())
    }

    // ---- single-object transfer ----

    /// Uploads a file under an explicit key.
    pub async fn upload(
        &self,
        path: &Path,
        key: &str,
        settings: &TransferSettings,
    ) -> SyncResult<String> {
        self.transfers.upload_file(path, key, settings).await
    }

    /// Uploads an in-memory buffer under an explicit key.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        settings: &TransferSettings,
    ) -> SyncResult<String> {
        self.transfers.upload_bytes(data, key, settings).await
    }

    /// Uploads everything a reader yields under an explicit key.
    pub async fn upload_reader<R: AsyncRead + Send + Unpin>(
        &self,
        reader: R,
        key: &str,
        settings: &TransferSettings,
    ) -> SyncResult<String> {
        self.transfers.upload_reader(reader, key, settings).await
    }

    /// Downloads an object to a local file.
    pub async fn download(
        &self,
        path: &Path,
        key: &str,
        version: Option<&str>,
        settings: &TransferSettings,
    ) -> SyncResult<ObjectMetadata> {
        self.transfers
            .download_to_file(key, version, path, settings)
            .await
    }

    /// Opens an object as a lazy byte stream.
    pub async fn open(
        &self,
        key: &str,
        version: Option<&str>,
        settings: &TransferSettings,
    ) -> SyncResult<ObjectBody> {
        self.transfers.open(key, version, settings).await
    }

    /// Fetches an object fully into memory.
    pub async fn get_bytes(
        &self,
        key: &str,
        version: Option<&str>,
        settings: &TransferSettings,
    ) -> SyncResult<Vec<u8>> {
        self.transfers.get_bytes(key, version, settings).await
    }

    /// Fetches an object as UTF-8 text.
    pub async fn get_string(
        &self,
        key: &str,
        version: Option<&str>,
        settings: &TransferSettings,
    ) -> SyncResult<String> {
        self.transfers.get_string(key, version, settings).await
    }

    // ---- deletion ----

    /// Deletes a single object. Deleting a key that no longer exists is
    /// not an error.
    pub async fn delete(
        &self,
        key: &str,
        version: Option<&str>,
        settings: &TransferSettings,
    ) -> SyncResult<()> {
        retry(&settings.retry, "delete", key, || {
            self.store.delete_object(key, version)
        })
        .await
    }

    /// Sweeps every object matching the criteria, returning exactly the
    /// deleted keys.
    pub async fn delete_all(
        &self,
        criteria: &DeletionCriteria,
        settings: &TransferSettings,
    ) -> SyncResult<crate::types::SweepReport> {
        DeletionSweeper::with_retry(self.store.clone(), settings.retry.clone())
            .delete_all(criteria)
            .await
    }

    // ---- metadata queries ----

    /// Lists the remote inventory under a prefix.
    pub async fn get_objects(&self, prefix: &str) -> SyncResult<Vec<RemoteEntry>> {
        store::list_all(self.store.as_ref(), prefix).await
    }

    /// Fetches one object's metadata.
    pub async fn get_object_metadata(
        &self,
        key: &str,
        version: Option<&str>,
    ) -> SyncResult<ObjectMetadata> {
        self.store.get_object_metadata(key, version).await
    }

    /// Last-modified timestamp of an object.
    pub async fn last_modified(
        &self,
        key: &str,
        version: Option<&str>,
    ) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(self.get_object_metadata(key, version).await?.last_modified)
    }

    /// ETag of an object.
    pub async fn etag(&self, key: &str, version: Option<&str>) -> SyncResult<Option<String>> {
        Ok(self.get_object_metadata(key, version).await?.etag)
    }

    /// Content-hash tag of an object, if one was written at upload time.
    pub async fn hash_tag(&self, key: &str, version: Option<&str>) -> SyncResult<Option<String>> {
        Ok(self
            .get_object_metadata(key, version)
            .await?
            .hash_tag()
            .map(String::from))
    }

    /// Hash of a local file's content.
    pub async fn file_hash(&self, path: &Path) -> SyncResult<String> {
        hash::hash_file(path).await
    }

    // ---- keys & URLs ----

    /// Generates symmetric key material and persists it at `location`.
    pub async fn generate_encryption_key(&self, location: &Path, bits: u32) -> SyncResult<()> {
        keys::generate_key(location, bits).await
    }

    /// Issues a pre-signed URL valid until `expires_at`.
    pub async fn presigned_url(
        &self,
        key: &str,
        version: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<String> {
        UrlSigner::new(self.store.clone())
            .presigned_url(key, version, expires_at)
            .await
    }
}
