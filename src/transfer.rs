//! Transfer executor: uploads, downloads, and multipart sessions.
//!
//! Objects below the configured threshold go up in a single put with the
//! content hash embedded as metadata. Larger objects are split into
//! contiguous numbered parts uploaded with bounded concurrency and
//! reassembled server-side in ascending part order. A failed session is
//! always aborted before the error surfaces, so no reserved server-side
//! storage is orphaned — including when the calling future is cancelled.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{TransferSettings, MAX_PARTS};
use crate::error::{SyncError, SyncResult};
use crate::hash;
use crate::local;
use crate::retry::retry;
use crate::store::{ObjectBody, ObjectStore, PartEtag, PutOptions};
use crate::types::ObjectMetadata;

/// Lifecycle of a multipart session. `Completed` and `Aborted` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MultipartState {
    Initiated,
    PartsUploading,
    Completed,
    Aborting,
    Aborted,
}

/// Tracks an open multipart session and guarantees it is aborted if the
/// upload is dropped before reaching a terminal state.
struct MultipartGuard {
    store: Arc<dyn ObjectStore>,
    key: String,
    upload_id: String,
    state: MultipartState,
}

impl MultipartGuard {
    fn new(store: Arc<dyn ObjectStore>, key: &str, upload_id: String) -> Self {
        Self {
            store,
            key: key.to_string(),
            upload_id,
            state: MultipartState::Initiated,
        }
    }

    fn uploading(&mut self) {
        self.state = MultipartState::PartsUploading;
    }

    fn completed(&mut self) {
        self.state = MultipartState::Completed;
    }

    /// Releases the session's server-side storage. Best effort: an abort
    /// failure is logged, not surfaced, since the original error matters
    /// more to the caller.
    async fn abort(&mut self) {
        self.state = MultipartState::Aborting;
        if let Err(e) = self
            .store
            .abort_multipart(&self.key, &self.upload_id)
            .await
        {
            warn!(
                "failed to abort multipart upload {} for {}: {e}",
                self.upload_id, self.key
            );
        }
        self.state = MultipartState::Aborted;
    }
}

impl Drop for MultipartGuard {
    fn drop(&mut self) {
        if matches!(self.state, MultipartState::Completed | MultipartState::Aborted) {
            return;
        }
        // The upload future was cancelled mid-session; abort in the
        // background so the partial upload does not linger.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.store.clone();
            let key = std::mem::take(&mut self.key);
            let upload_id = std::mem::take(&mut self.upload_id);
            handle.spawn(async move {
                if let Err(e) = store.abort_multipart(&key, &upload_id).await {
                    warn!("failed to abort cancelled multipart upload {upload_id} for {key}: {e}");
                }
            });
        }
    }
}

/// Picks the effective part size for an object, growing it when the
/// configured size would exceed the part-count limit.
pub fn effective_part_size(total_size: u64, settings: &TransferSettings) -> SyncResult<u64> {
    let mut part_size = settings.part_size;
    if total_size.div_ceil(part_size) > MAX_PARTS {
        part_size = total_size.div_ceil(MAX_PARTS);
    }
    if part_size > settings.max_part_size {
        return Err(SyncError::Config(format!(
            "object of {total_size} bytes needs parts of {part_size} bytes, above the configured maximum {}",
            settings.max_part_size
        )));
    }
    Ok(part_size)
}

async fn read_up_to<R: AsyncRead + Unpin>(reader: &mut R, limit: usize) -> SyncResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit.min(1 << 20));
    let mut chunk = vec![0u8; 64 * 1024];
    while buf.len() < limit {
        let want = chunk.len().min(limit - buf.len());
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(buf)
}

/// Performs uploads and downloads against the object store.
#[derive(Clone)]
pub struct TransferExecutor {
    store: Arc<dyn ObjectStore>,
}

impl TransferExecutor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Uploads a local file, choosing single-request or multipart transfer
    /// by size. Returns the resulting ETag.
    pub async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        settings: &TransferSettings,
    ) -> SyncResult<String> {
        settings.validate()?;
        let meta = tokio::fs::metadata(path).await?;
        let size = meta.len();
        let digest = hash::hash_file(path).await?;
        let opts = PutOptions::from_settings(settings, Some(digest)).await?;

        if size == 0 || size < settings.part_size_threshold {
            let body = tokio::fs::read(path).await?;
            return self.put_with_retry(key, body, &opts, settings).await;
        }

        let part_size = effective_part_size(size, settings)?;
        let reader = local::open_read(path).await?;
        self.multipart_from_reader(reader, key, settings, opts, part_size)
            .await
    }

    /// Uploads an in-memory buffer under `key`.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        settings: &TransferSettings,
    ) -> SyncResult<String> {
        settings.validate()?;
        let size = data.len() as u64;
        let digest = hash::hash_bytes(&data);
        let opts = PutOptions::from_settings(settings, Some(digest)).await?;

        if size == 0 || size < settings.part_size_threshold {
            return self.put_with_retry(key, data, &opts, settings).await;
        }

        let part_size = effective_part_size(size, settings)?;
        self.multipart_from_reader(Cursor::new(data), key, settings, opts, part_size)
            .await
    }

    /// Uploads everything a reader yields. Content shorter than one part
    /// goes up in a single request (with its hash tag); anything longer
    /// streams through a multipart session without a hash tag, since the
    /// digest cannot be known before the session is initiated.
    pub async fn upload_reader<R: AsyncRead + Send + Unpin>(
        &self,
        mut reader: R,
        key: &str,
        settings: &TransferSettings,
    ) -> SyncResult<String> {
        settings.validate()?;
        let head = read_up_to(&mut reader, settings.part_size as usize).await?;

        if (head.len() as u64) < settings.part_size {
            let digest = hash::hash_bytes(&head);
            let opts = PutOptions::from_settings(settings, Some(digest)).await?;
            return self.put_with_retry(key, head, &opts, settings).await;
        }

        let opts = PutOptions::from_settings(settings, None).await?;
        let chained = Cursor::new(head).chain(reader);
        self.multipart_from_reader(chained, key, settings, opts, settings.part_size)
            .await
    }

    async fn put_with_retry(
        &self,
        key: &str,
        body: Vec<u8>,
        opts: &PutOptions,
        settings: &TransferSettings,
    ) -> SyncResult<String> {
        retry(&settings.retry, "put", key, || {
            let body = body.clone();
            async move { self.store.put_object(key, body, opts).await }
        })
        .await
    }

    /// Streams a reader through a multipart session: parts are numbered
    /// contiguously from 1, uploaded with bounded concurrency, and listed
    /// in ascending order at completion.
    async fn multipart_from_reader<R: AsyncRead + Unpin>(
        &self,
        mut reader: R,
        key: &str,
        settings: &TransferSettings,
        opts: PutOptions,
        part_size: u64,
    ) -> SyncResult<String> {
        let upload_id = retry(&settings.retry, "initiate multipart", key, || {
            self.store.initiate_multipart(key, &opts)
        })
        .await?;
        debug!("initiated multipart upload {upload_id} for {key}");

        let mut guard = MultipartGuard::new(self.store.clone(), key, upload_id.clone());
        guard.uploading();

        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_parts));
        let mut tasks: JoinSet<SyncResult<PartEtag>> = JoinSet::new();
        let opts = Arc::new(opts);
        let mut part_number: i32 = 0;

        loop {
            let buf = match read_up_to(&mut reader, part_size as usize).await {
                Ok(buf) => buf,
                Err(e) => {
                    tasks.abort_all();
                    guard.abort().await;
                    return Err(e);
                }
            };
            if buf.is_empty() {
                break;
            }
            let is_last = (buf.len() as u64) < part_size;
            part_number += 1;

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tasks.abort_all();
                    guard.abort().await;
                    return Err(SyncError::Store("part scheduler closed".to_string()));
                }
            };

            let store = self.store.clone();
            let key_owned = key.to_string();
            let upload_id = upload_id.clone();
            let opts = opts.clone();
            let policy = settings.retry.clone();
            let number = part_number;
            tasks.spawn(async move {
                let _permit = permit;
                let etag = retry(&policy, "upload part", &key_owned, || {
                    let body = buf.clone();
                    let store = store.clone();
                    let key = key_owned.clone();
                    let upload_id = upload_id.clone();
                    let opts = opts.clone();
                    async move {
                        store
                            .upload_part(&key, &upload_id, number, body, &opts)
                            .await
                    }
                })
                .await?;
                Ok(PartEtag {
                    part_number: number,
                    etag,
                })
            });

            if is_last {
                break;
            }
        }

        let total = part_number as usize;
        let mut parts: Vec<PartEtag> = Vec::with_capacity(total);
        let mut failed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(part)) => parts.push(part),
                Ok(Err(e)) => {
                    failed += 1;
                    warn!("part upload failed for {key}: {e}");
                }
                Err(e) => {
                    failed += 1;
                    warn!("part upload task for {key} did not finish: {e}");
                }
            }
        }

        if failed > 0 {
            guard.abort().await;
            return Err(SyncError::PartialMultipart {
                key: key.to_string(),
                failed,
                total,
            });
        }

        // Completion references parts strictly by ascending part number.
        parts.sort_by_key(|p| p.part_number);

        let completed = retry(&settings.retry, "complete multipart", key, || {
            self.store.complete_multipart(key, &upload_id, &parts)
        })
        .await;
        match completed {
            Ok(etag) => {
                guard.completed();
                debug!("multipart upload of {total} parts for {key} completed");
                Ok(etag)
            }
            Err(e) => {
                guard.abort().await;
                Err(e)
            }
        }
    }

    /// Streams an object's content straight to a local file without
    /// buffering the whole object. Returns the object's metadata.
    pub async fn download_to_file(
        &self,
        key: &str,
        version: Option<&str>,
        dest: &Path,
        settings: &TransferSettings,
    ) -> SyncResult<ObjectMetadata> {
        settings.validate()?;
        let body = retry(&settings.retry, "get", key, || {
            self.store.get_object(key, version)
        })
        .await?;

        let metadata = body.metadata;
        let mut reader = body.reader;
        let mut file = local::open_write(dest).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        local::finish_write(file).await?;

        if settings.verify_integrity {
            if let Some(expected) = metadata.hash_tag() {
                let actual = hash::hash_file(dest).await?;
                if actual != expected {
                    return Err(SyncError::Integrity {
                        key: key.to_string(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
        }

        debug!("downloaded {key} to {}", dest.display());
        Ok(metadata)
    }

    /// Opens an object as a lazy byte stream plus its metadata.
    pub async fn open(
        &self,
        key: &str,
        version: Option<&str>,
        settings: &TransferSettings,
    ) -> SyncResult<ObjectBody> {
        settings.validate()?;
        retry(&settings.retry, "get", key, || {
            self.store.get_object(key, version)
        })
        .await
    }

    /// Fetches an object fully into memory.
    pub async fn get_bytes(
        &self,
        key: &str,
        version: Option<&str>,
        settings: &TransferSettings,
    ) -> SyncResult<Vec<u8>> {
        let body = self.open(key, version, settings).await?;
        let mut reader = body.reader;
        let mut bytes = Vec::with_capacity(body.metadata.size as usize);
        reader.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }

    /// Fetches an object and decodes it as UTF-8 text.
    pub async fn get_string(
        &self,
        key: &str,
        version: Option<&str>,
        settings: &TransferSettings,
    ) -> SyncResult<String> {
        let bytes = self.get_bytes(key, version, settings).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
