//! Shared test support: an in-memory object store standing in for S3.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use objsync::config::MIN_PART_SIZE;
use objsync::hash::{hash_bytes, HASH_TAG_KEY};
use objsync::store::{ListPage, ObjectBody, ObjectStore, PartEtag, PutOptions};
use objsync::types::{ObjectMetadata, RemoteEntry};
use objsync::{SyncError, SyncResult};

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub custom: HashMap<String, String>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

#[derive(Default)]
struct Session {
    key: String,
    custom: HashMap<String, String>,
    parts: BTreeMap<i32, (String, Vec<u8>)>,
}

/// In-memory double for the object store, with failure injection and
/// paginated listings.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    sessions: Mutex<HashMap<String, Session>>,
    /// Upload ids of aborted sessions, in abort order.
    pub aborted: Mutex<Vec<String>>,
    next_upload_id: AtomicUsize,
    /// Part numbers whose upload fails with a fatal error.
    pub fail_parts: Mutex<HashSet<i32>>,
    /// Keys whose deletion fails with a fatal error.
    pub fail_deletes: Mutex<HashSet<String>>,
    /// Keys whose single-request put fails with a fatal error.
    pub fail_puts: Mutex<HashSet<String>>,
    /// Listing page size; 0 means everything in one page.
    pub page_size: usize,
    pub presign_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_page_size(page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            page_size,
            ..Self::default()
        })
    }

    /// Seeds an object directly, bypassing the transfer path.
    pub fn seed(
        &self,
        key: &str,
        data: &[u8],
        last_modified: DateTime<Utc>,
        hash_tag: Option<&str>,
    ) {
        let mut custom = HashMap::new();
        if let Some(tag) = hash_tag {
            custom.insert(HASH_TAG_KEY.to_string(), tag.to_string());
        }
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                etag: hash_bytes(data),
                last_modified,
                custom,
                content_type: None,
                cache_control: None,
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn presign_call_count(&self) -> usize {
        self.presign_calls.load(Ordering::SeqCst)
    }

    fn metadata_of(obj: &StoredObject) -> ObjectMetadata {
        ObjectMetadata {
            etag: Some(obj.etag.clone()),
            version_id: None,
            size: obj.data.len() as u64,
            last_modified: Some(obj.last_modified),
            content_type: obj.content_type.clone(),
            cache_control: obj.cache_control.clone(),
            custom: obj.custom.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> SyncResult<ListPage> {
        let objects = self.objects.lock().unwrap();
        let matching: Vec<RemoteEntry> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| RemoteEntry {
                key: key.clone(),
                version_id: None,
                etag: obj.etag.clone(),
                // Listings carry no custom metadata, mirroring S3.
                hash_tag: None,
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
            })
            .collect();

        if self.page_size == 0 {
            return Ok(ListPage {
                entries: matching,
                next_token: None,
            });
        }

        let start: usize = continuation.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (start + self.page_size).min(matching.len());
        let next_token = (end < matching.len()).then(|| end.to_string());
        Ok(ListPage {
            entries: matching[start..end].to_vec(),
            next_token,
        })
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, opts: &PutOptions) -> SyncResult<String> {
        if self.fail_puts.lock().unwrap().contains(key) {
            return Err(SyncError::Store(format!("injected put failure for {key}")));
        }
        let mut custom = HashMap::new();
        if let Some(tag) = &opts.hash_tag {
            custom.insert(HASH_TAG_KEY.to_string(), tag.clone());
        }
        let etag = hash_bytes(&body);
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: body,
                etag: etag.clone(),
                last_modified: Utc::now(),
                custom,
                content_type: opts.content_type.clone(),
                cache_control: opts.cache_control.clone(),
            },
        );
        Ok(etag)
    }

    async fn initiate_multipart(&self, key: &str, opts: &PutOptions) -> SyncResult<String> {
        let id = self.next_upload_id.fetch_add(1, Ordering::SeqCst);
        let upload_id = format!("upload-{id}");
        let mut custom = HashMap::new();
        if let Some(tag) = &opts.hash_tag {
            custom.insert(HASH_TAG_KEY.to_string(), tag.clone());
        }
        self.sessions.lock().unwrap().insert(
            upload_id.clone(),
            Session {
                key: key.to_string(),
                custom,
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
        _opts: &PutOptions,
    ) -> SyncResult<String> {
        if self.fail_parts.lock().unwrap().contains(&part_number) {
            return Err(SyncError::Store(format!(
                "injected failure for part {part_number} of {key}"
            )));
        }
        let etag = hash_bytes(&body);
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| SyncError::NotFound(format!("upload {upload_id}")))?;
        session.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartEtag],
    ) -> SyncResult<String> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| SyncError::NotFound(format!("upload {upload_id}")))?;

        // Enforce the completion contract: contiguous part numbers from 1,
        // listed in strictly ascending order, matching the uploaded etags.
        let mut data = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            if part.part_number != i as i32 + 1 {
                return Err(SyncError::Store(format!(
                    "part list for {key} not contiguous ascending at index {i}"
                )));
            }
            let (etag, body) = session.parts.get(&part.part_number).ok_or_else(|| {
                SyncError::Store(format!("part {} of {key} never uploaded", part.part_number))
            })?;
            if *etag != part.etag {
                return Err(SyncError::Store(format!(
                    "etag mismatch for part {} of {key}",
                    part.part_number
                )));
            }
            if i + 1 < parts.len() && (body.len() as u64) < MIN_PART_SIZE {
                return Err(SyncError::Store(format!(
                    "non-final part {} of {key} below minimum size",
                    part.part_number
                )));
            }
            data.extend_from_slice(body);
        }

        let etag = hash_bytes(&data);
        self.objects.lock().unwrap().insert(
            session.key,
            StoredObject {
                data,
                etag: etag.clone(),
                last_modified: Utc::now(),
                custom: session.custom,
                content_type: None,
                cache_control: None,
            },
        );
        Ok(etag)
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> SyncResult<()> {
        self.sessions.lock().unwrap().remove(upload_id);
        self.aborted.lock().unwrap().push(upload_id.to_string());
        Ok(())
    }

    async fn get_object(&self, key: &str, version: Option<&str>) -> SyncResult<ObjectBody> {
        if version.is_some() {
            return Err(SyncError::NotFound(format!("{key} (versioned)")));
        }
        let objects = self.objects.lock().unwrap();
        let obj = objects
            .get(key)
            .ok_or_else(|| SyncError::NotFound(key.to_string()))?;
        Ok(ObjectBody {
            metadata: Self::metadata_of(obj),
            reader: Box::new(Cursor::new(obj.data.clone())),
        })
    }

    async fn get_object_metadata(
        &self,
        key: &str,
        version: Option<&str>,
    ) -> SyncResult<ObjectMetadata> {
        if version.is_some() {
            return Err(SyncError::NotFound(format!("{key} (versioned)")));
        }
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)
            .map(Self::metadata_of)
            .ok_or_else(|| SyncError::NotFound(key.to_string()))
    }

    async fn delete_object(&self, key: &str, _version: Option<&str>) -> SyncResult<()> {
        if self.fail_deletes.lock().unwrap().contains(key) {
            return Err(SyncError::Store(format!("injected delete failure for {key}")));
        }
        // Deleting a missing key succeeds, as it does on S3.
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn presign_get(
        &self,
        key: &str,
        _version: Option<&str>,
        expires_in: Duration,
    ) -> SyncResult<String> {
        self.presign_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "https://bucket.example/{key}?X-Expires={}",
            expires_in.as_secs()
        ))
    }
}

/// Transfer settings sized so a few-MiB payload exercises multipart.
pub fn multipart_settings() -> objsync::TransferSettings {
    objsync::TransferSettings {
        part_size_threshold: MIN_PART_SIZE,
        part_size: MIN_PART_SIZE,
        ..Default::default()
    }
}
