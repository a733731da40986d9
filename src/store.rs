//! Object-store collaborator contract.
//!
//! Request/response semantics only — wire-level signing and serialization
//! belong to the implementation behind this trait. The S3 implementation
//! lives in `s3_store`; tests substitute an in-memory store.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::config::{EncryptionConfig, TransferSettings};
use crate::error::SyncResult;
use crate::keys;
use crate::types::{ObjectMetadata, RemoteEntry};

/// One page of a remote listing.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    /// Opaque continuation token; `None` means the listing is complete.
    pub next_token: Option<String>,
}

/// ETag of one uploaded part, referenced at completion time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartEtag {
    /// 1-based, contiguous part number.
    pub part_number: i32,
    pub etag: String,
}

/// A lazily readable object body plus its metadata.
pub struct ObjectBody {
    pub metadata: ObjectMetadata,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

/// Server-side encryption parameters resolved for one transfer.
///
/// Customer key material is read fresh from its file per transfer and lives
/// only as long as the request options do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ResolvedEncryption {
    #[default]
    None,
    Managed,
    Kms(String),
    Customer {
        /// Base64-encoded key, as stored in the key file.
        key_b64: String,
        /// Base64-encoded MD5 of the raw key, required by SSE-C.
        key_md5_b64: String,
    },
}

/// Put-time parameters shared by single and multipart uploads.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub storage_class: Option<String>,
    pub cache_control: Option<String>,
    pub content_type: Option<String>,
    pub encryption: ResolvedEncryption,
    /// Content digest embedded as custom metadata for change detection.
    pub hash_tag: Option<String>,
}

impl PutOptions {
    /// Resolves transfer settings into concrete put parameters, reading the
    /// customer key file if one is configured.
    pub async fn from_settings(
        settings: &TransferSettings,
        hash_tag: Option<String>,
    ) -> SyncResult<Self> {
        let encryption = match &settings.encryption {
            EncryptionConfig::None => ResolvedEncryption::None,
            EncryptionConfig::Managed => ResolvedEncryption::Managed,
            EncryptionConfig::KmsKey(id) => ResolvedEncryption::Kms(id.clone()),
            EncryptionConfig::CustomerKeyFile(path) => {
                let loaded = keys::load_key(path).await?;
                ResolvedEncryption::Customer {
                    key_b64: loaded.key_b64,
                    key_md5_b64: loaded.key_md5_b64,
                }
            }
        };
        Ok(Self {
            storage_class: settings.storage_class.clone(),
            cache_control: settings.cache_control.clone(),
            content_type: settings.content_type.clone(),
            encryption,
            hash_tag,
        })
    }
}

/// Narrow interface to the remote object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists one page of entries under a key prefix.
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> SyncResult<ListPage>;

    /// Stores an object in a single request, returning its ETag.
    async fn put_object(&self, key: &str, body: Vec<u8>, opts: &PutOptions) -> SyncResult<String>;

    /// Opens a multipart session, returning its upload id.
    async fn initiate_multipart(&self, key: &str, opts: &PutOptions) -> SyncResult<String>;

    /// Uploads one part, returning the part's ETag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
        opts: &PutOptions,
    ) -> SyncResult<String>;

    /// Assembles the uploaded parts into one object. Part identifiers must
    /// be listed in strictly ascending part-number order.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartEtag],
    ) -> SyncResult<String>;

    /// Releases server-side storage reserved by an unfinished session.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> SyncResult<()>;

    /// Streams an object's content. `version` defaults to the latest.
    async fn get_object(&self, key: &str, version: Option<&str>) -> SyncResult<ObjectBody>;

    /// Fetches object metadata without the body.
    async fn get_object_metadata(
        &self,
        key: &str,
        version: Option<&str>,
    ) -> SyncResult<ObjectMetadata>;

    /// Deletes an object. Deleting a key that no longer exists succeeds.
    async fn delete_object(&self, key: &str, version: Option<&str>) -> SyncResult<()>;

    /// Issues a pre-signed GET URL valid for `expires_in`. No network call.
    async fn presign_get(
        &self,
        key: &str,
        version: Option<&str>,
        expires_in: Duration,
    ) -> SyncResult<String>;
}

/// Collects the full remote inventory under a prefix, following the
/// continuation-token protocol transparently.
///
/// An empty prefix legitimately yields an empty inventory; only a missing
/// or unreachable bucket is an error.
pub async fn list_all(store: &dyn ObjectStore, prefix: &str) -> SyncResult<Vec<RemoteEntry>> {
    let mut entries = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = store.list_page(prefix, token.as_deref()).await?;
        entries.extend(page.entries);
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(entries)
}
