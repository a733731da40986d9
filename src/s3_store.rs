//! S3 implementation of the object-store contract.
//!
//! Clients are built from explicit credentials or the ambient provider
//! chain; an endpoint override with forced path style supports MinIO.
//! SDK failures are classified into the engine's error taxonomy so the
//! retry layer never inspects SDK types.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as SmithyDateTime};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ServerSideEncryption, StorageClass};
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::BucketConfig;
use crate::error::{SyncError, SyncResult};
use crate::hash::HASH_TAG_KEY;
use crate::store::{ListPage, ObjectBody, ObjectStore, PartEtag, PutOptions, ResolvedEncryption};
use crate::types::{ObjectMetadata, RemoteEntry};

const SSE_CUSTOMER_ALGORITHM: &str = "AES256";

/// S3-backed object store.
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Builds an S3 client for the configured bucket.
    pub async fn connect(config: &BucketConfig) -> SyncResult<Self> {
        let region = aws_types::region::Region::new(config.region.clone());

        let mut builder = match &config.credentials {
            Some(creds) => {
                let credentials = aws_credential_types::Credentials::new(
                    &creds.access_key_id,
                    &creds.secret_access_key,
                    creds.session_token.clone(),
                    None,
                    "objsync",
                );
                aws_sdk_s3::Config::builder()
                    .region(region)
                    .credentials_provider(credentials)
                    .behavior_version_latest()
            }
            None => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        if let Some(endpoint) = &config.endpoint_override {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: S3Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Maps an SDK failure onto the engine taxonomy.
fn classify<E, R>(what: &str, key: &str, err: SdkError<E, R>) -> SyncError
where
    E: ProvideErrorMetadata,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            SyncError::Transient(format!("{what} for {key}: {err}"))
        }
        SdkError::ServiceError(ctx) => {
            let code = ctx.err().code().unwrap_or("");
            let message = ctx.err().message().unwrap_or("service error");
            match code {
                "NoSuchKey" | "NoSuchBucket" | "NoSuchUpload" | "NoSuchVersion" | "NotFound" => {
                    SyncError::NotFound(format!("{key}: {code}"))
                }
                "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"
                | "ExpiredToken" | "TokenRefreshRequired" => {
                    SyncError::Authorization(format!("{what} for {key}: {code}: {message}"))
                }
                "SlowDown" | "RequestTimeout" | "ThrottlingException" | "InternalError"
                | "ServiceUnavailable" => {
                    SyncError::Transient(format!("{what} for {key}: {code}: {message}"))
                }
                _ => SyncError::Store(format!("{what} for {key}: {err}")),
            }
        }
        _ => SyncError::Store(format!("{what} for {key}: {err}")),
    }
}

fn smithy_to_utc(dt: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> SyncResult<ListPage> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation.map(String::from))
            .send()
            .await
            .map_err(|e| classify("list", prefix, e))?;

        let entries = resp
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_string();
                Some(RemoteEntry {
                    key,
                    version_id: None,
                    etag: obj.e_tag().unwrap_or_default().to_string(),
                    // Listings carry no custom metadata; the diff engine
                    // falls back to timestamps.
                    hash_tag: None,
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .and_then(smithy_to_utc)
                        .unwrap_or(DateTime::UNIX_EPOCH),
                })
            })
            .collect();

        Ok(ListPage {
            entries,
            next_token: resp.next_continuation_token().map(String::from),
        })
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, opts: &PutOptions) -> SyncResult<String> {
        let size = body.len();
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_cache_control(opts.cache_control.clone())
            .set_content_type(opts.content_type.clone());
        if let Some(class) = &opts.storage_class {
            req = req.storage_class(StorageClass::from(class.as_str()));
        }
        if let Some(tag) = &opts.hash_tag {
            req = req.metadata(HASH_TAG_KEY, tag);
        }
        req = match &opts.encryption {
            ResolvedEncryption::None => req,
            ResolvedEncryption::Managed => {
                req.server_side_encryption(ServerSideEncryption::Aes256)
            }
            ResolvedEncryption::Kms(id) => req
                .server_side_encryption(ServerSideEncryption::AwsKms)
                .ssekms_key_id(id),
            ResolvedEncryption::Customer { key_b64, key_md5_b64 } => req
                .sse_customer_algorithm(SSE_CUSTOMER_ALGORITHM)
                .sse_customer_key(key_b64)
                .sse_customer_key_md5(key_md5_b64),
        };

        let resp = req.send().await.map_err(|e| classify("put", key, e))?;
        debug!("put {size} bytes to s3://{}/{key}", self.bucket);
        Ok(resp.e_tag().unwrap_or_default().to_string())
    }

    async fn initiate_multipart(&self, key: &str, opts: &PutOptions) -> SyncResult<String> {
        let mut req = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_cache_control(opts.cache_control.clone())
            .set_content_type(opts.content_type.clone());
        if let Some(class) = &opts.storage_class {
            req = req.storage_class(StorageClass::from(class.as_str()));
        }
        if let Some(tag) = &opts.hash_tag {
            req = req.metadata(HASH_TAG_KEY, tag);
        }
        req = match &opts.encryption {
            ResolvedEncryption::None => req,
            ResolvedEncryption::Managed => {
                req.server_side_encryption(ServerSideEncryption::Aes256)
            }
            ResolvedEncryption::Kms(id) => req
                .server_side_encryption(ServerSideEncryption::AwsKms)
                .ssekms_key_id(id),
            ResolvedEncryption::Customer { key_b64, key_md5_b64 } => req
                .sse_customer_algorithm(SSE_CUSTOMER_ALGORITHM)
                .sse_customer_key(key_b64)
                .sse_customer_key_md5(key_md5_b64),
        };

        let resp = req
            .send()
            .await
            .map_err(|e| classify("initiate multipart", key, e))?;
        resp.upload_id()
            .map(String::from)
            .ok_or_else(|| SyncError::Store(format!("no upload id returned for {key}")))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
        opts: &PutOptions,
    ) -> SyncResult<String> {
        let mut req = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body));
        // SSE-C parameters must accompany every part.
        if let ResolvedEncryption::Customer { key_b64, key_md5_b64 } = &opts.encryption {
            req = req
                .sse_customer_algorithm(SSE_CUSTOMER_ALGORITHM)
                .sse_customer_key(key_b64)
                .sse_customer_key_md5(key_md5_b64);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| classify("upload part", key, e))?;
        Ok(resp.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartEtag],
    ) -> SyncResult<String> {
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify("complete multipart", key, e))?;

        debug!(
            "completed multipart upload of {} parts for s3://{}/{key}",
            parts.len(),
            self.bucket
        );
        Ok(resp.e_tag().unwrap_or_default().to_string())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> SyncResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| classify("abort multipart", key, e))?;
        debug!("aborted multipart upload {upload_id} for s3://{}/{key}", self.bucket);
        Ok(())
    }

    async fn get_object(&self, key: &str, version: Option<&str>) -> SyncResult<ObjectBody> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version.map(String::from))
            .send()
            .await
            .map_err(|e| classify("get", key, e))?;

        let metadata = ObjectMetadata {
            etag: resp.e_tag().map(String::from),
            version_id: resp.version_id().map(String::from),
            size: resp.content_length().unwrap_or(0).max(0) as u64,
            last_modified: resp.last_modified().and_then(smithy_to_utc),
            content_type: resp.content_type().map(String::from),
            cache_control: resp.cache_control().map(String::from),
            custom: resp.metadata().cloned().unwrap_or_default(),
        };

        Ok(ObjectBody {
            metadata,
            reader: Box::new(resp.body.into_async_read()),
        })
    }

    async fn get_object_metadata(
        &self,
        key: &str,
        version: Option<&str>,
    ) -> SyncResult<ObjectMetadata> {
        let resp = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version.map(String::from))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                // HEAD errors carry no body, so the code-based classifier
                // cannot see NotFound; use the typed check first.
                return match e {
                    SdkError::ServiceError(ref ctx) if ctx.err().is_not_found() => {
                        Err(SyncError::NotFound(key.to_string()))
                    }
                    other => Err(classify("head", key, other)),
                };
            }
        };

        Ok(ObjectMetadata {
            etag: resp.e_tag().map(String::from),
            version_id: resp.version_id().map(String::from),
            size: resp.content_length().unwrap_or(0).max(0) as u64,
            last_modified: resp.last_modified().and_then(smithy_to_utc),
            content_type: resp.content_type().map(String::from),
            cache_control: resp.cache_control().map(String::from),
            custom: resp.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn delete_object(&self, key: &str, version: Option<&str>) -> SyncResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version.map(String::from))
            .send()
            .await
            .map_err(|e| classify("delete", key, e))?;
        debug!("deleted s3://{}/{key}", self.bucket);
        Ok(())
    }

    async fn presign_get(
        &self,
        key: &str,
        version: Option<&str>,
        expires_in: Duration,
    ) -> SyncResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| SyncError::Config(format!("invalid expiry for {key}: {e}")))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_version_id(version.map(String::from))
            .presigned(presigning)
            .await
            .map_err(|e| classify("presign", key, e))?;

        Ok(presigned.uri().to_string())
    }
}
