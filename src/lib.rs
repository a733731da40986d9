//! Sync and transfer engine for S3-style object storage.
//!
//! Synchronizes a local file tree with objects in a bucket and provides the
//! primitives automation pipelines build on:
//! - Change detection via modification times and content-hash metadata
//! - Single-request and multipart uploads with bounded part concurrency
//! - Streaming downloads
//! - Bulk deletion sweeps by prefix and age cutoff
//! - Encryption-key provisioning for SSE-C transfers
//! - Time-bounded pre-signed URLs

pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod hash;
pub mod keys;
pub mod local;
pub mod retry;
pub mod s3_store;
pub mod signer;
pub mod store;
pub mod sweeper;
pub mod transfer;
pub mod types;

pub use config::{
    BucketConfig, DeletionCriteria, EncryptionConfig, RetryPolicy, SyncSettings, TransferSettings,
};
pub use engine::SyncClient;
pub use error::{SyncError, SyncResult};
pub use s3_store::S3ObjectStore;
pub use store::ObjectStore;
pub use types::*;
