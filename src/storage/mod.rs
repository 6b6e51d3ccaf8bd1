// ABOUTME: Multipart upload protocol types shared by the object store client and transfer engine
// ABOUTME: Defines UploadSession, PartRecord, StoreError and the PartUploader trait

pub mod client;
pub mod iam;
pub mod transfer;

pub use client::ObjectStoreClient;
pub use transfer::{ObjectTransferEngine, TransferError, TransferResult};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Smallest part the store accepts for every part except the last one (5 MiB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default chunk size used when reading export files (100 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 100 * 1024 * 1024;

/// Failures reported by object store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network failure, missing bucket, timeout or any other store-side rejection.
    /// The caller may retry the same operation.
    #[error("object store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the credentials or the token exchange failed
    #[error("object store authentication failed: {0}")]
    Auth(String),

    /// A part other than the last one was below the store's minimum size
    #[error("part rejected as smaller than the store minimum: {0}")]
    PartTooSmall(String),

    /// The part list handed to `complete` was empty or not numbered 1..N
    #[error("incomplete part set: {0}")]
    IncompletePartSet(String),

    #[error("invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
}

impl StoreError {
    /// Authentication failures affect every object in the run, not just one
    pub fn is_auth(&self) -> bool {
        matches!(self, StoreError::Auth(_))
    }
}

/// One in-flight multipart upload
///
/// The upload id is assigned by the store on initiation and must accompany
/// every later call for the same object. A session belongs to the transfer
/// that created it and is not cloneable; once completed or aborted it must
/// not be used again.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadSession {
    object_key: String,
    upload_id: String,
}

impl UploadSession {
    pub fn new(object_key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            upload_id: upload_id.into(),
        }
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
}

/// The store's acknowledgement of one uploaded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    /// 1-based part number
    pub part_number: u32,
    /// Opaque integrity tag (ETag) issued by the store
    pub etag: String,
}

/// Multipart upload protocol against an S3-compatible object store
///
/// Implementations keep no per-upload state between calls; everything needed
/// to continue an upload travels in the [`UploadSession`].
#[async_trait]
pub trait PartUploader: Send + Sync {
    /// Begin a multipart upload for `object_key` in the configured bucket
    async fn initiate(&self, object_key: &str) -> Result<UploadSession, StoreError>;

    /// Upload `data` as part `part_number` (1-based) of `session`
    ///
    /// Each part number is uploaded at most once per session.
    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartRecord, StoreError>;

    /// Assemble the object from `parts`, which must be numbered 1..N in order
    async fn complete(&self, session: &UploadSession, parts: &[PartRecord])
        -> Result<(), StoreError>;

    /// Release any data uploaded for `session`
    ///
    /// Best effort: failures are logged, never returned.
    async fn abort(&self, session: &UploadSession);

    /// Store `data` as a whole object in a single request
    async fn put_object(&self, object_key: &str, data: Bytes) -> Result<(), StoreError>;

    /// Remove an object from the bucket
    async fn delete_object(&self, object_key: &str) -> Result<(), StoreError>;
}

/// Check that `parts` is non-empty and numbered exactly 1..N in ascending order
///
/// # Examples
///
/// ```
/// # use stage_migrator::storage::{validate_part_set, PartRecord};
/// let part = |n| PartRecord { part_number: n, etag: format!("etag-{}", n) };
/// assert!(validate_part_set(&[part(1), part(2)]).is_ok());
/// assert!(validate_part_set(&[part(1), part(3)]).is_err());
/// assert!(validate_part_set(&[]).is_err());
/// ```
pub fn validate_part_set(parts: &[PartRecord]) -> Result<(), StoreError> {
    if parts.is_empty() {
        return Err(StoreError::IncompletePartSet(
            "at least one part is required".to_string(),
        ));
    }

    for (index, part) in parts.iter().enumerate() {
        let expected = index as u32 + 1;
        if part.part_number != expected {
            return Err(StoreError::IncompletePartSet(format!(
                "expected part {} at position {}, found part {}",
                expected, index, part.part_number
            )));
        }
    }

    Ok(())
}
