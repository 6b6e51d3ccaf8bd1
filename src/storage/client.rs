// ABOUTME: S3-compatible object store client implementing the multipart upload protocol
// ABOUTME: Wraps object_store's AmazonS3 with path-style addressing and static or IAM credentials

use super::{iam, validate_part_set, PartRecord, PartUploader, StoreError, UploadSession};
use crate::config::StoreSettings;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::multipart::{MultipartStore, PartId};
use object_store::path::Path;
use object_store::{ClientOptions, ObjectStore, PutPayload};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// HTTP status tokens and S3 error codes that mean the request was not authorised
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "status 401",
    "status 403",
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
];

/// Upper bound on how long before expiry an IAM token is replaced
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

struct Backend {
    objects: Arc<dyn ObjectStore>,
    uploads: Arc<dyn MultipartStore>,
    /// When the IAM token in the default headers must be replaced. `None` never expires.
    refresh_at: Option<Instant>,
}

impl Backend {
    fn needs_refresh(&self, now: Instant) -> bool {
        self.refresh_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Point at which a token requested at `requested_at` should be replaced
///
/// Holds back a fifth of the lifetime, capped at [`TOKEN_REFRESH_MARGIN`].
fn refresh_deadline(requested_at: Instant, lifetime: Duration) -> Instant {
    let margin = TOKEN_REFRESH_MARGIN.min(lifetime / 5);
    requested_at + (lifetime - margin)
}

/// Object store client owned by one migration run
///
/// The underlying store is built on first use, so runs that never touch the
/// bucket never contact the IAM endpoint. With IAM credentials the store is
/// rebuilt with a fresh token shortly before the current one expires.
pub struct ObjectStoreClient {
    bucket: String,
    settings: Option<StoreSettings>,
    backend: RwLock<Option<Arc<Backend>>>,
}

impl ObjectStoreClient {
    /// Client for the bucket and endpoint described by `settings`
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            bucket: settings.bucket.clone(),
            settings: Some(settings),
            backend: RwLock::new(None),
        }
    }

    /// Client over an already constructed store, such as `object_store::memory::InMemory`
    pub fn with_store<S>(bucket: impl Into<String>, store: Arc<S>) -> Self
    where
        S: ObjectStore + MultipartStore,
    {
        let objects: Arc<dyn ObjectStore> = store.clone();
        let uploads: Arc<dyn MultipartStore> = store;
        Self {
            bucket: bucket.into(),
            settings: None,
            backend: RwLock::new(Some(Arc::new(Backend {
                objects,
                uploads,
                refresh_at: None,
            }))),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn backend(&self) -> Result<Arc<Backend>, StoreError> {
        if let Some(backend) = self.backend.read().await.as_ref() {
            if !backend.needs_refresh(Instant::now()) {
                return Ok(backend.clone());
            }
        }

        let mut slot = self.backend.write().await;
        // Another caller may have rebuilt it while we waited for the lock
        if let Some(backend) = slot.as_ref() {
            if !backend.needs_refresh(Instant::now()) {
                return Ok(backend.clone());
            }
            tracing::info!("IAM access token is about to expire; requesting a new one");
        }

        let settings = self.settings.as_ref().ok_or_else(|| {
            StoreError::Unavailable("no object store configured".to_string())
        })?;
        let backend = Arc::new(build_backend(settings).await?);
        *slot = Some(backend.clone());
        Ok(backend)
    }
}

async fn build_backend(settings: &StoreSettings) -> Result<Backend, StoreError> {
    tracing::info!(
        "Connecting to object store {} (bucket '{}')",
        settings.endpoint,
        settings.bucket
    );

    let mut options = ClientOptions::new()
        .with_timeout(settings.request_timeout)
        .with_allow_http(settings.endpoint.starts_with("http://"));

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(&settings.bucket)
        .with_region(&settings.location)
        .with_endpoint(&settings.endpoint)
        .with_virtual_hosted_style_request(false);

    let mut refresh_at = None;
    if settings.uses_iam() {
        let requested_at = Instant::now();
        let token = iam::fetch_access_token(
            &settings.iam_endpoint,
            &settings.api_key,
            settings.request_timeout,
        )
        .await?;
        refresh_at = token
            .lifetime
            .map(|lifetime| refresh_deadline(requested_at, lifetime));
        options = options.with_default_headers(iam::bearer_headers(
            &token.value,
            &settings.service_instance_id,
        )?);
        builder = builder.with_skip_signature(true);
        tracing::info!("✓ Obtained IAM access token");
    } else {
        builder = builder
            .with_access_key_id(&settings.api_key)
            .with_secret_access_key(&settings.service_instance_id);
    }

    let store = builder
        .with_client_options(options)
        .build()
        .map_err(|e| StoreError::Unavailable(format!("failed to configure object store: {}", e)))?;
    let store = Arc::new(store);

    let objects: Arc<dyn ObjectStore> = store.clone();
    let uploads: Arc<dyn MultipartStore> = store;
    Ok(Backend {
        objects,
        uploads,
        refresh_at,
    })
}

fn object_path(object_key: &str) -> Result<Path, StoreError> {
    Path::parse(object_key).map_err(|e| StoreError::InvalidKey {
        key: object_key.to_string(),
        reason: e.to_string(),
    })
}

/// Translate an object_store failure into the protocol error taxonomy
fn classify(operation: &str, object_key: &str, err: object_store::Error) -> StoreError {
    let message = format!("{} for '{}' failed: {}", operation, object_key, err);
    if matches!(
        err,
        object_store::Error::PermissionDenied { .. } | object_store::Error::Unauthenticated { .. }
    ) {
        return StoreError::Auth(message);
    }

    // The key is echoed in most messages and must not be mistaken for a status
    let text = err.to_string().replace(object_key, "");

    if text.contains("EntityTooSmall") {
        StoreError::PartTooSmall(message)
    } else if AUTH_FAILURE_MARKERS.iter().any(|marker| text.contains(marker)) {
        StoreError::Auth(message)
    } else {
        StoreError::Unavailable(message)
    }
}

#[async_trait]
impl PartUploader for ObjectStoreClient {
    async fn initiate(&self, object_key: &str) -> Result<UploadSession, StoreError> {
        let path = object_path(object_key)?;
        let backend = self.backend().await?;

        let upload_id = backend
            .uploads
            .create_multipart(&path)
            .await
            .map_err(|e| classify("InitiateMultipartUpload", object_key, e))?;

        tracing::debug!("Initiated multipart upload {} for '{}'", upload_id, object_key);
        Ok(UploadSession::new(object_key, upload_id))
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        data: Bytes,
    ) -> Result<PartRecord, StoreError> {
        if part_number == 0 {
            return Err(StoreError::IncompletePartSet(
                "part numbers start at 1".to_string(),
            ));
        }
        let path = object_path(session.object_key())?;
        let backend = self.backend().await?;

        let part_id = backend
            .uploads
            .put_part(
                &path,
                &session.upload_id().to_string(),
                part_number as usize - 1,
                PutPayload::from(data),
            )
            .await
            .map_err(|e| classify("UploadPart", session.object_key(), e))?;

        Ok(PartRecord {
            part_number,
            etag: part_id.content_id,
        })
    }

    async fn complete(
        &self,
        session: &UploadSession,
        parts: &[PartRecord],
    ) -> Result<(), StoreError> {
        validate_part_set(parts)?;
        let path = object_path(session.object_key())?;
        let backend = self.backend().await?;

        let part_ids = parts
            .iter()
            .map(|part| PartId {
                content_id: part.etag.clone(),
            })
            .collect();

        backend
            .uploads
            .complete_multipart(&path, &session.upload_id().to_string(), part_ids)
            .await
            .map_err(|e| classify("CompleteMultipartUpload", session.object_key(), e))?;

        Ok(())
    }

    async fn abort(&self, session: &UploadSession) {
        let path = match object_path(session.object_key()) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Skipping abort: {}", e);
                return;
            }
        };
        let backend = match self.backend().await {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!(
                    "Could not abort upload {} for '{}': {}",
                    session.upload_id(),
                    session.object_key(),
                    e
                );
                return;
            }
        };

        match backend
            .uploads
            .abort_multipart(&path, &session.upload_id().to_string())
            .await
        {
            Ok(()) => tracing::info!(
                "Aborted multipart upload {} for '{}'",
                session.upload_id(),
                session.object_key()
            ),
            Err(e) => tracing::warn!(
                "Failed to abort multipart upload {} for '{}': {}",
                session.upload_id(),
                session.object_key(),
                e
            ),
        }
    }

    async fn put_object(&self, object_key: &str, data: Bytes) -> Result<(), StoreError> {
        let path = object_path(object_key)?;
        let backend = self.backend().await?;

        backend
            .objects
            .put(&path, PutPayload::from(data))
            .await
            .map_err(|e| classify("PutObject", object_key, e))?;
        Ok(())
    }

    async fn delete_object(&self, object_key: &str) -> Result<(), StoreError> {
        let path = object_path(object_key)?;
        let backend = self.backend().await?;

        backend
            .objects
            .delete(&path)
            .await
            .map_err(|e| classify("DeleteObject", object_key, e))?;
        Ok(())
    }
}
