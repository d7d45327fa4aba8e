//! Object store (C2): S3-compatible blob storage (MinIO in deployment) via
//! the `object_store` crate, grounded in the teacher's `claude_code` client
//! wrapping an external dependency behind one struct.

use crate::config::ObjectStoreConfig;
use crate::error::{HubError, Result};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{ObjectStore as _, PutMode, PutOptions};
use std::time::Duration;

pub struct ObjectStore {
    client: AmazonS3,
}

impl ObjectStore {
    pub async fn connect(config: &ObjectStoreConfig) -> Result<Self> {
        let scheme = if config.secure { "https" } else { "http" };
        let endpoint = format!("{scheme}://{}", config.endpoint);
        let client = AmazonS3Builder::new()
            .with_endpoint(endpoint)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_allow_http(!config.secure)
            .with_bucket_name("taskhub")
            .build()
            .map_err(|e| HubError::Configuration(format!("object store config invalid: {e}")))?;
        Ok(Self { client })
    }

    fn full_path(bucket: &str, object_path: &str) -> ObjectPath {
        ObjectPath::from(format!("{bucket}/{object_path}"))
    }

    /// Idempotent by `(bucket, object_path)`: a second upload of identical
    /// bytes is a no-op; different bytes at the same path is a `Conflict`
    /// (objects are immutable, per `spec.md` §5).
    pub async fn upload_object(
        &self,
        bucket: &str,
        object_path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let path = Self::full_path(bucket, object_path);
        if let Ok(existing) = self.client.get(&path).await {
            let existing_bytes = existing.bytes().await?;
            if existing_bytes.as_ref() == bytes.as_slice() {
                return Ok(());
            }
            return Err(HubError::Conflict(format!(
                "object {bucket}/{object_path} already exists with different content"
            )));
        }

        let opts = PutOptions {
            mode: PutMode::Create,
            attributes: {
                let mut attrs = object_store::Attributes::new();
                attrs.insert(
                    object_store::Attribute::ContentType,
                    content_type.to_string().into(),
                );
                attrs
            },
            ..Default::default()
        };
        self.client
            .put_opts(&path, bytes.into(), opts)
            .await
            .map_err(|e| match e {
                object_store::Error::AlreadyExists { .. } => HubError::Conflict(format!(
                    "object {bucket}/{object_path} already exists"
                )),
                other => other.into(),
            })?;
        Ok(())
    }

    pub async fn get_object(&self, bucket: &str, object_path: &str) -> Result<Vec<u8>> {
        let path = Self::full_path(bucket, object_path);
        let result = self.client.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => {
                HubError::NotFound(format!("object {bucket}/{object_path} not found"))
            }
            other => other.into(),
        })?;
        Ok(result.bytes().await?.to_vec())
    }

    pub async fn presign_get(&self, bucket: &str, object_path: &str, ttl: Duration) -> Result<String> {
        let path = Self::full_path(bucket, object_path);
        let url = self
            .client
            .signed_url(http::Method::GET, &path, ttl)
            .await
            .map_err(|e| HubError::StorageUnavailable(format!("presign failed: {e}")))?;
        Ok(url.to_string())
    }
}
