//! Object storage access for S3 and object_store backends.
//!
//! The pipeline needs four operations: read an object, write an object with
//! tags, read an object's tags and replace an object's tags.
//! [`S3Storage`] maps them onto native S3 object tagging. [`ObjectStoreStorage`]
//! runs the same contract over any `object_store` backend (local disk,
//! in-memory) and keeps tags in sidecar JSON objects.

use crate::config::StorageConfig;
use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single object tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("{operation} on s3://{bucket}/{key} failed: {message}")]
    Backend {
        operation: &'static str,
        bucket: String,
        key: String,
        message: String,
    },
}

impl StorageError {
    fn backend(operation: &'static str, bucket: &str, key: &str, message: impl ToString) -> Self {
        StorageError::Backend {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    fn not_found(bucket: &str, key: &str) -> Self {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

/// Object store operations used by the pipeline.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Read a whole object.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Create or replace an object, setting its tags in the same write.
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes, tags: &[Tag]) -> Result<(), StorageError>;

    /// Current tag set of an existing object.
    async fn get_object_tags(&self, bucket: &str, key: &str) -> Result<Vec<Tag>, StorageError>;

    /// Replace the tag set of an existing object.
    async fn put_object_tags(&self, bucket: &str, key: &str, tags: &[Tag]) -> Result<(), StorageError>;
}

/// Encode tags as the URL query string S3 expects in the tagging header.
pub fn encode_tagging(tags: &[Tag]) -> String {
    tags.iter()
        .map(|t| format!("{}={}", urlencoding::encode(&t.key), urlencoding::encode(&t.value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Amazon S3 (or compatible) storage with native object tagging.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
}

impl S3Storage {
    /// Build a client.
    ///
    /// Credentials are loaded from the default provider chain (environment,
    /// AWS config files, instance/task role). The region comes from the
    /// config if set, otherwise from the same chain.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            tracing::info!("Using custom S3 endpoint: {}", endpoint);
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::not_found(bucket, key)
                } else {
                    StorageError::backend("get_object", bucket, key, DisplayErrorContext(e))
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::backend("get_object", bucket, key, DisplayErrorContext(e)))?;

        Ok(data.into_bytes())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes, tags: &[Tag]) -> Result<(), StorageError> {
        let tagging = (!tags.is_empty()).then(|| encode_tagging(tags));

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_tagging(tagging)
            .send()
            .await
            .map_err(|e| StorageError::backend("put_object", bucket, key, DisplayErrorContext(e)))?;

        Ok(())
    }

    async fn get_object_tags(&self, bucket: &str, key: &str) -> Result<Vec<Tag>, StorageError> {
        let output = self
            .client
            .get_object_tagging()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::backend("get_object_tagging", bucket, key, DisplayErrorContext(e)))?;

        Ok(output
            .tag_set()
            .iter()
            .map(|t| Tag::new(t.key(), t.value()))
            .collect())
    }

    async fn put_object_tags(&self, bucket: &str, key: &str, tags: &[Tag]) -> Result<(), StorageError> {
        use aws_sdk_s3::types::{Tag as S3Tag, Tagging};

        let tag_set = tags
            .iter()
            .map(|t| S3Tag::builder().key(&t.key).value(&t.value).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::backend("put_object_tagging", bucket, key, e))?;

        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| StorageError::backend("put_object_tagging", bucket, key, e))?;

        self.client
            .put_object_tagging()
            .bucket(bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| StorageError::backend("put_object_tagging", bucket, key, DisplayErrorContext(e)))?;

        Ok(())
    }
}

/// Prefix under which sidecar tag objects are stored.
const TAGS_PREFIX: &str = "_tags";

/// Storage over an `object_store` backend.
///
/// Buckets become the first path segment. Tags for `bucket/key` live in the
/// JSON object `_tags/bucket/key.json`.
pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreStorage {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Non-persistent storage, mainly for tests and dry runs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Storage rooted at a local directory.
    pub fn local(root: &str) -> Result<Self> {
        let path = std::path::Path::new(root);
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }
        tracing::info!("Creating LocalFileSystem store at: {}", path.display());
        Ok(Self::new(Arc::new(LocalFileSystem::new_with_prefix(path)?)))
    }

    fn object_path(bucket: &str, key: &str) -> Path {
        Path::from(format!("{}/{}", bucket, key))
    }

    fn tags_path(bucket: &str, key: &str) -> Path {
        Path::from(format!("{}/{}/{}.json", TAGS_PREFIX, bucket, key))
    }

    async fn ensure_exists(&self, operation: &'static str, bucket: &str, key: &str) -> Result<(), StorageError> {
        match self.store.head(&Self::object_path(bucket, key)).await {
            Ok(_) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Err(StorageError::not_found(bucket, key)),
            Err(e) => Err(StorageError::backend(operation, bucket, key, e)),
        }
    }

    async fn write_tags(&self, bucket: &str, key: &str, tags: &[Tag]) -> Result<(), StorageError> {
        let json = serde_json::to_vec(tags).map_err(|e| StorageError::backend("put_object_tagging", bucket, key, e))?;
        self.store
            .put(&Self::tags_path(bucket, key), PutPayload::from(json))
            .await
            .map_err(|e| StorageError::backend("put_object_tagging", bucket, key, e))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let result = match self.store.get(&Self::object_path(bucket, key)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Err(StorageError::not_found(bucket, key)),
            Err(e) => return Err(StorageError::backend("get_object", bucket, key, e)),
        };

        result
            .bytes()
            .await
            .map_err(|e| StorageError::backend("get_object", bucket, key, e))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes, tags: &[Tag]) -> Result<(), StorageError> {
        self.store
            .put(&Self::object_path(bucket, key), PutPayload::from(body))
            .await
            .map_err(|e| StorageError::backend("put_object", bucket, key, e))?;

        self.write_tags(bucket, key, tags).await
    }

    async fn get_object_tags(&self, bucket: &str, key: &str) -> Result<Vec<Tag>, StorageError> {
        self.ensure_exists("get_object_tagging", bucket, key).await?;

        let bytes = match self.store.get(&Self::tags_path(bucket, key)).await {
            Ok(result) => result
                .bytes()
                .await
                .map_err(|e| StorageError::backend("get_object_tagging", bucket, key, e))?,
            Err(object_store::Error::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::backend("get_object_tagging", bucket, key, e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| StorageError::backend("get_object_tagging", bucket, key, e))
    }

    async fn put_object_tags(&self, bucket: &str, key: &str, tags: &[Tag]) -> Result<(), StorageError> {
        self.ensure_exists("put_object_tagging", bucket, key).await?;
        self.write_tags(bucket, key, tags).await
    }
}

/// Create the storage backend selected by the configuration.
/// Uses a local directory if `local_root` is set, otherwise S3.
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>> {
    match &config.local_root {
        Some(root) => Ok(Arc::new(ObjectStoreStorage::local(root)?)),
        None => {
            tracing::info!(
                "Creating S3 client (region: {})",
                config.region.as_deref().unwrap_or("default chain")
            );
            Ok(Arc::new(S3Storage::from_config(config).await))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_tagging() {
        let tags = vec![
            Tag::new("ProcessedTime", "2024-01-01 00:00:00"),
            Tag::new("owner", "a&b"),
        ];
        assert_eq!(
            encode_tagging(&tags),
            "ProcessedTime=2024-01-01%2000%3A00%3A00&owner=a%26b"
        );
        assert_eq!(encode_tagging(&[]), "");
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let storage = ObjectStoreStorage::in_memory();
        storage
            .put_object("bucket", "games/001.parquet", Bytes::from_static(b"data"), &[])
            .await
            .unwrap();

        let body = storage.get_object("bucket", "games/001.parquet").await.unwrap();
        assert_eq!(body.as_ref(), b"data");
    }

    #[tokio::test]
    async fn test_buckets_are_separate() {
        let storage = ObjectStoreStorage::in_memory();
        storage
            .put_object("a", "k.parquet", Bytes::from_static(b"1"), &[])
            .await
            .unwrap();

        let err = storage.get_object("b", "k.parquet").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_tags_written_with_object() {
        let storage = ObjectStoreStorage::in_memory();
        let tags = vec![Tag::new("ProcessedTime", "2024-01-01 00:00:00")];
        storage
            .put_object("bucket", "k.parquet", Bytes::from_static(b"x"), &tags)
            .await
            .unwrap();

        assert_eq!(storage.get_object_tags("bucket", "k.parquet").await.unwrap(), tags);
    }

    #[tokio::test]
    async fn test_put_tags_replaces_set() {
        let storage = ObjectStoreStorage::in_memory();
        storage
            .put_object("bucket", "k.parquet", Bytes::from_static(b"x"), &[Tag::new("a", "1")])
            .await
            .unwrap();

        let replacement = vec![Tag::new("a", "1"), Tag::new("b", "2")];
        storage.put_object_tags("bucket", "k.parquet", &replacement).await.unwrap();

        assert_eq!(storage.get_object_tags("bucket", "k.parquet").await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn test_tags_of_missing_object() {
        let storage = ObjectStoreStorage::in_memory();

        let err = storage.get_object_tags("bucket", "missing.parquet").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));

        let err = storage
            .put_object_tags("bucket", "missing.parquet", &[Tag::new("a", "1")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_local_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ObjectStoreStorage::local(dir.path().to_str().unwrap()).unwrap();

        storage
            .put_object("raw", "games/001.parquet", Bytes::from_static(b"abc"), &[Tag::new("t", "v")])
            .await
            .unwrap();

        assert!(dir.path().join("raw").join("games").join("001.parquet").exists());
        assert_eq!(
            storage.get_object_tags("raw", "games/001.parquet").await.unwrap(),
            vec![Tag::new("t", "v")]
        );
    }
}
