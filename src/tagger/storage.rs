use super::error::{PipelineError, Result};
use super::schema::{relative_object_path, UploadedObject};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Blob storage addressed by bucket + object name.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Copy `bucket/object` into the local file at `destination`.
    async fn download(&self, bucket: &str, object: &str, destination: &Path) -> Result<()>;

    /// Store the local file at `source` as `bucket/destination`.
    async fn upload(
        &self,
        bucket: &str,
        source: &Path,
        destination: &str,
    ) -> Result<UploadedObject>;
}

/// Buckets mirrored as directories under a local root.
pub struct LocalBucketStorage {
    base_dir: PathBuf,
}

impl LocalBucketStorage {
    pub fn new(base_dir: &str) -> Self {
        let expanded = shellexpand::tilde(base_dir).to_string();
        Self {
            base_dir: PathBuf::from(expanded),
        }
    }

    /// Absolute path of `bucket/object` on disk.
    pub fn object_path(&self, bucket: &str, object: &str) -> Result<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(PipelineError::InvalidInput(format!("invalid bucket name `{bucket}`")));
        }
        Ok(self.base_dir.join(bucket).join(relative_object_path(object)?))
    }
}

#[async_trait]
impl StorageGateway for LocalBucketStorage {
    async fn download(&self, bucket: &str, object: &str, destination: &Path) -> Result<()> {
        let abs = self.object_path(bucket, object)?;
        fs::copy(&abs, destination).await.map_err(|e| {
            PipelineError::Storage(format!("failed to download gs://{bucket}/{object}: {e}"))
        })?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        source: &Path,
        destination: &str,
    ) -> Result<UploadedObject> {
        let abs = self.object_path(bucket, destination)?;
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                PipelineError::Storage(format!(
                    "failed to prepare gs://{bucket}/{destination}: {e}"
                ))
            })?;
        }
        fs::copy(source, &abs).await.map_err(|e| {
            PipelineError::Storage(format!("failed to upload gs://{bucket}/{destination}: {e}"))
        })?;
        Ok(UploadedObject {
            name: destination.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download_copies_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalBucketStorage::new(tmp.path().join("buckets").to_str().unwrap());

        let local = tmp.path().join("local.jpg");
        std::fs::write(&local, b"jpeg bytes").unwrap();
        let uploaded = storage.upload("b", &local, "thumbnails/a.jpg").await.unwrap();
        assert_eq!(uploaded.name, "thumbnails/a.jpg");

        let back = tmp.path().join("back.jpg");
        storage.download("b", "thumbnails/a.jpg", &back).await.unwrap();
        assert_eq!(std::fs::read(back).unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn missing_object_is_a_storage_error() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalBucketStorage::new(tmp.path().to_str().unwrap());
        let err = storage
            .download("b", "uploads/none.jpg", &tmp.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn bucket_and_object_names_are_confined() {
        let storage = LocalBucketStorage::new("/srv/buckets");
        assert_eq!(
            storage.object_path("b", "uploads/a.jpg").unwrap(),
            PathBuf::from("/srv/buckets/b/uploads/a.jpg")
        );
        assert!(storage.object_path("..", "a.jpg").is_err());
        assert!(storage.object_path("b/c", "a.jpg").is_err());
        assert!(storage.object_path("b", "../a.jpg").is_err());
    }
}
