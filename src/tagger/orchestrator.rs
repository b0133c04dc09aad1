use super::error::{bounded, Result};
use super::labels::LabelExtractor;
use super::repository::RecordRepository;
use super::schema::{
    ImageEvent, ImageRecord, LabelResult, RecordKey, StoragePath, ThumbnailResult,
};
use super::thumbnail::ThumbnailGenerator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs labels and thumbnail for one event and writes the merged record.
pub struct UpsertOrchestrator {
    labels: LabelExtractor,
    thumbnails: ThumbnailGenerator,
    repository: Arc<dyn RecordRepository>,
    upload_folder: String,
    timeout: Duration,
}

impl UpsertOrchestrator {
    pub fn new(
        labels: LabelExtractor,
        thumbnails: ThumbnailGenerator,
        repository: Arc<dyn RecordRepository>,
        upload_folder: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            labels,
            thumbnails,
            repository,
            upload_folder: upload_folder.trim_matches('/').to_string(),
            timeout,
        }
    }

    pub fn in_scope(&self, event: &ImageEvent) -> bool {
        event.is_in_folder(&self.upload_folder)
    }

    /// Returns the saved record with the key it was stored under, or `None`
    /// when the event is outside the upload folder. Nothing is written unless
    /// both subtasks succeed; the first failure cancels the other subtask.
    pub async fn upsert(
        &self,
        event: &ImageEvent,
        key: &RecordKey,
    ) -> Result<Option<(RecordKey, ImageRecord)>> {
        if !self.in_scope(event) {
            debug!(object = %event.name, folder = %self.upload_folder, "outside upload folder");
            return Ok(None);
        }

        let storage_path = event.storage_path();
        let (labels, thumbnail) = tokio::try_join!(
            self.labels.extract_labels(&storage_path),
            self.thumbnails.generate_thumbnail(event)
        )?;

        let record = merge(&event.bucket, labels, thumbnail);
        let stored =
            bounded("repository save", self.timeout, self.repository.save(key, &record)).await?;
        if stored != *key {
            warn!(key = %key, stored = %stored, "storage path already saved under another key");
        }

        info!(
            key = %stored,
            storage_path = %record.storage_path,
            tags = record.tags.len(),
            "record saved"
        );
        Ok(Some((stored, record)))
    }
}

/// Combine both subtask results into the document to persist.
pub fn merge(bucket: &str, labels: LabelResult, thumbnail: ThumbnailResult) -> ImageRecord {
    ImageRecord {
        storage_path: labels.storage_path,
        tags: labels.tags,
        thumbnail_path: StoragePath::new(bucket, &thumbnail.uploaded_name),
    }
}
