use super::error::{bounded, PipelineError, Result};
use super::labels::{LabelDetector, LabelExtractor};
use super::locks::KeyLocks;
use super::orchestrator::UpsertOrchestrator;
use super::repository::RecordRepository;
use super::schema::{EventKind, ImageEvent, ImageRecord, RecordKey};
use super::storage::StorageGateway;
use super::thumbnail::{ResizeTool, ThumbnailGenerator};
use super::workspace::ScratchSpace;
use crate::config::PipelineSettings;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Why an event was accepted but deliberately not processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotAnImage { content_type: String },
    OutsideUploadFolder { folder: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnImage { content_type } => {
                write!(f, "content type `{content_type}` is not an image")
            }
            Self::OutsideUploadFolder { folder } => {
                write!(f, "folder `{folder}` is not the upload folder")
            }
        }
    }
}

/// Result of handling one event, returned to the invoking platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Saved { key: RecordKey, record: ImageRecord },
    Deleted { key: RecordKey },
    /// Delete event for a path that has no record.
    NoRecord,
    Rejected(Rejection),
}

/// Entry points for storage notifications.
pub struct EventRouter {
    orchestrator: UpsertOrchestrator,
    repository: Arc<dyn RecordRepository>,
    locks: KeyLocks,
    timeout: Duration,
}

impl EventRouter {
    pub fn new(
        orchestrator: UpsertOrchestrator,
        repository: Arc<dyn RecordRepository>,
        timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            repository,
            locks: KeyLocks::new(),
            timeout,
        }
    }

    /// Wire the pipeline from its three capabilities.
    pub fn build(
        settings: &PipelineSettings,
        storage: Arc<dyn StorageGateway>,
        detector: Arc<dyn LabelDetector>,
        repository: Arc<dyn RecordRepository>,
    ) -> Self {
        let labels =
            LabelExtractor::new(detector, settings.confidence_threshold, settings.call_timeout);
        let thumbnails = ThumbnailGenerator::new(
            storage,
            ScratchSpace::new(&settings.scratch_root),
            ResizeTool::new(&settings.resize_program, settings.thumbnail_size),
            &settings.thumbnail_prefix,
            settings.call_timeout,
        );
        let orchestrator = UpsertOrchestrator::new(
            labels,
            thumbnails,
            Arc::clone(&repository),
            &settings.upload_folder,
            settings.call_timeout,
        );
        Self::new(orchestrator, repository, settings.call_timeout)
    }

    /// Route an event by its kind.
    pub async fn dispatch(&self, event: &ImageEvent) -> Result<Outcome> {
        match event.kind {
            EventKind::Create => self.on_create(event).await,
            EventKind::Delete => self.on_delete(event).await,
        }
    }

    pub async fn on_create(&self, event: &ImageEvent) -> Result<Outcome> {
        if !event.is_image() {
            return Ok(reject(event, Rejection::NotAnImage {
                content_type: event.content_type.clone(),
            }));
        }
        if !self.orchestrator.in_scope(event) {
            return Ok(reject(event, Rejection::OutsideUploadFolder {
                folder: event.folder().to_string(),
            }));
        }

        let _guard = self.locks.lock(&event.storage_path()).await;
        self.upsert_locked(event)
            .await
            .inspect_err(|e| log_failure("create", event, e))
    }

    pub async fn on_delete(&self, event: &ImageEvent) -> Result<Outcome> {
        if !event.is_image() {
            return Ok(reject(event, Rejection::NotAnImage {
                content_type: event.content_type.clone(),
            }));
        }

        let _guard = self.locks.lock(&event.storage_path()).await;
        self.delete_locked(event)
            .await
            .inspect_err(|e| log_failure("delete", event, e))
    }

    /// Key of the existing record for the event's storage path, if any.
    pub async fn resolve_key(&self, event: &ImageEvent) -> Result<Option<RecordKey>> {
        if !event.is_image() {
            return Err(PipelineError::InvalidInput(format!(
                "object `{}` is not an image ({})",
                event.name, event.content_type
            )));
        }
        let storage_path = event.storage_path();
        bounded(
            "repository query",
            self.timeout,
            self.repository.find_key_by_storage_path(&storage_path),
        )
        .await
    }

    /// Existing key for the event's path, or a freshly allocated one.
    pub async fn resolve_or_allocate_key(&self, event: &ImageEvent) -> Result<RecordKey> {
        match self.resolve_key(event).await? {
            Some(key) => Ok(key),
            None => bounded("key allocation", self.timeout, self.repository.allocate_key()).await,
        }
    }

    async fn upsert_locked(&self, event: &ImageEvent) -> Result<Outcome> {
        let key = self.resolve_or_allocate_key(event).await?;
        let outcome = match self.orchestrator.upsert(event, &key).await? {
            Some((key, record)) => Outcome::Saved { key, record },
            None => Outcome::Rejected(Rejection::OutsideUploadFolder {
                folder: event.folder().to_string(),
            }),
        };
        Ok(outcome)
    }

    async fn delete_locked(&self, event: &ImageEvent) -> Result<Outcome> {
        let storage_path = event.storage_path();
        let Some(key) = self.resolve_key(event).await? else {
            info!(storage_path = %storage_path, "no record to delete");
            return Ok(Outcome::NoRecord);
        };
        bounded("repository delete", self.timeout, self.repository.delete(&key)).await?;
        info!(key = %key, storage_path = %storage_path, "record deleted");
        Ok(Outcome::Deleted { key })
    }
}

fn reject(event: &ImageEvent, rejection: Rejection) -> Outcome {
    warn!(bucket = %event.bucket, object = %event.name, reason = %rejection, "event rejected");
    Outcome::Rejected(rejection)
}

fn log_failure(operation: &str, event: &ImageEvent, err: &PipelineError) {
    error!(
        operation,
        bucket = %event.bucket,
        object = %event.name,
        retryable = err.is_retryable(),
        error = %err,
        "event processing failed"
    );
}
