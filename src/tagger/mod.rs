//! Image tagging pipeline.
//!
//! A storage event flows through the [`EventRouter`], which resolves the
//! record key for the object's storage path and hands the event to the
//! [`UpsertOrchestrator`]. The orchestrator runs label extraction and
//! thumbnail generation side by side and saves a single merged record.

pub mod error;
pub mod labels;
pub mod locks;
pub mod orchestrator;
pub mod repository;
pub mod router;
pub mod schema;
pub mod storage;
pub mod thumbnail;
pub mod workspace;

pub use error::{PipelineError, Result, ThumbnailStage};
pub use labels::{HttpLabelDetector, LabelDetector, LabelExtractor, CONFIDENCE_THRESHOLD};
pub use orchestrator::UpsertOrchestrator;
pub use repository::{RecordRepository, SqliteRecordRepository};
pub use router::{EventRouter, Outcome, Rejection};
pub use schema::{EventKind, ImageEvent, ImageRecord, Label, RecordKey, StoragePath};
pub use storage::{LocalBucketStorage, StorageGateway};
pub use thumbnail::{ResizeTool, ThumbnailGenerator, THUMBNAIL_SIZE};
pub use workspace::{ScratchFile, ScratchSpace};

use crate::config::Config;
use std::sync::Arc;

/// Build a router backed by the local bucket mirror, the SQLite record
/// store and the Vision REST endpoint named in `config`.
pub fn from_config(config: &Config) -> Result<EventRouter> {
    let storage = Arc::new(LocalBucketStorage::new(&config.storage.root));
    let detector = Arc::new(HttpLabelDetector::new(
        config.vision.endpoint.clone(),
        config.vision.api_key.clone(),
        config.vision.max_results,
    ));
    let repository = Arc::new(SqliteRecordRepository::new(
        &config.repository_path(),
        &config.repository.collection,
    )?);
    Ok(EventRouter::build(
        &config.pipeline_settings(),
        storage,
        detector,
        repository,
    ))
}
