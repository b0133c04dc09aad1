#![allow(dead_code)]

use async_trait::async_trait;
use image_tagger::tagger::schema::UploadedObject;
use image_tagger::tagger::{
    EventKind, EventRouter, ImageEvent, ImageRecord, Label, LabelDetector, PipelineError,
    RecordKey, RecordRepository, Result, StorageGateway, StoragePath,
};
use image_tagger::PipelineSettings;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn event(name: &str, content_type: &str, kind: EventKind) -> ImageEvent {
    ImageEvent {
        bucket: "b".into(),
        name: name.into(),
        content_type: content_type.into(),
        kind,
    }
}

/// Storage double: downloads write fixed bytes, uploads are recorded.
#[derive(Default)]
pub struct FakeStorage {
    pub downloads: AtomicUsize,
    pub uploads: Mutex<Vec<(String, String)>>,
    pub scratch_paths: Mutex<Vec<PathBuf>>,
    pub upload_delay: Option<Duration>,
}

#[async_trait]
impl StorageGateway for FakeStorage {
    async fn download(&self, _bucket: &str, _object: &str, destination: &Path) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.scratch_paths.lock().push(destination.to_path_buf());
        tokio::fs::write(destination, b"\xff\xd8fake jpeg")
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))
    }

    async fn upload(
        &self,
        bucket: &str,
        _source: &Path,
        destination: &str,
    ) -> Result<UploadedObject> {
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        self.uploads
            .lock()
            .push((bucket.to_string(), destination.to_string()));
        Ok(UploadedObject {
            name: destination.to_string(),
        })
    }
}

/// Label double returning a fixed answer, or failing.
pub struct FakeDetector {
    pub labels: Vec<Label>,
    pub fail: bool,
    pub delay: Option<Duration>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeDetector {
    pub fn returning(labels: Vec<Label>) -> Self {
        Self {
            labels,
            fail: false,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::returning(Vec::new())
        }
    }
}

#[async_trait]
impl LabelDetector for FakeDetector {
    async fn detect_labels(&self, image_uri: &str) -> Result<Vec<Label>> {
        self.calls.lock().push(image_uri.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(PipelineError::VisionService("quota exceeded".into()));
        }
        Ok(self.labels.clone())
    }
}

/// In-memory repository that counts every call.
#[derive(Default)]
pub struct FakeRepository {
    pub records: Mutex<HashMap<RecordKey, ImageRecord>>,
    pub queries: AtomicUsize,
    pub allocations: AtomicUsize,
    pub saves: AtomicUsize,
    pub deletes: Mutex<Vec<RecordKey>>,
}

impl FakeRepository {
    pub fn mutations(&self) -> usize {
        self.saves.load(Ordering::SeqCst) + self.deletes.lock().len()
    }

    pub fn seed(&self, key: &str, record: ImageRecord) -> RecordKey {
        let key = RecordKey::new(key);
        self.records.lock().insert(key.clone(), record);
        key
    }
}

#[async_trait]
impl RecordRepository for FakeRepository {
    async fn find_key_by_storage_path(
        &self,
        storage_path: &StoragePath,
    ) -> Result<Option<RecordKey>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .records
            .lock()
            .iter()
            .find(|(_, record)| &record.storage_path == storage_path)
            .map(|(key, _)| key.clone()))
    }

    async fn allocate_key(&self) -> Result<RecordKey> {
        let n = self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(RecordKey::new(format!("key-{n}")))
    }

    async fn save(&self, key: &RecordKey, record: &ImageRecord) -> Result<RecordKey> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.records.lock().insert(key.clone(), record.clone());
        Ok(key.clone())
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        self.deletes.lock().push(key.clone());
        self.records.lock().remove(key);
        Ok(())
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<ImageRecord>> {
        Ok(self.records.lock().get(key).cloned())
    }
}

/// Settings pointing the scratch tree at `scratch_root` and using `true`
/// as the resize tool.
pub fn settings(scratch_root: &Path) -> PipelineSettings {
    PipelineSettings {
        scratch_root: scratch_root.to_path_buf(),
        resize_program: "true".into(),
        call_timeout: Duration::from_secs(5),
        ..PipelineSettings::default()
    }
}

pub fn router(
    settings: &PipelineSettings,
    storage: &Arc<FakeStorage>,
    detector: &Arc<FakeDetector>,
    repository: &Arc<FakeRepository>,
) -> EventRouter {
    EventRouter::build(
        settings,
        storage.clone(),
        detector.clone(),
        repository.clone(),
    )
}
