use super::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Kind of bucket notification that triggered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Delete,
}

/// A storage notification, as delivered by the bucket's event platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEvent {
    pub bucket: String,
    /// Object path relative to the bucket, e.g. `uploads/a.jpg`.
    pub name: String,
    pub content_type: String,
    #[serde(rename = "bucketObjectEventKind")]
    pub kind: EventKind,
}

impl ImageEvent {
    pub fn is_image(&self) -> bool {
        self.content_type.to_ascii_lowercase().starts_with("image/")
    }

    pub fn storage_path(&self) -> StoragePath {
        StoragePath::new(&self.bucket, &self.name)
    }

    /// Folder containing the object (`""` for objects at the bucket root).
    pub fn folder(&self) -> &str {
        self.name.rsplit_once('/').map_or("", |(dir, _)| dir)
    }

    /// Base filename of the object.
    pub fn file_name(&self) -> &str {
        self.name.rsplit_once('/').map_or(self.name.as_str(), |(_, file)| file)
    }

    pub fn is_in_folder(&self, folder: &str) -> bool {
        self.folder() == folder.trim_matches('/')
    }
}

/// Canonical `gs://bucket/path` address, used as the natural key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoragePath(String);

impl StoragePath {
    pub const SCHEME: &'static str = "gs";

    pub fn new(bucket: &str, object: &str) -> Self {
        Self(format!("{}://{}/{}", Self::SCHEME, bucket, object))
    }

    /// Wrap an address that was already rendered, e.g. read back from storage.
    pub fn from_raw(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier of a record in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One label returned by the vision capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub description: String,
    #[serde(default)]
    pub score: f32,
}

impl Label {
    pub fn new(description: impl Into<String>, score: f32) -> Self {
        Self {
            description: description.into(),
            score,
        }
    }
}

/// The persisted document. Only ever written with both tags and thumbnail resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub storage_path: StoragePath,
    pub tags: Vec<String>,
    pub thumbnail_path: StoragePath,
}

/// Output of label extraction, before the thumbnail is merged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelResult {
    pub storage_path: StoragePath,
    pub tags: Vec<String>,
}

/// Output of thumbnail generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailResult {
    /// Destination object name inside the source bucket.
    pub uploaded_name: String,
}

/// Object written by [`StorageGateway::upload`](super::storage::StorageGateway::upload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub name: String,
}

/// Turn an object name into a relative filesystem path, rejecting anything
/// that could escape the directory it is joined onto.
pub(crate) fn relative_object_path(name: &str) -> Result<PathBuf> {
    if name.is_empty() {
        return Err(PipelineError::InvalidInput("empty object name".into()));
    }
    let path = Path::new(name);
    if path
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Ok(path.to_path_buf())
    } else {
        Err(PipelineError::InvalidInput(format!(
            "object name `{name}` is not a plain relative path"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, content_type: &str) -> ImageEvent {
        ImageEvent {
            bucket: "b".into(),
            name: name.into(),
            content_type: content_type.into(),
            kind: EventKind::Create,
        }
    }

    #[test]
    fn storage_path_is_scheme_bucket_object() {
        assert_eq!(
            event("uploads/a.jpg", "image/jpeg").storage_path().as_str(),
            "gs://b/uploads/a.jpg"
        );
    }

    #[test]
    fn folder_and_file_name() {
        let nested = event("uploads/2024/a.jpg", "image/jpeg");
        assert_eq!(nested.folder(), "uploads/2024");
        assert_eq!(nested.file_name(), "a.jpg");

        let root = event("a.jpg", "image/jpeg");
        assert_eq!(root.folder(), "");
        assert_eq!(root.file_name(), "a.jpg");
    }

    #[test]
    fn upload_folder_must_be_the_direct_parent() {
        assert!(event("uploads/a.jpg", "image/png").is_in_folder("uploads"));
        assert!(event("uploads/a.jpg", "image/png").is_in_folder("/uploads/"));
        assert!(!event("uploads/x/a.jpg", "image/png").is_in_folder("uploads"));
        assert!(!event("other/a.jpg", "image/png").is_in_folder("uploads"));
    }

    #[test]
    fn image_detection_uses_mime_prefix() {
        assert!(event("a", "image/jpeg").is_image());
        assert!(event("a", "IMAGE/PNG").is_image());
        assert!(!event("a", "text/plain").is_image());
        assert!(!event("a", "application/image").is_image());
    }

    #[test]
    fn event_uses_platform_field_names() {
        let raw = r#"{
            "bucket": "b",
            "name": "uploads/a.jpg",
            "contentType": "image/jpeg",
            "bucketObjectEventKind": "delete"
        }"#;
        let parsed: ImageEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content_type, "image/jpeg");
        assert_eq!(parsed.kind, EventKind::Delete);
    }

    #[test]
    fn record_serializes_to_document_shape() {
        let record = ImageRecord {
            storage_path: StoragePath::new("b", "uploads/a.jpg"),
            tags: vec!["dog".into()],
            thumbnail_path: StoragePath::new("b", "thumbnails/a.jpg"),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "storagePath": "gs://b/uploads/a.jpg",
                "tags": ["dog"],
                "thumbnailPath": "gs://b/thumbnails/a.jpg",
            })
        );
    }

    #[test]
    fn object_paths_cannot_escape() {
        assert!(relative_object_path("uploads/a.jpg").is_ok());
        assert!(relative_object_path("../etc/passwd").is_err());
        assert!(relative_object_path("/abs.jpg").is_err());
        assert!(relative_object_path("").is_err());
    }
}
