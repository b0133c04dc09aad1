//! Label extraction through a vision-tagging capability.
//!
//! Tag order follows whatever the capability returns, which is not
//! guaranteed to be stable between calls for the same image.

use super::error::{bounded, PipelineError, Result};
use super::schema::{Label, LabelResult, StoragePath};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Labels scoring below this are dropped.
pub const CONFIDENCE_THRESHOLD: f32 = 0.65;

/// A service that labels an image addressed by URI.
#[async_trait]
pub trait LabelDetector: Send + Sync {
    async fn detect_labels(&self, image_uri: &str) -> Result<Vec<Label>>;
}

/// Keep descriptions of labels scoring at least `threshold`, in input order.
pub fn filter_tags(labels: &[Label], threshold: f32) -> Vec<String> {
    labels
        .iter()
        .filter(|label| label.score >= threshold)
        .map(|label| label.description.clone())
        .collect()
}

pub struct LabelExtractor {
    detector: Arc<dyn LabelDetector>,
    threshold: f32,
    timeout: Duration,
}

impl LabelExtractor {
    pub fn new(detector: Arc<dyn LabelDetector>, threshold: f32, timeout: Duration) -> Self {
        Self {
            detector,
            threshold,
            timeout,
        }
    }

    pub async fn extract_labels(&self, storage_path: &StoragePath) -> Result<LabelResult> {
        let labels = bounded(
            "label detection",
            self.timeout,
            self.detector.detect_labels(storage_path.as_str()),
        )
        .await?;
        let tags = filter_tags(&labels, self.threshold);
        debug!(
            storage_path = %storage_path,
            detected = labels.len(),
            kept = tags.len(),
            "labels extracted"
        );
        Ok(LabelResult {
            storage_path: storage_path.clone(),
            tags,
        })
    }
}

/// Vision REST `images:annotate` client.
pub struct HttpLabelDetector {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_results: u32,
}

impl HttpLabelDetector {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, max_results: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            max_results,
        }
    }

    fn request_body(&self, image_uri: &str) -> serde_json::Value {
        serde_json::json!({
            "requests": [{
                "image": { "source": { "imageUri": image_uri } },
                "features": [{ "type": "LABEL_DETECTION", "maxResults": self.max_results }],
            }]
        })
    }
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    label_annotations: Vec<Label>,
    error: Option<AnnotateStatus>,
}

#[derive(Debug, Deserialize)]
struct AnnotateStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

fn labels_from_response(response: AnnotateResponse) -> Result<Vec<Label>> {
    let first = response
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::VisionService("empty annotate response".into()))?;
    if let Some(status) = first.error {
        return Err(PipelineError::VisionService(format!(
            "label detection failed ({}): {}",
            status.code, status.message
        )));
    }
    Ok(first.label_annotations)
}

#[async_trait]
impl LabelDetector for HttpLabelDetector {
    async fn detect_labels(&self, image_uri: &str) -> Result<Vec<Label>> {
        let mut request = self.client.post(&self.endpoint).json(&self.request_body(image_uri));
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }

        let response = request.send().await.map_err(|e| {
            PipelineError::VisionService(format!("request failed: {}", e.without_url()))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(PipelineError::VisionService(format!(
                "annotate returned {status}"
            )));
        }

        let body: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::VisionService(format!("failed to parse response: {e}")))?;
        labels_from_response(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector(Vec<Label>);

    #[async_trait]
    impl LabelDetector for FixedDetector {
        async fn detect_labels(&self, _image_uri: &str) -> Result<Vec<Label>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn low_confidence_labels_are_dropped() {
        let labels = vec![Label::new("cat", 0.9), Label::new("blurry", 0.4)];
        assert_eq!(filter_tags(&labels, CONFIDENCE_THRESHOLD), vec!["cat"]);
    }

    #[test]
    fn threshold_is_inclusive_and_order_preserved() {
        let labels = vec![
            Label::new("zebra", 0.65),
            Label::new("grass", 0.64),
            Label::new("animal", 0.99),
        ];
        assert_eq!(filter_tags(&labels, CONFIDENCE_THRESHOLD), vec!["zebra", "animal"]);
    }

    #[tokio::test]
    async fn extractor_returns_tags_with_path() {
        let extractor = LabelExtractor::new(
            Arc::new(FixedDetector(vec![Label::new("dog", 0.8)])),
            CONFIDENCE_THRESHOLD,
            Duration::from_secs(5),
        );
        let path = StoragePath::new("b", "uploads/a.jpg");
        let result = extractor.extract_labels(&path).await.unwrap();
        assert_eq!(result.tags, vec!["dog"]);
        assert_eq!(result.storage_path, path);
    }

    #[test]
    fn annotate_response_is_parsed() {
        let raw = r#"{"responses":[{"labelAnnotations":[
            {"mid":"/m/0bt9lr","description":"Dog","score":0.97,"topicality":0.97},
            {"mid":"/m/01z5f","description":"Canidae","score":0.5}
        ]}]}"#;
        let labels = labels_from_response(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].description, "Dog");
    }

    #[test]
    fn annotate_error_becomes_vision_error() {
        let raw = r#"{"responses":[{"error":{"code":7,"message":"denied"}}]}"#;
        let err = labels_from_response(serde_json::from_str(raw).unwrap()).unwrap_err();
        assert!(matches!(err, PipelineError::VisionService(msg) if msg.contains("denied")));
    }

    #[test]
    fn request_body_names_the_image_uri() {
        let detector = HttpLabelDetector::new("http://localhost/annotate", None, 10);
        let body = detector.request_body("gs://b/uploads/a.jpg");
        assert_eq!(
            body["requests"][0]["image"]["source"]["imageUri"],
            "gs://b/uploads/a.jpg"
        );
        assert_eq!(body["requests"][0]["features"][0]["type"], "LABEL_DETECTION");
    }
}
