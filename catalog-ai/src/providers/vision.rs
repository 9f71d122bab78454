//! Vision producers
//!
//! A [`VisionProducer`] turns a local image into ranked labels plus quality
//! flags. Two implementations share the trait:
//!
//! - [`DeterministicVisionProducer`] - hash-seeded output for offline runs and tests
//! - [`HttpVisionProducer`] - posts the image path to a model-serving endpoint
//!
//! Producers must be deterministic for a fixed input path.

use crate::types::{QualityFlags, VisionLabel, VisionOutput};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("catalog-ai/", env!("CARGO_PKG_VERSION"));

/// Vision producer errors
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Image → labels capability
#[async_trait]
pub trait VisionProducer: Send + Sync {
    /// Producer identifier (e.g. "deterministic", "http")
    fn name(&self) -> &'static str;

    /// Ranked labels and quality flags for a local image
    async fn predict(&self, image_local_path: &Path) -> Result<VisionOutput, VisionError>;

    /// Short textual hint for an image reference
    fn describe(&self, image_ref: &str) -> String;
}

// ============================================================================
// Deterministic producer
// ============================================================================

/// Label vocabulary of the deterministic producer
pub const DETERMINISTIC_LABELS: [&str; 10] = [
    "sofa",
    "sectional",
    "bed",
    "table",
    "chair",
    "lamp",
    "dresser",
    "rug",
    "desk",
    "bench",
];

const DESCRIBE_HINTS: [(&str, &str); 5] = [
    ("sofa", "Appears to be an upholstered sofa with neutral fabric."),
    ("chair", "Looks like a single chair shot against a white backdrop."),
    ("table", "A wooden table surface with clean lines is visible."),
    ("lamp", "A standing lamp with a cylindrical shade is shown."),
    ("bed", "An angled view of a neatly staged bed is visible."),
];

const GENERIC_HINT: &str = "Generic catalog image with minimal visual cues.";

/// Hash-seeded vision producer
///
/// The SHA-256 of the path string seeds everything:
/// - first 32 bits pick three labels and the quality flags (bits 0-2)
/// - next 32 bits seed the label confidences (0.55-0.92)
/// - the first 12 hex digits become the trace id
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicVisionProducer;

impl DeterministicVisionProducer {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core of [`VisionProducer::predict`]
    pub fn predict_path(&self, image_local_path: &Path) -> VisionOutput {
        let path = image_local_path.to_string_lossy();
        let digest = Sha256::digest(path.as_bytes());
        let base = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let seed = u32::from_be_bytes([digest[4], digest[5], digest[6], digest[7]]);

        let labels = (0..3u32)
            .map(|idx| {
                let label_index = (u64::from(base) + u64::from(idx) * 5) % DETERMINISTIC_LABELS.len() as u64;
                let raw = (seed >> (idx * 5)) & 0xFF;
                let confidence = (0.55 + f64::from(raw % 40) / 100.0).min(0.92);
                VisionLabel {
                    name: DETERMINISTIC_LABELS[label_index as usize].to_string(),
                    confidence,
                }
            })
            .collect();

        let quality_flags = QualityFlags {
            blurry: base & 0x1 != 0,
            low_res: base & 0x2 != 0,
            dark: base & 0x4 != 0,
        };

        let hex = format!("{:x}", digest);
        VisionOutput {
            labels,
            quality_flags,
            trace_id: Some(hex[..12].to_string()),
        }
    }
}

#[async_trait]
impl VisionProducer for DeterministicVisionProducer {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn predict(&self, image_local_path: &Path) -> Result<VisionOutput, VisionError> {
        Ok(self.predict_path(image_local_path))
    }

    fn describe(&self, image_ref: &str) -> String {
        let slug = image_ref.to_lowercase();
        DESCRIBE_HINTS
            .iter()
            .find(|(keyword, _)| slug.contains(keyword))
            .map(|(_, hint)| hint.to_string())
            .unwrap_or_else(|| GENERIC_HINT.to_string())
    }
}

// ============================================================================
// HTTP producer
// ============================================================================

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    image_path: &'a str,
}

/// Vision producer backed by a model-serving endpoint
///
/// POSTs `{"image_path": ...}` to `<endpoint>/predict` and expects a
/// [`VisionOutput`] JSON body in return.
pub struct HttpVisionProducer {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpVisionProducer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, VisionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| VisionError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VisionProducer for HttpVisionProducer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn predict(&self, image_local_path: &Path) -> Result<VisionOutput, VisionError> {
        let url = format!("{}/predict", self.endpoint);
        let path = image_local_path.to_string_lossy();

        tracing::debug!(url = %url, image = %path, "Requesting vision labels");

        let response = self
            .http_client
            .post(&url)
            .json(&PredictRequest { image_path: &path })
            .send()
            .await
            .map_err(|e| VisionError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(VisionError::ApiError(status.as_u16(), error_text));
        }

        response
            .json::<VisionOutput>()
            .await
            .map_err(|e| VisionError::ParseError(e.to_string()))
    }

    fn describe(&self, image_ref: &str) -> String {
        format!("Remote vision model at {} ({})", self.endpoint, image_ref)
    }
}
