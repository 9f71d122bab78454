//! Test Helper Utilities
//!
//! Shared fixtures and collaborator doubles for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use catalog_ai::error::{ErrorType, IngestError};
use catalog_ai::ingest::{ImageResolver, LocalImageResolver, ResolveOptions};
use catalog_ai::providers::{VisionError, VisionProducer};
use catalog_ai::sinks::{LocalFilePublisher, PredictionEventValidator, SqliteWarehouseSink};
use catalog_ai::types::{IngestedProductRecord, QualityFlags, RawProductRecord, VisionLabel, VisionOutput};
use catalog_ai::Collaborators;
use catalog_common::AppConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Write a small decodable PNG and return its path
pub fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(8, 8, image::Rgb([180, 140, 90]))
        .save(&path)
        .unwrap();
    path
}

/// Configuration rooted in a temp dir with side effects disabled
pub fn test_config(dir: &TempDir) -> AppConfig {
    AppConfig {
        cache_dir: dir.path().join("cache"),
        events_dir: dir.path().join("events"),
        warehouse_path: dir.path().join("warehouse.sqlite"),
        enable_publish: false,
        validate_events: false,
        enable_warehouse: false,
        ..AppConfig::default()
    }
}

/// Raw record pointing at a local PNG
pub fn product(id: &str, title: &str, description: &str, image: &Path) -> RawProductRecord {
    RawProductRecord {
        product_id: id.to_string(),
        title: title.to_string(),
        description: Some(description.to_string()),
        image_path: Some(image.display().to_string()),
        ..Default::default()
    }
}

/// Local collaborators with a fixed vision producer
pub fn collaborators(config: &AppConfig, vision: Arc<dyn VisionProducer>) -> Collaborators {
    Collaborators {
        resolver: Arc::new(LocalImageResolver::new().unwrap()),
        vision,
        publisher: Some(Arc::new(LocalFilePublisher::new(config.events_dir.clone()))),
        warehouse: Some(Arc::new(SqliteWarehouseSink::new(config.warehouse_path.clone()))),
        validator: Some(Arc::new(PredictionEventValidator)),
    }
}

// ============================================================================
// Vision doubles
// ============================================================================

/// Returns the same labels for every image, optionally after a delay
pub struct FixedVision {
    pub labels: Vec<VisionLabel>,
    pub quality_flags: QualityFlags,
    pub delay: Duration,
}

impl FixedVision {
    pub fn new(labels: &[(&str, f64)]) -> Self {
        Self {
            labels: labels
                .iter()
                .map(|(name, confidence)| VisionLabel {
                    name: name.to_string(),
                    confidence: *confidence,
                })
                .collect(),
            quality_flags: QualityFlags::default(),
            delay: Duration::ZERO,
        }
    }

    pub fn blurry(mut self) -> Self {
        self.quality_flags.blurry = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl VisionProducer for FixedVision {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn predict(&self, _image_local_path: &Path) -> Result<VisionOutput, VisionError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(VisionOutput {
            labels: self.labels.clone(),
            quality_flags: self.quality_flags,
            trace_id: Some("fixed".to_string()),
        })
    }

    fn describe(&self, _image_ref: &str) -> String {
        "fixed".to_string()
    }
}

/// Always fails
pub struct FailingVision;

#[async_trait]
impl VisionProducer for FailingVision {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn predict(&self, _image_local_path: &Path) -> Result<VisionOutput, VisionError> {
        Err(VisionError::ApiError(503, "unavailable".to_string()))
    }

    fn describe(&self, _image_ref: &str) -> String {
        String::new()
    }
}

// ============================================================================
// Resolver doubles
// ============================================================================

/// Fails for selected product ids and sleeps before delegating to the local resolver
pub struct ScriptedResolver {
    pub inner: LocalImageResolver,
    pub failing: HashSet<String>,
    pub delay: Duration,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self {
            inner: LocalImageResolver::new().unwrap(),
            failing: HashSet::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn failing_for(mut self, product_id: &str) -> Self {
        self.failing.insert(product_id.to_string());
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ImageResolver for ScriptedResolver {
    async fn resolve(
        &self,
        record: RawProductRecord,
        options: &ResolveOptions,
    ) -> Result<IngestedProductRecord, IngestError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(&record.product_id) {
            return Err(IngestError::new(
                &record.product_id,
                ErrorType::NetworkError,
                "connection refused",
            ));
        }
        self.inner.resolve(record, options).await
    }
}
