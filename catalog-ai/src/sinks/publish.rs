//! Event publication
//!
//! [`LocalFilePublisher`] appends each event as one JSON line to
//! `<base_dir>/<topic>.jsonl`. The message id is the SHA-256 of the serialized
//! payload (keys sorted), so republishing an identical event yields the same id.

use super::SinkError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Topic predicted-record events are published to
pub const PREDICTIONS_TOPIC: &str = "catalog_predictions";

/// Publishes an event to a topic and returns its message id
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<String, SinkError>;
}

/// Topic-scoped JSONL files on local disk
#[derive(Debug, Clone)]
pub struct LocalFilePublisher {
    base_dir: PathBuf,
}

impl LocalFilePublisher {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// File events for `topic` are appended to
    pub fn topic_path(&self, topic: &str) -> PathBuf {
        self.base_dir.join(format!("{}.jsonl", topic))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl Publisher for LocalFilePublisher {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<String, SinkError> {
        let line = serde_json::to_string(&sorted_keys(payload))?;
        let message_id = format!("{:x}", Sha256::digest(line.as_bytes()));

        tokio::fs::create_dir_all(&self.base_dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.topic_path(topic))
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(topic = %topic, message_id = %message_id, "Published event");
        Ok(message_id)
    }
}

/// Copy of `value` with object keys in lexicographic order at every level
fn sorted_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(key, item)| (key.clone(), sorted_keys(item)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sorted_keys).collect())
        }
        other => other.clone(),
    }
}
