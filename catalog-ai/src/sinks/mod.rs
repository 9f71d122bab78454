//! Output sinks for predicted records
//!
//! - `publish` - event publication (one message per record)
//! - `warehouse` - tabular persistence (one write per batch)
//! - `contracts` - structural validation of outbound events

pub mod contracts;
pub mod publish;
pub mod warehouse;

pub use contracts::{EventValidator, PredictionEventValidator};
pub use publish::{LocalFilePublisher, Publisher};
pub use warehouse::{SqliteWarehouseSink, WarehouseRow, WarehouseSink};

use thiserror::Error;

/// Sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event payload failed validation: {0}")]
    InvalidEvent(String),

    #[error("Invalid table or column name: {0}")]
    InvalidName(String),
}
