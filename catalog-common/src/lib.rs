//! # Catalog Common Library
//!
//! Shared code for the catalog intelligence crates:
//! - Common error type
//! - Configuration loading and validation
//! - Per-record stage timing
//! - Logging initialisation

pub mod config;
pub mod error;
pub mod logging;
pub mod timing;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use timing::{StageTimings, Stopwatch};
