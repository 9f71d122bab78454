//! Per-record stage timing
//!
//! Every record that passes through the pipeline owns exactly one
//! [`StageTimings`] accumulator. Stages add their elapsed wall-clock time in
//! milliseconds before the next stage starts, so the accumulator doubles as
//! the source for the cooperative per-record timeout check.
//!
//! # Stages
//!
//! ```text
//! ingest ──► enrich ──► vision ──► fuse
//!                       └── predict ──┘
//! ```
//!
//! - `predict_ms` is derived: `vision_ms + fuse_ms`
//! - `total_ms` is derived: `ingest_ms + enrich_ms + predict_ms`
//!
//! # Examples
//!
//! ```rust
//! use catalog_common::timing::StageTimings;
//!
//! let mut timings = StageTimings::default();
//! timings.ingest_ms += 2.0;
//! timings.enrich_ms += 1.0;
//! timings.vision_ms += 4.0;
//! timings.fuse_ms += 0.5;
//!
//! assert_eq!(timings.predict_ms(), 4.5);
//! assert_eq!(timings.total_ms(), 7.5);
//! ```

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::time::{Duration, Instant};

// ============================================================================
// Stage Timings
// ============================================================================

/// Elapsed milliseconds spent in each pipeline stage for one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    /// Image resolution
    pub ingest_ms: f64,
    /// Text classification and dimension parsing
    pub enrich_ms: f64,
    /// Vision producer call
    pub vision_ms: f64,
    /// Vision label mapping and fusion
    pub fuse_ms: f64,
}

impl StageTimings {
    /// Time spent in the predict stage (vision + fusion)
    pub fn predict_ms(&self) -> f64 {
        self.vision_ms + self.fuse_ms
    }

    /// Time spent across all stages
    pub fn total_ms(&self) -> f64 {
        self.ingest_ms + self.enrich_ms + self.predict_ms()
    }

    /// Sum a set of per-record timings into one summary
    pub fn summarize<'a, I>(timings: I) -> StageTimings
    where
        I: IntoIterator<Item = &'a StageTimings>,
    {
        let mut summary = StageTimings::default();
        for item in timings {
            summary += *item;
        }
        summary
    }
}

impl AddAssign for StageTimings {
    fn add_assign(&mut self, other: StageTimings) {
        self.ingest_ms += other.ingest_ms;
        self.enrich_ms += other.enrich_ms;
        self.vision_ms += other.vision_ms;
        self.fuse_ms += other.fuse_ms;
    }
}

// ============================================================================
// Stopwatch
// ============================================================================

/// Monotonic stopwatch reporting elapsed time in milliseconds
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started_at: Instant,
}

impl Stopwatch {
    /// Start a new stopwatch
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    /// Elapsed time since start
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Elapsed time since start in fractional milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        duration_to_ms(self.elapsed())
    }
}

/// Convert a duration to fractional milliseconds
pub fn duration_to_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

// ============================================================================
// Tests
// ============================================================================
