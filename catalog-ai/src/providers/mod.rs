//! External signal producers

pub mod vision;

pub use vision::{DeterministicVisionProducer, HttpVisionProducer, VisionError, VisionProducer};
