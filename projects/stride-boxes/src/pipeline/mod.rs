// Frame-sampling detection pipeline

pub mod detection_worker;
pub mod geometry;
pub mod orchestrator;
pub mod plan;
pub mod reader;
pub mod stats;
pub mod store;
pub mod types;

pub use orchestrator::{DetectionPipeline, PlaybackSync};
