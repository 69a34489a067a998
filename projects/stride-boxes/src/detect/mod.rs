#[cfg(feature = "rtdetr")]
pub mod rtdetr;
pub mod tracker;

use crate::pipeline::types::{FrameSize, RawDetection};
use anyhow::Result;
use image::RgbImage;
use std::collections::BTreeSet;

/// Object detector with built-in tracking.
///
/// The detector letterboxes each frame into its square input canvas, so boxes come back
/// normalized to that canvas. Implementations are driven from a single worker thread and
/// never see concurrent calls.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    /// Fixed input canvas size (e.g. 640x640).
    fn input_size(&self) -> FrameSize;

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>>;

    /// Forget all tracks; the next detection starts ids afresh.
    fn reset_tracking(&mut self);

    /// Restrict future detections to these labels. An empty set disables filtering.
    fn set_active_classes(&mut self, labels: BTreeSet<String>);

    fn active_classes(&self) -> BTreeSet<String>;
}

/// Build the detector backend compiled into this binary.
#[cfg(feature = "rtdetr")]
pub fn build_detector(model_path: &str, min_confidence: f32) -> Result<Box<dyn Detector>> {
    Ok(Box::new(rtdetr::RtDetrDetector::new(
        model_path,
        min_confidence,
    )?))
}

#[cfg(not(feature = "rtdetr"))]
pub fn build_detector(model_path: &str, _min_confidence: f32) -> Result<Box<dyn Detector>> {
    anyhow::bail!(
        "Cannot load model '{}': built without a detector backend (enable the `rtdetr` feature)",
        model_path
    )
}
