//! Public start/stop/configure surface wiring the detector worker and the pipeline.

use crate::config::PipelineConfig;
use crate::detect::Detector;
use crate::error::{FrameError, PipelineError};
use crate::pipeline::detection_worker::DetectorHandle;
use crate::pipeline::types::{Detection, FrameResult, PipelineSnapshot, PipelineState, ProcessingStats};
use crate::pipeline::{DetectionPipeline, PlaybackSync};
use crate::video::VideoSource;
use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owns one pipeline and its configuration. Cheap to clone.
#[derive(Clone)]
pub struct PipelineController {
    pipeline: DetectionPipeline,
    config: Arc<RwLock<PipelineConfig>>,
}

impl PipelineController {
    pub fn new(detector: Box<dyn Detector>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let handle = DetectorHandle::spawn(detector, config.max_in_flight)?;
        handle.set_active_classes(config.active_classes.clone());
        tracing::info!(
            "Pipeline ready: detector={}, input={}x{}, skip_frames={}",
            handle.name(),
            handle.input_size().width,
            handle.input_size().height,
            config.skip_frames
        );

        Ok(Self {
            pipeline: DetectionPipeline::new(handle),
            config: Arc::new(RwLock::new(config)),
        })
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the sampling stride and class filter for the next run.
    pub fn configure(
        &self,
        skip_frames: usize,
        active_classes: BTreeSet<String>,
    ) -> Result<(), PipelineError> {
        let mut next = self.config();
        next.skip_frames = skip_frames;
        next.active_classes = active_classes;
        self.update_config(next)
    }

    /// Replace the whole configuration. Rejected with `ConfigLocked` during a run.
    pub fn update_config(&self, config: PipelineConfig) -> Result<(), PipelineError> {
        config.validate()?;
        let mut current = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if self.pipeline.is_running() {
            return Err(PipelineError::ConfigLocked);
        }
        if current.active_classes != config.active_classes {
            self.pipeline
                .detector()
                .set_active_classes(config.active_classes.clone());
        }
        *current = config;
        Ok(())
    }

    /// Change the class filter. Allowed mid-run; only later detections are affected.
    pub fn set_active_classes(&self, labels: BTreeSet<String>) {
        let mut current = self.config.write().unwrap_or_else(PoisonError::into_inner);
        self.pipeline.detector().set_active_classes(labels.clone());
        current.active_classes = labels;
    }

    /// Labels the detector is currently filtering on.
    pub async fn detector_classes(&self) -> Result<BTreeSet<String>, FrameError> {
        self.pipeline.detector().active_classes().await
    }

    pub fn start<F>(
        &self,
        source: Arc<dyn VideoSource>,
        on_complete: F,
    ) -> Result<JoinHandle<()>, PipelineError>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let config = self.config();
        self.pipeline.start(source, &config, on_complete)
    }

    pub fn stop(&self) -> bool {
        self.pipeline.stop()
    }

    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn stats(&self) -> ProcessingStats {
        self.pipeline.stats()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.pipeline.subscribe()
    }

    pub fn set_playback(&self, playback: Option<Arc<dyn PlaybackSync>>) {
        self.pipeline.set_playback(playback);
    }

    /// Detections stored closest to `timestamp`. Without a tolerance the configured
    /// default applies.
    pub fn query_detections_near(&self, timestamp: f64, tolerance: Option<f64>) -> Vec<Detection> {
        let tolerance = tolerance.unwrap_or_else(|| self.config().match_tolerance_secs);
        self.pipeline.detections_near(timestamp, tolerance)
    }

    pub fn results(&self) -> Vec<FrameResult> {
        self.pipeline.results()
    }

    pub fn performance_summary(&self) -> String {
        self.pipeline.performance_summary()
    }
}
