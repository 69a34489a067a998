use crate::error::PipelineError;
use crate::pipeline::reader::DispatchConfig;
use crate::pipeline::store::DEFAULT_TOLERANCE_SECS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Settings for a processing run. Fixed for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames skipped between samples; the sample stride is `skip_frames + 1`
    pub skip_frames: usize,
    /// Labels the detector should report. Empty means all labels.
    pub active_classes: BTreeSet<String>,
    /// Pause between decode submissions
    pub frame_delay_ms: u64,
    /// Frames allowed between decode submission and finished bookkeeping
    pub max_in_flight: usize,
    /// Give up on a frame whose detection takes longer than this
    pub detect_timeout_ms: Option<u64>,
    /// Ask the playback collaborator to follow each processed timestamp
    pub sync_playback: bool,
    /// Default window for playback-position lookups
    pub match_tolerance_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            skip_frames: 0,
            active_classes: BTreeSet::new(),
            frame_delay_ms: 100,
            max_in_flight: 2,
            detect_timeout_ms: None,
            sync_playback: true,
            match_tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_in_flight == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if !self.match_tolerance_secs.is_finite() || self.match_tolerance_secs < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "match_tolerance_secs must be a non-negative number, got {}",
                self.match_tolerance_secs
            )));
        }
        if self.detect_timeout_ms == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "detect_timeout_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stride(&self) -> usize {
        self.skip_frames.saturating_add(1)
    }

    pub fn detect_timeout(&self) -> Option<Duration> {
        self.detect_timeout_ms.map(Duration::from_millis)
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            frame_delay: Duration::from_millis(self.frame_delay_ms),
            max_in_flight: self.max_in_flight,
        }
    }
}
