// Run artifacts persisted in a run's output directory
//
// results.json holds the run metadata plus every stored frame; detections.csv flattens
// the same data to one row per detection.

use crate::pipeline::types::{FrameResult, ProcessingStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const RESULTS_FILE: &str = "results.json";
pub const DETECTIONS_FILE: &str = "detections.csv";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunMetadata {
    pub source: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub skip_frames: usize,
    pub stats: ProcessingStats,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunResults {
    pub metadata: RunMetadata,
    pub frames: Vec<FrameResult>,
}

#[derive(Serialize, Debug)]
struct DetectionRow<'a> {
    timestamp: f64,
    label: &'a str,
    confidence: f32,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    track_id: u64,
    opacity: f32,
    active: bool,
}

impl RunMetadata {
    pub fn new(source: &Path, skip_frames: usize, stats: ProcessingStats) -> Self {
        let created_at = Utc::now();
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("run");
        Self {
            source: source.to_string_lossy().to_string(),
            run_id: format!("{}-{}", stem, created_at.format("%Y%m%d-%H%M%S")),
            created_at,
            skip_frames,
            stats,
        }
    }
}

/// Write both artifacts into `output_root/<run_id>` and return that directory.
pub fn write_run_artifacts(
    output_root: &Path,
    metadata: RunMetadata,
    frames: Vec<FrameResult>,
) -> Result<PathBuf> {
    let output_dir = output_root.join(&metadata.run_id);
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    write_detections_csv(&output_dir.join(DETECTIONS_FILE), &frames)?;

    let results = RunResults { metadata, frames };
    let content = serde_json::to_string_pretty(&results)?;
    fs::write(output_dir.join(RESULTS_FILE), content)?;

    tracing::info!(
        "Wrote {} frames of results to {}",
        results.frames.len(),
        output_dir.display()
    );
    Ok(output_dir)
}

fn write_detections_csv(path: &Path, frames: &[FrameResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    for frame in frames {
        for det in &frame.detections {
            writer.serialize(DetectionRow {
                timestamp: frame.timestamp,
                label: &det.label,
                confidence: det.confidence,
                x: det.bbox.x,
                y: det.bbox.y,
                w: det.bbox.w,
                h: det.bbox.h,
                track_id: det.track.id,
                opacity: det.track.opacity,
                active: det.track.is_active(),
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn load_run_results(output_dir: &Path) -> Result<RunResults> {
    let path = output_dir.join(RESULTS_FILE);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}
