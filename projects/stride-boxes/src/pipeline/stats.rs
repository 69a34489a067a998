use crate::pipeline::types::ProcessingStats;
use std::fmt::Write;

/// Running inference latency statistics for one run.
///
/// Keeps a running sum instead of the sample history; the mean is the same mean over
/// every recorded sample.
#[derive(Debug, Clone, Default)]
pub struct StatsTracker {
    samples: usize,
    total_ms: f64,
    min_ms: Option<f64>,
    max_ms: Option<f64>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_inference(&mut self, ms: f64) {
        if !ms.is_finite() || ms < 0.0 {
            tracing::debug!("Dropping invalid inference sample {}", ms);
            return;
        }
        self.samples += 1;
        self.total_ms += ms;
        self.min_ms = Some(self.min_ms.map_or(ms, |m| m.min(ms)));
        self.max_ms = Some(self.max_ms.map_or(ms, |m| m.max(ms)));
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn average_ms(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_ms / self.samples as f64
        }
    }

    pub fn min_ms(&self) -> Option<f64> {
        self.min_ms
    }

    pub fn max_ms(&self) -> Option<f64> {
        self.max_ms
    }

    pub fn snapshot(&self, processed: usize, total: usize) -> ProcessingStats {
        let progress = if total == 0 {
            0.0
        } else {
            processed as f64 / total as f64
        };

        ProcessingStats {
            processed_frames: processed,
            total_frames: total,
            progress,
            average_inference_ms: self.average_ms(),
        }
    }

    /// Human-readable report of the last run.
    pub fn summary(&self, processed: usize, total: usize, skip_frames: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Performance summary");
        let _ = writeln!(out, "  frames processed: {} / {}", processed, total);
        let _ = writeln!(
            out,
            "  skip frames:      {} (every {} frame{})",
            skip_frames,
            skip_frames + 1,
            if skip_frames == 0 { "" } else { "s" }
        );

        match (self.min_ms, self.max_ms) {
            (Some(min), Some(max)) => {
                let _ = writeln!(out, "  inference avg:    {:.2} ms", self.average_ms());
                let _ = writeln!(out, "  inference min:    {:.2} ms", min);
                let _ = write!(out, "  inference max:    {:.2} ms", max);
            }
            _ => {
                let _ = write!(out, "  no inference samples recorded");
            }
        }
        out
    }
}
