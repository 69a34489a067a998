use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;
use stride_boxes::config::PipelineConfig;
use stride_boxes::controller::PipelineController;
use stride_boxes::detect::build_detector;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run detection over one video and write its artifacts
    Process {
        /// Video file or directory of frames
        path: PathBuf,

        /// Root directory for output artifacts
        #[arg(long, env = "STRIDE_BOXES_OUTPUT_ROOT", default_value = "output")]
        output_root: PathBuf,
    },
    /// Serve the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to bind to
        #[arg(long, default_value_t = 12206)]
        port: u16,

        /// Root directory for video files
        #[arg(long, env = "STRIDE_BOXES_VIDEO_ROOT")]
        video_root: PathBuf,

        /// Root directory for output artifacts
        #[arg(long, env = "STRIDE_BOXES_OUTPUT_ROOT", default_value = "output")]
        output_root: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Detector model file
    #[arg(long, global = true, env = "STRIDE_BOXES_MODEL", default_value = "rtdetr.onnx")]
    pub model: String,

    /// Minimum detection confidence
    #[arg(long, global = true, env = "STRIDE_BOXES_MIN_CONFIDENCE", default_value_t = 0.35)]
    pub min_confidence: f32,

    /// JSON pipeline config; flags below override its values
    #[arg(long, global = true, env = "STRIDE_BOXES_CONFIG")]
    pub config: Option<PathBuf>,

    /// Frames skipped between samples
    #[arg(long, global = true, env = "STRIDE_BOXES_SKIP_FRAMES")]
    pub skip_frames: Option<usize>,

    /// Comma-separated labels to keep (default: all)
    #[arg(long, global = true, value_delimiter = ',')]
    pub classes: Option<Vec<String>>,

    /// Pause between decode submissions
    #[arg(long, global = true)]
    pub frame_delay_ms: Option<u64>,

    /// Skip a frame whose detection takes longer than this
    #[arg(long, global = true)]
    pub detect_timeout_ms: Option<u64>,

    /// Playback rate assumed for directories of frames
    #[arg(long, global = true, env = "STRIDE_BOXES_FRAME_DIR_FPS", default_value_t = 30.0)]
    pub frame_dir_fps: f64,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl PipelineArgs {
    pub fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(skip_frames) = self.skip_frames {
            config.skip_frames = skip_frames;
        }
        if let Some(classes) = &self.classes {
            config.active_classes = classes
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<BTreeSet<_>>();
        }
        if let Some(delay) = self.frame_delay_ms {
            config.frame_delay_ms = delay;
        }
        if self.detect_timeout_ms.is_some() {
            config.detect_timeout_ms = self.detect_timeout_ms;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn build_controller(&self) -> Result<PipelineController> {
        let config = self.load_config()?;
        let detector = build_detector(&self.model, self.min_confidence)?;
        PipelineController::new(detector, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "skip_frames": 2, "frame_delay_ms": 50 }"#).unwrap();

        let args = Args::try_parse_from([
            "stride-boxes",
            "--config",
            path.to_str().unwrap(),
            "--skip-frames",
            "9",
            "--classes",
            "person, car",
            "process",
            "clip.mp4",
        ])
        .unwrap();

        let config = args.pipeline.load_config().unwrap();
        assert_eq!(config.skip_frames, 9);
        assert_eq!(config.frame_delay_ms, 50);
        assert_eq!(config.active_classes.len(), 2);
        assert!(config.active_classes.contains("car"));
        assert!(matches!(args.command, Command::Process { .. }));
    }

    #[test]
    fn test_serve_requires_video_root() {
        std::env::remove_var("STRIDE_BOXES_VIDEO_ROOT");
        assert!(Args::try_parse_from(["stride-boxes", "serve"]).is_err());
    }
}
