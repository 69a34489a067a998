use super::VideoSource;
use crate::error::{FrameError, SourceError};
use crate::pipeline::types::FrameSize;
use image::RgbImage;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub(crate) fn is_frame_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| IMAGE_EXTENSIONS.contains(&s.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// A directory of still images played back at a fixed frame rate.
///
/// Frames are ordered by file name, so `frame_000001.jpg`-style names play in order.
pub struct FrameDirSource {
    root: PathBuf,
    frames: Vec<PathBuf>,
    fps: f64,
    size: FrameSize,
}

impl FrameDirSource {
    pub fn open(root: &Path, fps: f64) -> Result<Self, SourceError> {
        let mut frames: Vec<PathBuf> = WalkDir::new(root)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_frame_image(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        frames.sort();

        let first = frames
            .first()
            .ok_or_else(|| SourceError::NoVideoTrack(root.display().to_string()))?;
        let (width, height) = image::image_dimensions(first).map_err(|e| {
            SourceError::UnreadableMetadata(format!("{}: {}", first.display(), e))
        })?;

        tracing::info!(
            "FrameDirSource: opened {}, frames={}, fps={:.2}, size={}x{}",
            root.display(),
            frames.len(),
            fps,
            width,
            height
        );

        Ok(Self {
            root: root.to_path_buf(),
            frames,
            fps,
            size: FrameSize::new(width, height),
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn index_for(&self, timestamp: f64) -> Option<usize> {
        if !timestamp.is_finite() || timestamp < 0.0 {
            return None;
        }
        // Nudge so timestamps computed as i / fps land on frame i
        let index = (timestamp * self.fps + 1e-6).floor() as usize;
        (index < self.frames.len()).then_some(index)
    }
}

impl VideoSource for FrameDirSource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn duration(&self) -> Result<f64, SourceError> {
        Ok(self.frames.len() as f64 / self.fps)
    }

    fn nominal_frame_rate(&self) -> Result<f64, SourceError> {
        Ok(self.fps)
    }

    fn native_frame_size(&self) -> Result<FrameSize, SourceError> {
        Ok(self.size)
    }

    fn extract_frame(&self, timestamp: f64) -> Result<RgbImage, FrameError> {
        let index = self
            .index_for(timestamp)
            .ok_or_else(|| FrameError::decode(timestamp, "timestamp outside of sequence"))?;
        let path = &self.frames[index];
        let image = image::open(path)
            .map_err(|e| FrameError::decode(timestamp, format!("{}: {}", path.display(), e)))?;
        Ok(image.to_rgb8())
    }
}
