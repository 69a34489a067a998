#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_reader;
pub mod frame_dir;

use crate::error::{FrameError, SourceError};
use crate::pipeline::types::FrameSize;
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "mkv", "avi", "webm"];

/// Metadata the sample plan is computed from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VideoInfo {
    pub duration_secs: f64,
    pub frame_rate: f64,
    pub native_size: FrameSize,
}

/// Random-access still-frame extraction from one video.
///
/// `extract_frame` is called from blocking worker threads, possibly several at once.
pub trait VideoSource: Send + Sync {
    /// Short label for logs.
    fn describe(&self) -> String;

    fn duration(&self) -> Result<f64, SourceError>;

    fn nominal_frame_rate(&self) -> Result<f64, SourceError>;

    fn native_frame_size(&self) -> Result<FrameSize, SourceError>;

    fn extract_frame(&self, timestamp: f64) -> Result<RgbImage, FrameError>;

    /// Read and validate everything needed to plan a run.
    fn probe(&self) -> Result<VideoInfo, SourceError> {
        let duration_secs = self.duration()?;
        let frame_rate = self.nominal_frame_rate()?;
        let native_size = self.native_frame_size()?;

        if !duration_secs.is_finite() || duration_secs < 0.0 {
            return Err(SourceError::UnreadableMetadata(format!(
                "duration {} of {}",
                duration_secs,
                self.describe()
            )));
        }
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(SourceError::UnreadableMetadata(format!(
                "frame rate {} of {}",
                frame_rate,
                self.describe()
            )));
        }
        if native_size.is_degenerate() {
            return Err(SourceError::UnreadableMetadata(format!(
                "frame size {}x{} of {}",
                native_size.width,
                native_size.height,
                self.describe()
            )));
        }

        Ok(VideoInfo {
            duration_secs,
            frame_rate,
            native_size,
        })
    }
}

/// Open `path` as a video source: directories are read as image sequences, files with
/// the FFmpeg backend when it is compiled in.
pub fn open_source(path: &Path, frame_dir_fps: f64) -> Result<Arc<dyn VideoSource>, SourceError> {
    if !path.exists() {
        return Err(SourceError::NoVideoTrack(path.display().to_string()));
    }

    if path.is_dir() {
        return Ok(Arc::new(frame_dir::FrameDirSource::open(
            path,
            frame_dir_fps,
        )?));
    }

    open_file(path)
}

/// Everything under `root` that `open_source` can take: video files and directories
/// holding image frames.
pub fn list_videos(root: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            if e.file_type().is_dir() {
                contains_frames(e.path())
            } else {
                e.path()
                    .extension()
                    .and_then(|s| s.to_str())
                    .map(|s| VIDEO_EXTENSIONS.contains(&s.to_lowercase().as_str()))
                    .unwrap_or(false)
            }
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    found.sort();
    found
}

fn contains_frames(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| frame_dir::is_frame_image(&e.path()))
        })
        .unwrap_or(false)
}

#[cfg(feature = "ffmpeg")]
fn open_file(path: &Path) -> Result<Arc<dyn VideoSource>, SourceError> {
    Ok(Arc::new(ffmpeg_reader::FfmpegSource::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_file(path: &Path) -> Result<Arc<dyn VideoSource>, SourceError> {
    Err(SourceError::Unsupported(format!(
        "{} is a file but this build has no video decoder (enable the `ffmpeg` feature)",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenMetadata {
        fps: f64,
        size: FrameSize,
    }

    impl VideoSource for BrokenMetadata {
        fn describe(&self) -> String {
            "broken".to_string()
        }
        fn duration(&self) -> Result<f64, SourceError> {
            Ok(10.0)
        }
        fn nominal_frame_rate(&self) -> Result<f64, SourceError> {
            Ok(self.fps)
        }
        fn native_frame_size(&self) -> Result<FrameSize, SourceError> {
            Ok(self.size)
        }
        fn extract_frame(&self, timestamp: f64) -> Result<RgbImage, FrameError> {
            Err(FrameError::decode(timestamp, "never"))
        }
    }

    #[test]
    fn test_unusable_metadata_is_rejected() {
        let zero_fps = BrokenMetadata {
            fps: 0.0,
            size: FrameSize::new(640, 480),
        };
        assert!(matches!(
            zero_fps.probe(),
            Err(SourceError::UnreadableMetadata(_))
        ));

        let zero_size = BrokenMetadata {
            fps: 30.0,
            size: FrameSize::new(0, 480),
        };
        assert!(matches!(
            zero_size.probe(),
            Err(SourceError::UnreadableMetadata(_))
        ));

        let fine = BrokenMetadata {
            fps: 30.0,
            size: FrameSize::new(640, 480),
        };
        assert_eq!(fine.probe().unwrap().frame_rate, 30.0);
    }

    #[test]
    fn test_list_videos_finds_files_and_frame_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("match.MP4"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        let frames = dir.path().join("drone");
        std::fs::create_dir(&frames).unwrap();
        RgbImage::new(4, 4).save(frames.join("0001.png")).unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let found = list_videos(dir.path());
        assert_eq!(found, vec![frames, dir.path().join("match.MP4")]);
    }

    #[test]
    fn test_open_missing_path() {
        let result = open_source(Path::new("/definitely/not/here.mp4"), 30.0);
        assert!(matches!(result, Err(SourceError::NoVideoTrack(_))));
    }
}
