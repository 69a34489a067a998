//! Frame-sampling object detection over recorded video.
//!
//! A [`controller::PipelineController`] samples every `skip_frames + 1`-th frame of a
//! [`video::VideoSource`], runs a [`detect::Detector`] on it and keeps the remapped
//! detections in a time-indexed store that playback can query while the run continues.

pub mod config;
pub mod controller;
pub mod detect;
pub mod error;
pub mod pipeline;
pub mod run_artifacts;
pub mod video;
