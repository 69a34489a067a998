// Value types shared by every pipeline stage
//
// Boxes are normalized to [0, 1] relative to the frame they describe. Whether that frame
// is the detector's square input canvas or the native video frame depends on the stage:
// `RawDetection` lives in model space, `Detection` in native space.

use serde::{Deserialize, Serialize};

/// Normalized bounding box (origin top-left)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub const EMPTY: BBox = BBox {
        x: 0.0,
        y: 0.0,
        w: 0.0,
        h: 0.0,
    };

    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }

    /// Intersection over union, 0.0 when either box is empty.
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Pixel dimensions of a frame or of the detector's input canvas
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Threshold separating objects seen in this frame from remembered ones.
pub const ACTIVE_OPACITY: f32 = 0.5;

/// Tracking identity and visual decay state assigned by the tracker
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Track {
    pub id: u64,
    pub color: TrackColor,
    pub opacity: f32,
}

impl Track {
    /// True when the object was re-observed in this frame rather than remembered.
    pub fn is_active(&self) -> bool {
        self.opacity > ACTIVE_OPACITY
    }
}

/// Detection as reported by the detector, box normalized to its input canvas
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: BBox,
    pub label: String,
    pub confidence: f32,
    pub track: Track,
}

/// One recognized object in one processed frame, box normalized to the native frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub label: String,
    pub confidence: f32,
    /// Depth estimate; video input carries none.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub distance: Option<f32>,
    pub track: Track,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub timestamp: f64,
    pub detections: Vec<Detection>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessingStats {
    pub processed_frames: usize,
    pub total_frames: usize,
    pub progress: f64,
    pub average_inference_ms: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    Running,
    Completing,
    Cancelling,
}

impl PipelineState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            PipelineState::Idle => 0,
            PipelineState::Running => 1,
            PipelineState::Completing => 2,
            PipelineState::Cancelling => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Running,
            2 => PipelineState::Completing,
            3 => PipelineState::Cancelling,
            _ => PipelineState::Idle,
        }
    }
}

/// Everything an observer sees after one publication
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub latest_timestamp: Option<f64>,
    pub latest_detections: Vec<Detection>,
    pub stats: ProcessingStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_of_identical_and_disjoint_boxes() {
        let a = BBox::new(0.1, 0.1, 0.2, 0.2);
        let b = BBox::new(0.6, 0.6, 0.2, 0.2);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(BBox::EMPTY.iou(&BBox::EMPTY), 0.0);
    }

    #[test]
    fn test_track_activity_threshold() {
        let color = TrackColor { r: 0, g: 0, b: 0 };
        let seen = Track {
            id: 1,
            color,
            opacity: 0.51,
        };
        let remembered = Track {
            id: 1,
            color,
            opacity: 0.5,
        };
        assert!(seen.is_active());
        assert!(!remembered.is_active());
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            PipelineState::Idle,
            PipelineState::Running,
            PipelineState::Completing,
            PipelineState::Cancelling,
        ] {
            assert_eq!(PipelineState::from_u8(state.as_u8()), state);
        }
    }
}
