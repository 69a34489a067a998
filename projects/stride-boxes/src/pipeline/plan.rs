/// Ordered timestamps chosen for processing from a source of known length and rate.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePlan {
    pub total_logical_frames: usize,
    pub stride: usize,
    pub timestamps: Vec<f64>,
}

impl SamplePlan {
    /// Every `skip_frames + 1`-th logical frame, starting at zero.
    pub fn new(duration_secs: f64, frame_rate: f64, skip_frames: usize) -> Self {
        let stride = skip_frames.saturating_add(1);

        if !(duration_secs.is_finite() && frame_rate.is_finite())
            || duration_secs <= 0.0
            || frame_rate <= 0.0
        {
            return Self {
                total_logical_frames: 0,
                stride,
                timestamps: Vec::new(),
            };
        }

        // A duration derived as count / fps must give back count
        let total_logical_frames = (duration_secs * frame_rate + 1e-6).floor() as usize;
        let frames_to_process = total_logical_frames / stride;
        let timestamps = (0..frames_to_process)
            .map(|i| (i * stride) as f64 / frame_rate)
            .collect();

        Self {
            total_logical_frames,
            stride,
            timestamps,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
