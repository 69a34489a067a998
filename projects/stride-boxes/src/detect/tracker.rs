use crate::pipeline::types::{BBox, RawDetection, Track, TrackColor, ACTIVE_OPACITY};

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    /// Minimum IoU for a detection to continue an existing track
    pub iou_threshold: f32,
    /// Frames a lost track is still reported as a memory detection
    pub memory_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            memory_frames: 5,
        }
    }
}

/// A detection before identity has been assigned
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub bbox: BBox,
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
struct TrackState {
    id: u64,
    color: TrackColor,
    bbox: BBox,
    label: String,
    confidence: f32,
    misses: u32,
}

impl TrackState {
    fn opacity(&self, memory_frames: u32) -> f32 {
        if self.misses == 0 {
            1.0
        } else {
            let faded = (self.misses - 1) as f32 / memory_frames.max(1) as f32;
            ACTIVE_OPACITY * (1.0 - faded)
        }
    }

    fn to_raw(&self, memory_frames: u32) -> RawDetection {
        RawDetection {
            bbox: self.bbox,
            label: self.label.clone(),
            confidence: self.confidence,
            track: Track {
                id: self.id,
                color: self.color,
                opacity: self.opacity(memory_frames),
            },
        }
    }
}

/// Greedy IoU tracker.
///
/// Matched tracks are reported fully opaque. A track that goes unmatched is kept as a
/// fading memory detection (opacity at or below 0.5) for `memory_frames` frames and is
/// then dropped.
#[derive(Debug)]
pub struct IouTracker {
    config: TrackerConfig,
    tracks: Vec<TrackState>,
    next_id: u64,
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn update(&mut self, observations: Vec<Observation>) -> Vec<RawDetection> {
        let mut candidates = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (oi, obs) in observations.iter().enumerate() {
                if track.label != obs.label {
                    continue;
                }
                let iou = track.bbox.iou(&obs.bbox);
                if iou >= self.config.iou_threshold {
                    candidates.push((ti, oi, iou));
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });

        let mut track_matched = vec![false; self.tracks.len()];
        let mut obs_track: Vec<Option<usize>> = vec![None; observations.len()];
        for (ti, oi, _) in candidates {
            if track_matched[ti] || obs_track[oi].is_some() {
                continue;
            }
            track_matched[ti] = true;
            obs_track[oi] = Some(ti);
        }

        for (ti, track) in self.tracks.iter_mut().enumerate() {
            if !track_matched[ti] {
                track.misses += 1;
            }
        }

        let mut active_indices = Vec::with_capacity(observations.len());
        for (oi, obs) in observations.into_iter().enumerate() {
            match obs_track[oi] {
                Some(ti) => {
                    let track = &mut self.tracks[ti];
                    track.bbox = obs.bbox;
                    track.confidence = obs.confidence;
                    track.misses = 0;
                    active_indices.push(ti);
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(TrackState {
                        id,
                        color: palette_color(id),
                        bbox: obs.bbox,
                        label: obs.label,
                        confidence: obs.confidence,
                        misses: 0,
                    });
                    active_indices.push(self.tracks.len() - 1);
                }
            }
        }

        let memory_frames = self.config.memory_frames;
        let mut out: Vec<RawDetection> = active_indices
            .iter()
            .map(|&ti| self.tracks[ti].to_raw(memory_frames))
            .collect();

        let mut remembered: Vec<&TrackState> = self
            .tracks
            .iter()
            .filter(|t| t.misses > 0 && t.misses <= memory_frames)
            .collect();
        remembered.sort_by_key(|t| t.id);
        out.extend(remembered.into_iter().map(|t| t.to_raw(memory_frames)));

        self.tracks.retain(|t| t.misses <= memory_frames);
        out
    }
}

/// Stable, well-spread colour for a track id (golden-ratio hue walk).
pub fn palette_color(id: u64) -> TrackColor {
    let hue = (id as f64 * 0.618_033_988_749_895).fract();
    hsv_to_rgb(hue, 0.65, 0.95)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> TrackColor {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    let (r, g, b) = match sector as i64 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };

    TrackColor {
        r: (r * 255.0).round() as u8,
        g: (g * 255.0).round() as u8,
        b: (b * 255.0).round() as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(x: f32, label: &str) -> Observation {
        Observation {
            bbox: BBox::new(x, 0.2, 0.2, 0.2),
            label: label.to_string(),
            confidence: 0.8,
        }
    }

    #[test]
    fn test_overlapping_detection_keeps_identity() {
        let mut tracker = IouTracker::default();
        let first = tracker.update(vec![obs(0.10, "person")]);
        let second = tracker.update(vec![obs(0.12, "person")]);

        assert_eq!(first[0].track.id, 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].track.id, 1);
        assert_eq!(second[0].track.color, first[0].track.color);
        assert!(second[0].track.is_active());
    }

    #[test]
    fn test_label_change_starts_new_track() {
        let mut tracker = IouTracker::default();
        tracker.update(vec![obs(0.1, "person")]);
        let out = tracker.update(vec![obs(0.1, "dog")]);

        let dog = out.iter().find(|d| d.label == "dog").unwrap();
        let person = out.iter().find(|d| d.label == "person").unwrap();
        assert_eq!(dog.track.id, 2);
        assert!(dog.track.is_active());
        assert!(!person.track.is_active());
    }

    #[test]
    fn test_lost_track_fades_then_disappears() {
        let config = TrackerConfig {
            iou_threshold: 0.3,
            memory_frames: 3,
        };
        let mut tracker = IouTracker::new(config);
        tracker.update(vec![obs(0.1, "car")]);

        let mut opacities = Vec::new();
        for _ in 0..3 {
            let out = tracker.update(vec![]);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].track.id, 1);
            opacities.push(out[0].track.opacity);
        }
        assert!((opacities[0] - 0.5).abs() < 1e-6);
        assert!(opacities.windows(2).all(|w| w[1] < w[0]));
        assert!(opacities.iter().all(|o| *o > 0.0 && *o <= 0.5));

        assert!(tracker.update(vec![]).is_empty());
        assert_eq!(tracker.live_tracks(), 0);
    }

    #[test]
    fn test_remembered_track_is_recovered() {
        let mut tracker = IouTracker::default();
        tracker.update(vec![obs(0.5, "person")]);
        tracker.update(vec![]);
        let out = tracker.update(vec![obs(0.52, "person")]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].track.id, 1);
        assert_eq!(out[0].track.opacity, 1.0);
    }

    #[test]
    fn test_reset_restarts_ids() {
        let mut tracker = IouTracker::default();
        tracker.update(vec![obs(0.1, "a"), obs(0.6, "a")]);
        tracker.reset();
        let out = tracker.update(vec![obs(0.1, "a")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].track.id, 1);
    }

    #[test]
    fn test_palette_is_deterministic_and_varied() {
        assert_eq!(palette_color(7), palette_color(7));
        assert_ne!(palette_color(1), palette_color(2));
    }
}
