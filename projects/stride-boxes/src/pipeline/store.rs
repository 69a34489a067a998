// Time-indexed result store
//
// Written by the run loop, read by playback-sync queries at any time. Readers take the
// read side of the lock only for one ordered-map lookup and a clone.

use crate::pipeline::types::{Detection, FrameResult};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Default window for matching a playback position to a stored frame.
pub const DEFAULT_TOLERANCE_SECS: f64 = 0.5;

/// Finite timestamp usable as an ordered map key.
#[derive(Debug, Clone, Copy)]
struct TimeKey(f64);

impl PartialEq for TimeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeKey {}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
pub struct TimedResultStore {
    frames: RwLock<BTreeMap<TimeKey, FrameResult>>,
}

impl TimedResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the result for `timestamp`.
    pub fn put(&self, timestamp: f64, detections: Vec<Detection>) {
        if !timestamp.is_finite() {
            tracing::warn!("Ignoring result with non-finite timestamp {}", timestamp);
            return;
        }
        let mut frames = self.frames.write().unwrap_or_else(PoisonError::into_inner);
        frames.insert(
            TimeKey(timestamp),
            FrameResult {
                timestamp,
                detections,
            },
        );
    }

    /// The stored frame closest to `timestamp`, if one lies within `tolerance`.
    /// Equidistant keys resolve to the earlier one.
    pub fn nearest_frame(&self, timestamp: f64, tolerance: f64) -> Option<FrameResult> {
        if !timestamp.is_finite() || tolerance.is_nan() || tolerance < 0.0 {
            return None;
        }
        let frames = self.frames.read().unwrap_or_else(PoisonError::into_inner);
        let key = TimeKey(timestamp);

        let before = frames.range(..=key).next_back();
        let after = frames.range(key..).next();

        let best = match (before, after) {
            (Some((bk, bv)), Some((ak, av))) => {
                if (timestamp - bk.0) <= (ak.0 - timestamp) {
                    (bk.0, bv)
                } else {
                    (ak.0, av)
                }
            }
            (Some((k, v)), None) | (None, Some((k, v))) => (k.0, v),
            (None, None) => return None,
        };

        if (best.0 - timestamp).abs() <= tolerance {
            Some(best.1.clone())
        } else {
            None
        }
    }

    /// Detections of the nearest stored frame, or nothing when none is within `tolerance`.
    pub fn nearest(&self, timestamp: f64, tolerance: f64) -> Vec<Detection> {
        self.nearest_frame(timestamp, tolerance)
            .map(|frame| frame.detections)
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.frames
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.frames
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored frames in timestamp order.
    pub fn frames(&self) -> Vec<FrameResult> {
        self.frames
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
