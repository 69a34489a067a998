use image::{Rgb, RgbImage};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stride_boxes::config::PipelineConfig;
use stride_boxes::controller::PipelineController;
use stride_boxes::detect::tracker::{IouTracker, Observation};
use stride_boxes::detect::Detector;
use stride_boxes::error::{FrameError, SourceError};
use stride_boxes::pipeline::geometry::Letterbox;
use stride_boxes::pipeline::types::{BBox, FrameSize, PipelineState, RawDetection};
use stride_boxes::pipeline::PlaybackSync;
use stride_boxes::video::VideoSource;
use tokio::sync::oneshot;

const NATIVE: FrameSize = FrameSize {
    width: 128,
    height: 72,
};
const MODEL: FrameSize = FrameSize {
    width: 640,
    height: 640,
};

/// Synthetic clip whose frames carry their own index in the first pixel.
struct CountingSource {
    duration: f64,
    fps: f64,
}

impl VideoSource for CountingSource {
    fn describe(&self) -> String {
        format!("counting({}s @ {}fps)", self.duration, self.fps)
    }

    fn duration(&self) -> Result<f64, SourceError> {
        Ok(self.duration)
    }

    fn nominal_frame_rate(&self) -> Result<f64, SourceError> {
        Ok(self.fps)
    }

    fn native_frame_size(&self) -> Result<FrameSize, SourceError> {
        Ok(NATIVE)
    }

    fn extract_frame(&self, timestamp: f64) -> Result<RgbImage, FrameError> {
        let index = (timestamp * self.fps).round() as u8;
        let mut image = RgbImage::new(NATIVE.width, NATIVE.height);
        image.put_pixel(0, 0, Rgb([index, 0, 0]));
        Ok(image)
    }
}

fn ball_at(index: u8) -> BBox {
    BBox::new(0.1 + index as f32 * 0.005, 0.4, 0.1, 0.2)
}

fn person_box() -> BBox {
    BBox::new(0.6, 0.2, 0.2, 0.6)
}

/// A ball drifting right for the whole clip and a person who leaves after frame 9.
/// Boxes are produced in native space and letterboxed into model space, the way a real
/// backend would see them.
struct ScriptedDetector {
    tracker: IouTracker,
    classes: BTreeSet<String>,
    letterbox: Letterbox,
    delay: Duration,
}

impl ScriptedDetector {
    fn new(delay: Duration) -> Self {
        Self {
            tracker: IouTracker::default(),
            classes: BTreeSet::new(),
            letterbox: Letterbox::new(NATIVE, MODEL).unwrap(),
            delay,
        }
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn input_size(&self) -> FrameSize {
        MODEL
    }

    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
        std::thread::sleep(self.delay);
        let index = image.get_pixel(0, 0)[0];

        let mut observations = vec![Observation {
            bbox: self.letterbox.to_model(&ball_at(index)),
            label: "ball".to_string(),
            confidence: 0.9,
        }];
        if index < 10 {
            observations.push(Observation {
                bbox: self.letterbox.to_model(&person_box()),
                label: "person".to_string(),
                confidence: 0.8,
            });
        }
        observations.retain(|o| self.classes.is_empty() || self.classes.contains(&o.label));

        Ok(self.tracker.update(observations))
    }

    fn reset_tracking(&mut self) {
        self.tracker.reset();
    }

    fn set_active_classes(&mut self, labels: BTreeSet<String>) {
        self.classes = labels;
    }

    fn active_classes(&self) -> BTreeSet<String> {
        self.classes.clone()
    }
}

#[derive(Default)]
struct RecordingPlayback {
    seeks: Mutex<Vec<f64>>,
}

impl PlaybackSync for RecordingPlayback {
    fn seek(&self, timestamp: f64) {
        self.seeks.lock().unwrap().push(timestamp);
    }
}

fn controller(config: PipelineConfig, delay: Duration) -> PipelineController {
    PipelineController::new(Box::new(ScriptedDetector::new(delay)), config).unwrap()
}

fn sequential(skip_frames: usize) -> PipelineConfig {
    PipelineConfig {
        skip_frames,
        frame_delay_ms: 0,
        max_in_flight: 1,
        ..Default::default()
    }
}

async fn run_to_end(controller: &PipelineController, source: CountingSource) -> bool {
    let (tx, rx) = oneshot::channel();
    controller
        .start(Arc::new(source), move |ok| {
            let _ = tx.send(ok);
        })
        .unwrap()
        .await
        .unwrap();
    rx.await.unwrap()
}

fn close(a: &BBox, b: &BBox) -> bool {
    (a.x - b.x).abs() < 1e-4
        && (a.y - b.y).abs() < 1e-4
        && (a.w - b.w).abs() < 1e-4
        && (a.h - b.h).abs() < 1e-4
}

#[tokio::test]
async fn full_run_tracks_objects_and_remaps_to_native() {
    let controller = controller(sequential(1), Duration::ZERO);
    let playback = Arc::new(RecordingPlayback::default());
    controller.set_playback(Some(playback.clone()));

    let ok = run_to_end(
        &controller,
        CountingSource {
            duration: 3.0,
            fps: 10.0,
        },
    )
    .await;

    assert!(ok);
    assert_eq!(controller.state(), PipelineState::Idle);
    let stats = controller.stats();
    assert_eq!(stats.total_frames, 15);
    assert_eq!(stats.processed_frames, 15);
    assert_eq!(controller.results().len(), 15);
    assert_eq!(playback.seeks.lock().unwrap().len(), 15);

    // Both objects are live at the start
    let first = controller.query_detections_near(0.0, Some(0.01));
    assert_eq!(first.len(), 2);
    let ball = first.iter().find(|d| d.label == "ball").unwrap();
    assert!(close(&ball.bbox, &ball_at(0)));
    assert!(ball.track.is_active());
    let ball_id = ball.track.id;

    // Frame 10: the person has just left and is only remembered
    let at_ten = controller.query_detections_near(1.0, Some(0.01));
    let person = at_ten.iter().find(|d| d.label == "person").unwrap();
    assert!(!person.track.is_active());
    assert!(close(&person.bbox, &person_box()));
    let ball = at_ten.iter().find(|d| d.label == "ball").unwrap();
    assert_eq!(ball.track.id, ball_id);
    assert!(close(&ball.bbox, &ball_at(10)));

    // Frame 20: forgotten
    let at_twenty = controller.query_detections_near(2.0, Some(0.01));
    assert_eq!(at_twenty.len(), 1);
    assert_eq!(at_twenty[0].label, "ball");
}

#[tokio::test]
async fn class_filter_and_restart_reset_tracking() {
    let controller = controller(sequential(4), Duration::ZERO);
    controller.set_active_classes(["person".to_string()].into_iter().collect());

    assert!(
        run_to_end(
            &controller,
            CountingSource {
                duration: 1.0,
                fps: 10.0,
            }
        )
        .await
    );
    let frames = controller.results();
    assert_eq!(frames.len(), 2);
    assert!(frames
        .iter()
        .flat_map(|f| f.detections.iter())
        .all(|d| d.label == "person"));

    controller.configure(4, BTreeSet::new()).unwrap();
    assert!(
        run_to_end(
            &controller,
            CountingSource {
                duration: 1.0,
                fps: 10.0,
            }
        )
        .await
    );
    let first = controller.query_detections_near(0.0, Some(0.01));
    assert_eq!(first.len(), 2);
    // Ids start over on every run
    let mut ids: Vec<u64> = first.iter().map(|d| d.track.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn stop_mid_run_keeps_finished_frames() {
    let config = PipelineConfig {
        skip_frames: 9,
        frame_delay_ms: 10,
        max_in_flight: 2,
        ..Default::default()
    };
    let controller = controller(config, Duration::from_millis(2));
    let mut updates = controller.subscribe();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();

    let run = controller
        .start(
            Arc::new(CountingSource {
                duration: 10.0,
                fps: 30.0,
            }),
            move |ok| recorded.lock().unwrap().push(ok),
        )
        .unwrap();
    assert_eq!(controller.stats().total_frames, 30);

    while updates.borrow_and_update().stats.processed_frames < 5 {
        updates.changed().await.unwrap();
    }
    assert!(controller.stop());
    run.await.unwrap();

    assert_eq!(*calls.lock().unwrap(), vec![true]);
    let stats = controller.stats();
    let published = updates.borrow().clone();
    assert_eq!(published.state, PipelineState::Idle);
    assert_eq!(published.stats.progress, 1.0);
    assert_eq!(stats.progress, 1.0);
    assert!(stats.processed_frames <= 30);
    assert_eq!(controller.results().len(), stats.processed_frames);
}

#[tokio::test]
async fn playback_sync_can_be_disabled() {
    let config = PipelineConfig {
        sync_playback: false,
        ..sequential(0)
    };
    let controller = controller(config, Duration::ZERO);
    let playback = Arc::new(RecordingPlayback::default());
    controller.set_playback(Some(playback.clone()));

    assert!(
        run_to_end(
            &controller,
            CountingSource {
                duration: 0.5,
                fps: 10.0,
            }
        )
        .await
    );
    assert_eq!(controller.results().len(), 5);
    assert!(playback.seeks.lock().unwrap().is_empty());
}
