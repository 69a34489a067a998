// Pipeline orchestrator: manages the processing lifecycle
//
// Idle -> Running -> (Completing | Cancelling) -> Idle. A run samples timestamps,
// decodes them through the reader stage, hands each frame to the detection worker and
// folds the result into the store, the stats and the observer channel.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::detection_worker::DetectorHandle;
use crate::pipeline::geometry::remap;
use crate::pipeline::plan::SamplePlan;
use crate::pipeline::reader::{self, DispatchConfig};
use crate::pipeline::stats::StatsTracker;
use crate::pipeline::store::TimedResultStore;
use crate::pipeline::types::{
    Detection, FrameResult, FrameSize, PipelineSnapshot, PipelineState, ProcessingStats,
};
use crate::video::VideoSource;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Playback collaborator kept in step with the frames being analyzed.
pub trait PlaybackSync: Send + Sync {
    /// Best effort; failures are the implementation's business.
    fn seek(&self, timestamp: f64);
}

/// Per-run counters, only touched under the bookkeeping lock
#[derive(Debug, Default)]
struct Bookkeeping {
    processed: usize,
    total: usize,
    skip_frames: usize,
    stats: StatsTracker,
    /// Set once a cancelled run has drained; progress then reads as complete
    forced_complete: bool,
}

impl Bookkeeping {
    fn snapshot(&self) -> ProcessingStats {
        let mut stats = self.stats.snapshot(self.processed, self.total);
        if self.forced_complete {
            stats.progress = 1.0;
        }
        stats
    }
}

struct Shared {
    state: AtomicU8,
    /// Cancel flag of the current run. Replaced on every start, under the same lock
    /// that guards the Idle -> Running transition.
    cancel: Mutex<Arc<AtomicBool>>,
    store: TimedResultStore,
    book: Mutex<Bookkeeping>,
    updates: watch::Sender<PipelineSnapshot>,
    detector: DetectorHandle,
    playback: RwLock<Option<Arc<dyn PlaybackSync>>>,
}

impl Shared {
    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state.as_u8(), Ordering::Release);
        self.updates.send_modify(|snapshot| snapshot.state = state);
    }

    fn cancel_token(&self) -> MutexGuard<'_, Arc<AtomicBool>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn book(&self) -> MutexGuard<'_, Bookkeeping> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn playback(&self) -> Option<Arc<dyn PlaybackSync>> {
        self.playback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store, count and publish one finished frame as a single step.
    fn record_frame(&self, timestamp: f64, detections: Vec<Detection>, inference_ms: f64) {
        let mut book = self.book();
        self.store.put(timestamp, detections.clone());
        book.processed += 1;
        book.stats.record_inference(inference_ms);
        let stats = book.snapshot();

        self.updates.send_replace(PipelineSnapshot {
            state: self.state(),
            latest_timestamp: Some(timestamp),
            latest_detections: detections,
            stats,
        });
    }
}

/// Settings captured when a run starts
#[derive(Debug, Clone)]
struct RunSettings {
    dispatch: DispatchConfig,
    detect_timeout: Option<Duration>,
    sync_playback: bool,
}

/// Frame-sampling detection pipeline. Cheap to clone; clones share one pipeline.
#[derive(Clone)]
pub struct DetectionPipeline {
    shared: Arc<Shared>,
}

impl DetectionPipeline {
    pub fn new(detector: DetectorHandle) -> Self {
        let (updates, _) = watch::channel(PipelineSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(PipelineState::Idle.as_u8()),
                cancel: Mutex::new(Arc::new(AtomicBool::new(false))),
                store: TimedResultStore::new(),
                book: Mutex::new(Bookkeeping::default()),
                updates,
                detector,
                playback: RwLock::new(None),
            }),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() != PipelineState::Idle
    }

    pub fn detector(&self) -> &DetectorHandle {
        &self.shared.detector
    }

    pub fn set_playback(&self, playback: Option<Arc<dyn PlaybackSync>>) {
        *self
            .shared
            .playback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = playback;
    }

    /// Observer channel; every value is one consistent publication.
    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.shared.updates.subscribe()
    }

    pub fn stats(&self) -> ProcessingStats {
        self.shared.book().snapshot()
    }

    pub fn detections_near(&self, timestamp: f64, tolerance: f64) -> Vec<Detection> {
        self.shared.store.nearest(timestamp, tolerance)
    }

    pub fn frame_near(&self, timestamp: f64, tolerance: f64) -> Option<FrameResult> {
        self.shared.store.nearest_frame(timestamp, tolerance)
    }

    /// Every stored frame in timestamp order.
    pub fn results(&self) -> Vec<FrameResult> {
        self.shared.store.frames()
    }

    pub fn performance_summary(&self) -> String {
        let book = self.shared.book();
        book.stats
            .summary(book.processed, book.total, book.skip_frames)
    }

    /// Begin a run over `source`.
    ///
    /// Rejected without side effects while another run is active. A source whose
    /// metadata can't be read reports `on_complete(false)` and leaves the pipeline idle.
    /// Otherwise `on_complete` fires exactly once when the run has drained.
    pub fn start<F>(
        &self,
        source: Arc<dyn VideoSource>,
        config: &PipelineConfig,
        on_complete: F,
    ) -> Result<JoinHandle<()>, PipelineError>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;
        let shared = &self.shared;

        let mut token = shared.cancel_token();
        if shared
            .state
            .compare_exchange(
                PipelineState::Idle.as_u8(),
                PipelineState::Running.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::warn!(
                "Ignoring start for {}: a run is already in progress",
                source.describe()
            );
            return Err(PipelineError::ConcurrentStartRejected);
        }
        let cancel = Arc::new(AtomicBool::new(false));
        *token = cancel.clone();
        drop(token);

        let info = match source.probe() {
            Ok(info) => info,
            Err(e) => {
                shared
                    .state
                    .store(PipelineState::Idle.as_u8(), Ordering::Release);
                tracing::error!("Cannot start run on {}: {}", source.describe(), e);
                on_complete(false);
                return Err(e.into());
            }
        };

        let plan = SamplePlan::new(info.duration_secs, info.frame_rate, config.skip_frames);
        tracing::info!(
            "Starting run on {}: duration={:.2}s, fps={:.2}, size={}x{}, stride={}, frames={}",
            source.describe(),
            info.duration_secs,
            info.frame_rate,
            info.native_size.width,
            info.native_size.height,
            plan.stride,
            plan.len()
        );

        shared.store.clear();
        shared.detector.reset_tracking();
        let stats = {
            let mut book = shared.book();
            *book = Bookkeeping {
                processed: 0,
                total: plan.len(),
                skip_frames: config.skip_frames,
                stats: StatsTracker::new(),
                forced_complete: false,
            };
            book.snapshot()
        };
        shared.updates.send_replace(PipelineSnapshot {
            state: PipelineState::Running,
            latest_timestamp: None,
            latest_detections: Vec::new(),
            stats,
        });

        let settings = RunSettings {
            dispatch: config.dispatch(),
            detect_timeout: config.detect_timeout(),
            sync_playback: config.sync_playback,
        };

        Ok(runtime.spawn(run_loop(
            shared.clone(),
            cancel,
            source,
            plan,
            settings,
            on_complete,
        )))
    }

    /// Ask the active run to stop issuing frames. Frames already submitted still finish
    /// and are kept. Returns false when nothing is running.
    pub fn stop(&self) -> bool {
        let token = self.shared.cancel_token();
        if self.state() == PipelineState::Running {
            token.store(true, Ordering::Release);
            tracing::info!("Stop requested");
            true
        } else {
            false
        }
    }
}

async fn run_loop<F>(
    shared: Arc<Shared>,
    cancel: Arc<AtomicBool>,
    source: Arc<dyn VideoSource>,
    plan: SamplePlan,
    settings: RunSettings,
    on_complete: F,
) where
    F: FnOnce(bool) + Send + 'static,
{
    let start_inst = Instant::now();

    let outcome = reader::dispatch(
        &plan.timestamps,
        &settings.dispatch,
        &cancel,
        |timestamp| {
            let shared = shared.clone();
            let source = source.clone();
            let settings = settings.clone();
            async move { process_frame(shared, source, timestamp, settings).await }
        },
    )
    .await;

    let cancelled = outcome.cancelled || cancel.load(Ordering::Acquire);
    if cancelled {
        shared.set_state(PipelineState::Cancelling);
        let stats = {
            let mut book = shared.book();
            book.forced_complete = true;
            book.snapshot()
        };
        shared.updates.send_modify(|snapshot| snapshot.stats = stats);
        tracing::info!(
            "Run cancelled after {} of {} frames ({:.1}s)",
            stats.processed_frames,
            stats.total_frames,
            start_inst.elapsed().as_secs_f64()
        );
    } else {
        shared.set_state(PipelineState::Completing);
        let stats = shared.book().snapshot();
        shared.updates.send_modify(|snapshot| snapshot.stats = stats);
        tracing::info!(
            "Run complete: {} of {} frames in {:.1}s, avg inference {:.2} ms",
            stats.processed_frames,
            stats.total_frames,
            start_inst.elapsed().as_secs_f64(),
            stats.average_inference_ms
        );
    }

    on_complete(true);
    shared.set_state(PipelineState::Idle);
}

async fn process_frame(
    shared: Arc<Shared>,
    source: Arc<dyn VideoSource>,
    timestamp: f64,
    settings: RunSettings,
) {
    let image = match reader::extract_frame(source, timestamp).await {
        Ok(image) => image,
        Err(e) => {
            tracing::debug!("Skipping frame: {}", e);
            return;
        }
    };
    let native = FrameSize::new(image.width(), image.height());

    let output = match shared.detector.detect(image, settings.detect_timeout).await {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!("Skipping frame at {:.3}s: {}", timestamp, e);
            return;
        }
    };

    let model = shared.detector.input_size();
    let detections: Vec<Detection> = output
        .detections
        .into_iter()
        .map(|raw| Detection {
            bbox: remap(&raw.bbox, native, model),
            label: raw.label,
            confidence: raw.confidence,
            distance: None,
            track: raw.track,
        })
        .collect();

    shared.record_frame(timestamp, detections, output.inference_ms);

    if settings.sync_playback {
        if let Some(playback) = shared.playback() {
            playback.seek(timestamp);
        }
    }
}
