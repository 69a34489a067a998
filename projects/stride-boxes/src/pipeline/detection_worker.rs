// Detection worker: owns the detector on a dedicated thread
//
// The detector is not safe for concurrent use, so every call is funneled through one
// bounded command channel. Callers on the async side submit a job and await a oneshot
// reply, which turns the blocking model call into a future the run loop can join. A job
// whose caller has gone away is dropped before it reaches the model.

use crate::detect::Detector;
use crate::error::FrameError;
use crate::pipeline::types::{FrameSize, RawDetection};
use anyhow::Result;
use crossbeam::channel::{self, Sender, TrySendError};
use image::RgbImage;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Poll interval while the command queue is full
const QUEUE_RETRY: Duration = Duration::from_millis(2);

/// Detector output for one frame plus the time spent inside the model
#[derive(Debug)]
pub struct InferenceOutput {
    pub detections: Vec<RawDetection>,
    pub inference_ms: f64,
}

enum DetectorCommand {
    Detect {
        image: RgbImage,
        reply: oneshot::Sender<Result<InferenceOutput, FrameError>>,
    },
    ResetTracking,
    SetActiveClasses(BTreeSet<String>),
    ActiveClasses {
        reply: oneshot::Sender<BTreeSet<String>>,
    },
}

/// Cloneable handle to the detection worker. The worker exits once every handle is dropped.
#[derive(Clone)]
pub struct DetectorHandle {
    tx: Sender<DetectorCommand>,
    input_size: FrameSize,
    name: &'static str,
}

impl DetectorHandle {
    /// Move `detector` onto its own thread, accepting at most `queue_depth` pending commands.
    pub fn spawn(detector: Box<dyn Detector>, queue_depth: usize) -> Result<Self> {
        let input_size = detector.input_size();
        let name = detector.name();
        if input_size.is_degenerate() {
            anyhow::bail!(
                "Detector {} reports an unusable input size {}x{}",
                name,
                input_size.width,
                input_size.height
            );
        }
        let (tx, rx) = channel::bounded::<DetectorCommand>(queue_depth.max(1));

        std::thread::Builder::new()
            .name(format!("detector-{}", name))
            .spawn(move || detection_worker(detector, rx))?;

        Ok(Self {
            tx,
            input_size,
            name,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn input_size(&self) -> FrameSize {
        self.input_size
    }

    /// Submit one frame and wait for its result. The timeout covers queueing as well as
    /// inference. An abandoned job is never run if the worker has not started it yet.
    pub async fn detect(
        &self,
        image: RgbImage,
        timeout: Option<Duration>,
    ) -> Result<InferenceOutput, FrameError> {
        let job = self.submit(image);
        match timeout {
            Some(limit) => tokio::time::timeout(limit, job)
                .await
                .map_err(|_| FrameError::DetectTimeout(limit))?,
            None => job.await,
        }
    }

    async fn submit(&self, image: RgbImage) -> Result<InferenceOutput, FrameError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(DetectorCommand::Detect { image, reply }).await?;
        rx.await.map_err(|_| FrameError::DetectorGone)?
    }

    /// Wait for room in the queue without blocking the runtime.
    async fn enqueue(&self, mut command: DetectorCommand) -> Result<(), FrameError> {
        loop {
            match self.tx.try_send(command) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    command = back;
                    tokio::time::sleep(QUEUE_RETRY).await;
                }
                Err(TrySendError::Disconnected(_)) => return Err(FrameError::DetectorGone),
            }
        }
    }

    pub fn reset_tracking(&self) {
        if self.tx.send(DetectorCommand::ResetTracking).is_err() {
            tracing::warn!("Detector worker gone, cannot reset tracking");
        }
    }

    pub fn set_active_classes(&self, labels: BTreeSet<String>) {
        if self
            .tx
            .send(DetectorCommand::SetActiveClasses(labels))
            .is_err()
        {
            tracing::warn!("Detector worker gone, cannot update active classes");
        }
    }

    pub async fn active_classes(&self) -> Result<BTreeSet<String>, FrameError> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(DetectorCommand::ActiveClasses { reply }).await?;
        rx.await.map_err(|_| FrameError::DetectorGone)
    }
}

fn detection_worker(
    mut detector: Box<dyn Detector>,
    rx: channel::Receiver<DetectorCommand>,
) {
    tracing::info!("Detection worker started ({})", detector.name());

    for command in rx {
        match command {
            DetectorCommand::Detect { image, reply } => {
                if reply.is_closed() {
                    tracing::debug!("Dropping detection job abandoned by its caller");
                    continue;
                }
                let start_inst = Instant::now();
                let result = detector
                    .detect(&image)
                    .map(|detections| InferenceOutput {
                        detections,
                        inference_ms: start_inst.elapsed().as_secs_f64() * 1000.0,
                    })
                    .map_err(|e| FrameError::Detect(format!("{:#}", e)));
                // Caller may have timed out during inference
                let _ = reply.send(result);
            }
            DetectorCommand::ResetTracking => detector.reset_tracking(),
            DetectorCommand::SetActiveClasses(labels) => {
                tracing::debug!("Active classes set to {:?}", labels);
                detector.set_active_classes(labels);
            }
            DetectorCommand::ActiveClasses { reply } => {
                let _ = reply.send(detector.active_classes());
            }
        }
    }

    tracing::info!("Detection worker finished gracefully");
}
