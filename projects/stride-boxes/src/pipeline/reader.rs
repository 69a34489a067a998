// Reader stage: submits planned timestamps for decoding
//
// Submissions go out in timestamp order, spaced by `frame_delay`, with at most
// `max_in_flight` frames between submission and finished bookkeeping. Decoding runs on
// the blocking pool, so several frames can decode at once and finish out of order.

use crate::error::FrameError;
use crate::video::VideoSource;
use image::RgbImage;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub frame_delay: Duration,
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub submitted: usize,
    pub cancelled: bool,
}

/// Decode one frame off the async runtime. A frame without pixels counts as a failure.
pub async fn extract_frame(
    source: Arc<dyn VideoSource>,
    timestamp: f64,
) -> Result<RgbImage, FrameError> {
    let image = tokio::task::spawn_blocking(move || source.extract_frame(timestamp))
        .await
        .map_err(|e| FrameError::decode(timestamp, format!("decode task failed: {}", e)))??;

    if image.width() == 0 || image.height() == 0 {
        return Err(FrameError::EmptyImage { timestamp });
    }
    Ok(image)
}

/// Run `on_frame` for every timestamp until done or `cancel` is raised, then wait for
/// everything already submitted.
pub async fn dispatch<F, Fut>(
    timestamps: &[f64],
    config: &DispatchConfig,
    cancel: &AtomicBool,
    mut on_frame: F,
) -> DispatchOutcome
where
    F: FnMut(f64) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let mut in_flight = JoinSet::new();
    let mut submitted = 0;
    let mut cancelled = false;

    for (i, &timestamp) in timestamps.iter().enumerate() {
        if i > 0 && !config.frame_delay.is_zero() {
            tokio::time::sleep(config.frame_delay).await;
        }
        if cancel.load(Ordering::Acquire) {
            cancelled = true;
            break;
        }

        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        // Waiting for a slot can take a while; honor a stop that arrived meanwhile
        if cancel.load(Ordering::Acquire) {
            cancelled = true;
            break;
        }

        let work = on_frame(timestamp);
        in_flight.spawn(async move {
            work.await;
            drop(permit);
        });
        submitted += 1;
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Frame task failed: {}", e);
        }
    }

    DispatchOutcome {
        submitted,
        cancelled,
    }
}
