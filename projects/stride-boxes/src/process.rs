// One-shot processing run for the `process` command
//
// Drives the controller to completion while mirroring the observer channel onto a
// progress bar. Ctrl-C asks the pipeline to stop; whatever finished is still exported.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Instant;
use stride_boxes::controller::PipelineController;
use stride_boxes::pipeline::types::PipelineState;
use stride_boxes::run_artifacts::{write_run_artifacts, RunMetadata};
use stride_boxes::video::open_source;
use tokio::sync::oneshot;
use tracing::{info, warn};

pub async fn process_video(
    controller: &PipelineController,
    path: &Path,
    output_root: &Path,
    frame_dir_fps: f64,
) -> Result<()> {
    let source = open_source(path, frame_dir_fps)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut updates = controller.subscribe();
    let (done_tx, done_rx) = oneshot::channel();
    let start_inst = Instant::now();
    let run = controller.start(source, move |ok| {
        let _ = done_tx.send(ok);
    })?;

    let pb = ProgressBar::new(controller.stats().total_frames as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta})")?
            .progress_chars("#>-"),
    );

    let stopper = controller.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing frames in flight");
            stopper.stop();
        }
    });

    loop {
        let snapshot = updates.borrow_and_update().clone();
        pb.set_position(snapshot.stats.processed_frames as u64);
        if snapshot.state == PipelineState::Idle {
            break;
        }
        if updates.changed().await.is_err() {
            break;
        }
    }
    run.await?;
    ctrl_c.abort();
    pb.finish_and_clear();

    let succeeded = done_rx.await.unwrap_or(false);
    if !succeeded {
        anyhow::bail!("Run over {} did not complete", path.display());
    }

    let config = controller.config();
    let metadata = RunMetadata::new(path, config.skip_frames, controller.stats());
    let output_dir = write_run_artifacts(output_root, metadata, controller.results())?;

    info!(
        "Processed {} in {:.1}s, artifacts in {}",
        path.display(),
        start_inst.elapsed().as_secs_f64(),
        output_dir.display()
    );
    println!("{}", controller.performance_summary());

    Ok(())
}
