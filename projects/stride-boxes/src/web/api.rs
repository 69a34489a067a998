use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use stride_boxes::config::PipelineConfig;
use stride_boxes::controller::PipelineController;
use stride_boxes::error::{PipelineError, SourceError};
use stride_boxes::pipeline::types::Detection;
use stride_boxes::pipeline::PlaybackSync;
use stride_boxes::run_artifacts::{write_run_artifacts, RunMetadata};
use stride_boxes::video::{list_videos, open_source};
use tokio::sync::oneshot;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

pub struct AppState {
    pub controller: PipelineController,
    pub video_root: PathBuf,
    pub output_root: PathBuf,
    pub frame_dir_fps: f64,
    pub playhead: Arc<SharedPlayhead>,
}

/// Playback target for HTTP clients: the pipeline seeks it, the player polls it.
#[derive(Default)]
pub struct SharedPlayhead {
    position: RwLock<Option<f64>>,
}

impl SharedPlayhead {
    pub fn position(&self) -> Option<f64> {
        *self.position.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PlaybackSync for SharedPlayhead {
    fn seek(&self, timestamp: f64) {
        *self.position.write().unwrap_or_else(PoisonError::into_inner) = Some(timestamp);
    }
}

type ApiError = (StatusCode, String);

fn pipeline_error(e: PipelineError) -> ApiError {
    let status = match &e {
        PipelineError::ConcurrentStartRejected | PipelineError::ConfigLocked => StatusCode::CONFLICT,
        PipelineError::SourceUnavailable(SourceError::NoVideoTrack(_)) => StatusCode::NOT_FOUND,
        PipelineError::SourceUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        PipelineError::NoRuntime => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

#[derive(Serialize)]
pub struct VideoInfo {
    pub name: String,
    pub path: String,
}

pub async fn get_videos(State(state): State<Arc<AppState>>) -> Json<Vec<VideoInfo>> {
    let info_list = list_videos(&state.video_root)
        .into_iter()
        .map(|video_path| {
            let name = video_path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();
            let path = video_path
                .strip_prefix(&state.video_root)
                .unwrap_or(&video_path)
                .to_string_lossy()
                .to_string();
            VideoInfo { name, path }
        })
        .collect();

    Json(info_list)
}

/// Resolve a client-supplied path inside `root`, refusing anything that escapes it.
fn resolve_video(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let contained = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !contained {
        return None;
    }
    let path = root.join(relative);
    path.exists().then_some(path)
}

#[derive(Deserialize)]
pub struct CreateRunRequest {
    pub video_path: String,
}

#[derive(Serialize)]
pub struct RunStarted {
    pub video_path: String,
    pub total_frames: usize,
}

pub async fn create_run_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<RunStarted>), ApiError> {
    let path = resolve_video(&state.video_root, &payload.video_path).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("no video at {}", payload.video_path),
        )
    })?;
    let source = open_source(&path, state.frame_dir_fps)
        .map_err(|e| pipeline_error(PipelineError::SourceUnavailable(e)))?;

    let (done_tx, done_rx) = oneshot::channel();
    state
        .controller
        .start(source, move |ok| {
            let _ = done_tx.send(ok);
        })
        .map_err(pipeline_error)?;

    let controller = state.controller.clone();
    let output_root = state.output_root.clone();
    tokio::spawn(async move {
        if !matches!(done_rx.await, Ok(true)) {
            return;
        }
        let metadata = RunMetadata::new(
            &path,
            controller.config().skip_frames,
            controller.stats(),
        );
        let frames = controller.results();
        let written = tokio::task::spawn_blocking(move || {
            write_run_artifacts(&output_root, metadata, frames)
        })
        .await;
        match written {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!("Failed to write run artifacts: {:#}", e),
            Err(e) => tracing::error!("Artifact task failed: {}", e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RunStarted {
            video_path: payload.video_path,
            total_frames: state.controller.stats().total_frames,
        }),
    ))
}

#[derive(Serialize)]
pub struct StopResponse {
    pub stopped: bool,
}

pub async fn stop_handler(State(state): State<Arc<AppState>>) -> Json<StopResponse> {
    Json(StopResponse {
        stopped: state.controller.stop(),
    })
}

/// Server-sent events, one per published pipeline snapshot.
pub async fn progress_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = WatchStream::new(state.controller.subscribe())
        .map(|snapshot| Event::default().event("snapshot").json_data(snapshot));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
pub struct DetectionsQuery {
    pub t: f64,
    pub tolerance: Option<f64>,
}

pub async fn detections_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DetectionsQuery>,
) -> Result<Json<Vec<Detection>>, ApiError> {
    if !query.t.is_finite() {
        return Err((StatusCode::BAD_REQUEST, "t must be a number".to_string()));
    }
    if let Some(tolerance) = query.tolerance {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err((
                StatusCode::BAD_REQUEST,
                "tolerance must be a non-negative number".to_string(),
            ));
        }
    }
    Ok(Json(
        state
            .controller
            .query_detections_near(query.t, query.tolerance),
    ))
}

pub async fn summary_handler(State(state): State<Arc<AppState>>) -> String {
    state.controller.performance_summary()
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<PipelineConfig> {
    Json(state.controller.config())
}

pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(config): Json<PipelineConfig>,
) -> Result<StatusCode, ApiError> {
    state
        .controller
        .update_config(config)
        .map_err(pipeline_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn put_classes(
    State(state): State<Arc<AppState>>,
    Json(labels): Json<BTreeSet<String>>,
) -> StatusCode {
    state.controller.set_active_classes(labels);
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
pub struct Playhead {
    pub timestamp: Option<f64>,
}

pub async fn playhead_handler(State(state): State<Arc<AppState>>) -> Json<Playhead> {
    Json(Playhead {
        timestamp: state.playhead.position(),
    })
}
