use crate::web::api::{
    create_run_handler, detections_handler, get_config, get_videos, playhead_handler,
    progress_handler, put_classes, put_config, stop_handler, summary_handler, AppState,
    SharedPlayhead,
};
use anyhow::Result;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use stride_boxes::controller::PipelineController;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/videos", get(get_videos))
        .route("/api/runs", post(create_run_handler))
        .route("/api/stop", post(stop_handler))
        .route("/api/progress", get(progress_handler))
        .route("/api/detections", get(detections_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/classes", put(put_classes))
        .route("/api/playhead", get(playhead_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(
    host: IpAddr,
    port: u16,
    controller: PipelineController,
    video_root: PathBuf,
    output_root: PathBuf,
    frame_dir_fps: f64,
) -> Result<()> {
    let mut current_port = port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port.wrapping_add(1);
                if current_port == 0 {
                    return Err(anyhow::anyhow!("No available ports found"));
                }
            }
        }
    };

    let playhead = Arc::new(SharedPlayhead::default());
    controller.set_playback(Some(playhead.clone()));
    let state = Arc::new(AppState {
        controller,
        video_root,
        output_root,
        frame_dir_fps,
        playhead,
    });

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Stride Boxes server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, router(state)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use image::RgbImage;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use stride_boxes::config::PipelineConfig;
    use stride_boxes::detect::Detector;
    use stride_boxes::pipeline::types::{
        BBox, FrameSize, PipelineState, RawDetection, Track, TrackColor,
    };
    use tower::ServiceExt;

    struct CenterDetector {
        classes: BTreeSet<String>,
    }

    impl Detector for CenterDetector {
        fn name(&self) -> &'static str {
            "center"
        }
        fn input_size(&self) -> FrameSize {
            FrameSize::square(640)
        }
        fn detect(&mut self, _image: &RgbImage) -> anyhow::Result<Vec<RawDetection>> {
            Ok(vec![RawDetection {
                bbox: BBox::new(0.4, 0.4, 0.2, 0.2),
                label: "person".to_string(),
                confidence: 0.7,
                track: Track {
                    id: 1,
                    color: TrackColor { r: 0, g: 0, b: 0 },
                    opacity: 1.0,
                },
            }])
        }
        fn reset_tracking(&mut self) {}
        fn set_active_classes(&mut self, labels: BTreeSet<String>) {
            self.classes = labels;
        }
        fn active_classes(&self) -> BTreeSet<String> {
            self.classes.clone()
        }
    }

    fn app(video_root: PathBuf, output_root: PathBuf) -> (Router, Arc<AppState>) {
        let config = PipelineConfig {
            frame_delay_ms: 0,
            max_in_flight: 1,
            ..Default::default()
        };
        let controller = PipelineController::new(
            Box::new(CenterDetector {
                classes: BTreeSet::new(),
            }),
            config,
        )
        .unwrap();
        let playhead = Arc::new(SharedPlayhead::default());
        controller.set_playback(Some(playhead.clone()));
        let state = Arc::new(AppState {
            controller,
            video_root,
            output_root,
            frame_dir_fps: 10.0,
            playhead,
        });
        (router(state.clone()), state)
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_over_frame_directory() {
        let videos = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let frames = videos.path().join("clip");
        std::fs::create_dir(&frames).unwrap();
        for i in 0..5 {
            RgbImage::new(32, 18)
                .save(frames.join(format!("{:04}.png", i)))
                .unwrap();
        }
        let (app, state) = app(videos.path().to_path_buf(), output.path().to_path_buf());

        let response = app
            .clone()
            .oneshot(Request::get("/api/videos").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("\"path\":\"clip\""));

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/runs", r#"{"video_path":"clip"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let mut updates = state.controller.subscribe();
        while updates.borrow_and_update().state != PipelineState::Idle {
            tokio::time::timeout(Duration::from_secs(5), updates.changed())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(state.controller.stats().processed_frames, 5);
        assert_eq!(state.playhead.position(), Some(0.4));

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/detections?t=0.21&tolerance=0.05")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("person"));

        let response = app
            .clone()
            .oneshot(Request::get("/api/playhead").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_string(response).await, r#"{"timestamp":0.4}"#);

        let response = app
            .oneshot(Request::get("/api/summary").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(body_string(response).await.contains("5 / 5"));
    }

    #[tokio::test]
    async fn test_unknown_video_is_not_found() {
        let videos = tempfile::tempdir().unwrap();
        let (app, _) = app(videos.path().to_path_buf(), videos.path().to_path_buf());

        let response = app
            .oneshot(json_request("POST", "/api/runs", r#"{"video_path":"nope.mp4"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_detections_require_timestamp() {
        let videos = tempfile::tempdir().unwrap();
        let (app, _) = app(videos.path().to_path_buf(), videos.path().to_path_buf());

        let response = app
            .clone()
            .oneshot(Request::get("/api/detections").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::get("/api/detections?t=1.0&tolerance=-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_config_and_classes_round_trip() {
        let videos = tempfile::tempdir().unwrap();
        let (app, state) = app(videos.path().to_path_buf(), videos.path().to_path_buf());

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/api/config", r#"{"skip_frames":4}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/api/config", r#"{"max_in_flight":0}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/api/classes", r#"["dog"]"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::get("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_string(response).await;
        assert!(body.contains("\"skip_frames\":4"));
        assert!(body.contains("\"dog\""));
        assert_eq!(
            state.controller.detector_classes().await.unwrap(),
            ["dog".to_string()].into_iter().collect()
        );
    }
}
