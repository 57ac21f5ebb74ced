//! Request handlers for the camera and timelapse APIs.

use std::time::Duration;

use actix_web::{
    HttpRequest, HttpResponse,
    http::Method,
    web::{self, Bytes},
};
use async_stream::stream;
use chrono::{DateTime, Local};
use crossbeam_channel::TryRecvError;
use serde::Serialize;
use tracing::error;
use video_ingest::Resolution;

use crate::{camera::Status, server::AppState, telemetry, timelapse::Video};

/// How often the multipart writer polls an idle frame channel.
const STREAM_POLL: Duration = Duration::from_millis(10);

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ServerInfo {
    host: String,
    port: u16,
}

#[derive(Serialize)]
struct SystemStatusResponse {
    status: &'static str,
    server: ServerInfo,
    cameras: usize,
}

#[derive(Serialize)]
struct CameraSettingsBody {
    fps: u32,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct CameraInfoBody {
    id: String,
    name: String,
    device: String,
    settings: CameraSettingsBody,
    status: Status,
}

#[derive(Serialize)]
struct CamerasResponse {
    cameras: Vec<CameraInfoBody>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

#[derive(Serialize)]
struct TimelapseConfigBody {
    enabled: bool,
    capture_interval: String,
    update_interval: String,
    output_format: String,
    quality: u8,
    resolution: ResolutionBody,
    max_frame_buffer: usize,
    retention_days: u32,
}

#[derive(Serialize)]
struct ResolutionBody {
    width: u32,
    height: u32,
}

impl From<Resolution> for ResolutionBody {
    fn from(resolution: Resolution) -> Self {
        Self {
            width: resolution.width,
            height: resolution.height,
        }
    }
}

#[derive(Serialize)]
struct TimelapseStatusBody {
    enabled: bool,
    active_sources: usize,
    total_videos: usize,
    storage_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_video: Option<String>,
    frame_buffer_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_update: Option<DateTime<Local>>,
}

fn error_response(
    status: actix_web::http::StatusCode,
    error: &'static str,
    message: &str,
) -> HttpResponse {
    HttpResponse::build(status).json(ErrorBody {
        error,
        message: message.to_string(),
        details: None,
    })
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse { status: "healthy" })
}

pub async fn system_status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(SystemStatusResponse {
        status: "running",
        server: ServerInfo {
            host: state.config.server.host.clone(),
            port: state.config.server.port,
        },
        cameras: state.sources.list().len(),
    })
}

/// Camera inventory, sorted by display name.
pub async fn cameras(state: web::Data<AppState>) -> HttpResponse {
    let mut cameras: Vec<CameraInfoBody> = state
        .sources
        .list()
        .into_iter()
        .map(|source| {
            let info = source.info();
            let settings = source.current_settings();
            CameraInfoBody {
                id: info.id,
                name: info.name,
                device: info.device,
                settings: CameraSettingsBody {
                    fps: settings.frame_rate,
                    width: settings.width,
                    height: settings.height,
                },
                status: source.status(),
            }
        })
        .collect();
    cameras.sort_by(|a, b| a.name.cmp(&b.name));

    HttpResponse::Ok().json(CamerasResponse { cameras })
}

/// Live MJPEG stream: one multipart part per frame, flushed as it goes.
///
/// The bounded source channel plus per-frame delivery is the whole
/// backpressure story; a slow client causes drops at the source and
/// never blocks other consumers.
pub async fn camera_stream(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let id = path.into_inner();
    let Some(source) = state.sources.get(&id) else {
        return error_response(
            actix_web::http::StatusCode::NOT_FOUND,
            "camera_not_found",
            "no camera with that id",
        );
    };
    if source.status() != Status::Active {
        return error_response(
            actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
            "camera_not_active",
            "camera is not active",
        );
    }

    let frames = source.frame_channel();
    let body = stream! {
        let mut poll = actix_web::rt::time::interval(STREAM_POLL);
        loop {
            match frames.try_recv() {
                Ok(frame) => {
                    let mut part = Vec::with_capacity(frame.len() + 64);
                    part.extend_from_slice(b"--frame\r\n");
                    part.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
                    part.extend_from_slice(&frame);
                    part.extend_from_slice(b"\r\n");
                    yield Ok::<Bytes, actix_web::Error>(Bytes::from(part));
                }
                Err(TryRecvError::Empty) => {
                    poll.tick().await;
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .insert_header(("Access-Control-Allow-Origin", "*"))
        .streaming(body)
}

pub async fn camera_websocket(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let id = path.into_inner();
    if state.sources.get(&id).is_none() {
        return error_response(
            actix_web::http::StatusCode::NOT_FOUND,
            "camera_not_found",
            "no camera with that id",
        );
    }
    HttpResponse::NotImplemented().json(ErrorBody {
        error: "not_implemented",
        message: "websocket streaming is not implemented".to_string(),
        details: Some("use the MJPEG stream endpoint instead".to_string()),
    })
}

pub async fn timelapse_videos(state: web::Data<AppState>) -> HttpResponse {
    match state.timelapse.videos() {
        Ok(videos) => HttpResponse::Ok().json(videos),
        Err(err) => {
            error!("listing timelapse videos failed: {err:#}");
            error_response(
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_server_error",
                "could not list timelapse videos",
            )
        }
    }
}

pub async fn timelapse_config(state: web::Data<AppState>) -> HttpResponse {
    let config = state.timelapse.config();
    HttpResponse::Ok().json(TimelapseConfigBody {
        enabled: config.enabled,
        capture_interval: format_duration(config.capture_interval),
        update_interval: format_duration(config.update_interval),
        output_format: config.output_format,
        quality: config.quality,
        resolution: config.resolution.into(),
        max_frame_buffer: config.max_frame_buffer,
        retention_days: config.retention_days,
    })
}

pub async fn timelapse_status(state: web::Data<AppState>) -> HttpResponse {
    let status = state.timelapse.status();
    HttpResponse::Ok().json(TimelapseStatusBody {
        enabled: status.enabled,
        active_sources: status.active_sources,
        total_videos: status.total_videos,
        storage_used: status.storage_used,
        current_video: (!status.current_video.is_empty()).then_some(status.current_video),
        frame_buffer_size: status.frame_buffer_size,
        last_update: status.last_update,
    })
}

/// Serve one finished (or in-progress) video file from the output dir.
pub async fn timelapse_video_file(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let filename = path.into_inner();
    // Only plain file names; no traversal out of the output directory.
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return error_response(
            actix_web::http::StatusCode::NOT_FOUND,
            "video_not_found",
            "no video with that name",
        );
    }

    let file_path = state.timelapse.output_dir().join(&filename);
    match std::fs::read(&file_path) {
        Ok(bytes) => HttpResponse::Ok().content_type("video/mp4").body(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => error_response(
            actix_web::http::StatusCode::NOT_FOUND,
            "video_not_found",
            "no video with that name",
        ),
        Err(err) => {
            error!("reading video {filename} failed: {err}");
            error_response(
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_server_error",
                "could not read video file",
            )
        }
    }
}

/// Prometheus metrics in text exposition format.
pub async fn metrics() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().finish(),
    }
}

/// Unmatched routes: CORS preflight gets 204, everything else 404.
pub async fn fallback(req: HttpRequest) -> HttpResponse {
    if req.method() == Method::OPTIONS {
        return HttpResponse::NoContent().finish();
    }
    error_response(
        actix_web::http::StatusCode::NOT_FOUND,
        "not_found",
        "no such endpoint",
    )
}

/// Compact `2s` / `1h` / `1h30m` rendering for config durations.
fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total == 0 {
        return "0s".to_string();
    }
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 || out.is_empty() {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::{SourceKind, SourceManager, VideoSettings},
        config::{CameraConfig, Config, ServerConfig},
        server::{AppState, routes},
        timelapse::{TimelapseConfig, TimelapseManager},
    };
    use actix_web::{App, test};
    use std::sync::Arc;
    use video_ingest::MockDiscovery;

    fn test_state(devices: &[&str]) -> (web::Data<AppState>, Arc<SourceManager>) {
        let discovery = Arc::new(MockDiscovery::new(
            devices.iter().map(|d| d.to_string()).collect(),
        ));
        let sources = SourceManager::new(
            discovery,
            VideoSettings::default(),
            Duration::from_secs(3600),
        );
        let output_dir = tempfile::tempdir().unwrap().keep();
        let timelapse = Arc::new(TimelapseManager::new(
            sources.clone(),
            output_dir.clone(),
            TimelapseConfig::default(),
        ));
        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            camera: CameraConfig::default(),
            timelapse: TimelapseConfig::default(),
            output_dir,
        };
        let state = web::Data::new(AppState {
            config,
            sources: sources.clone(),
            timelapse,
        });
        (state, sources)
    }

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(App::new().app_data($state.clone()).configure(routes)).await
        };
    }

    #[actix_web::test]
    async fn health_always_reports_healthy() {
        let (state, _) = test_state(&[]);
        let app = test_app!(state);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request())
            .await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
    }

    #[actix_web::test]
    async fn system_status_counts_registered_sources() {
        let (state, sources) = test_state(&[]);
        sources
            .add(SourceKind::UsbCamera, "/dev/video0", VideoSettings::default())
            .unwrap();
        let app = test_app!(state);

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/api/status").to_request())
                .await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["cameras"], 1);
        assert_eq!(body["server"]["port"], 8080);
    }

    #[actix_web::test]
    async fn cameras_are_sorted_by_name() {
        let (state, sources) = test_state(&["/dev/video1", "/dev/video0"]);
        sources
            .add(SourceKind::UsbCamera, "/dev/video1", VideoSettings::default())
            .unwrap();
        sources
            .add(SourceKind::UsbCamera, "/dev/video0", VideoSettings::default())
            .unwrap();
        let app = test_app!(state);

        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/api/cameras").to_request())
                .await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        let cameras = body["cameras"].as_array().unwrap();
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0]["name"], "Test Camera 0");
        assert_eq!(cameras[1]["name"], "Test Camera 1");
        assert_eq!(cameras[0]["status"], "inactive");
        assert_eq!(cameras[0]["settings"]["fps"], 15);
    }

    #[actix_web::test]
    async fn streaming_an_unknown_camera_is_a_404() {
        let (state, _) = test_state(&[]);
        let app = test_app!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/cameras/unknown/stream")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 404);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "camera_not_found");
    }

    #[actix_web::test]
    async fn streaming_an_inactive_camera_is_a_503() {
        let (state, sources) = test_state(&["/dev/video0"]);
        let source = sources
            .add(SourceKind::UsbCamera, "/dev/video0", VideoSettings::default())
            .unwrap();
        let app = test_app!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/cameras/{}/stream", source.info().id))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 503);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "camera_not_active");
    }

    #[actix_web::test]
    async fn websocket_endpoint_is_unimplemented() {
        let (state, sources) = test_state(&["/dev/video0"]);
        let source = sources
            .add(SourceKind::UsbCamera, "/dev/video0", VideoSettings::default())
            .unwrap();
        let app = test_app!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/cameras/{}/ws", source.info().id))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 501);
    }

    #[actix_web::test]
    async fn timelapse_config_renders_humanised_intervals() {
        let (state, _) = test_state(&[]);
        let app = test_app!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/timelapse/config").to_request(),
        )
        .await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["capture_interval"], "2s");
        assert_eq!(body["update_interval"], "1h");
        assert_eq!(body["quality"], 3);
        assert_eq!(body["resolution"]["width"], 1920);
    }

    #[actix_web::test]
    async fn timelapse_status_and_videos_start_empty() {
        let (state, _) = test_state(&[]);
        let app = test_app!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/timelapse/status").to_request(),
        )
        .await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["total_videos"], 0);
        assert_eq!(body["frame_buffer_size"], 0);
        assert!(body.get("current_video").is_none());

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/timelapse/videos").to_request(),
        )
        .await;
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 0);
    }

    #[actix_web::test]
    async fn video_files_resist_path_traversal() {
        let (state, _) = test_state(&[]);
        let app = test_app!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/timelapse/video/..%2Fsecrets.mp4")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 404);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/timelapse/video/missing.mp4")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 404);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "video_not_found");
    }

    #[actix_web::test]
    async fn video_files_are_served_from_the_output_directory() {
        let (state, _) = test_state(&[]);
        std::fs::write(
            state.timelapse.output_dir().join("timelapse_2026-08-02.mp4"),
            b"mp4-bytes",
        )
        .unwrap();
        let app = test_app!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/api/timelapse/video/timelapse_2026-08-02.mp4")
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "video/mp4"
        );
        let body = test::read_body(resp).await;
        assert_eq!(&body[..], b"mp4-bytes");
    }

    #[actix_web::test]
    async fn unknown_api_routes_return_json_404_and_options_returns_204() {
        let (state, _) = test_state(&[]);
        let app = test_app!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/nope").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 404);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "not_found");

        let resp = test::call_service(
            &app,
            test::TestRequest::with_uri("/api/cameras")
                .method(Method::OPTIONS)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 204);
    }

    #[::std::prelude::v1::test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(Duration::from_secs(2)), "2s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }
}
