//! HTTP surface: camera APIs, MJPEG streaming, and timelapse queries.

pub mod handlers;

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware, web};
use anyhow::{Context, Result};
use tracing::info;

use crate::{camera::SourceManager, config::Config, timelapse::TimelapseManager};

/// Shared state backing HTTP handlers.
pub struct AppState {
    pub config: Config,
    pub sources: Arc<SourceManager>,
    pub timelapse: Arc<TimelapseManager>,
}

/// Register every route. Shared between the real server and tests.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health))
        .route("/metrics", web::get().to(handlers::metrics))
        .service(
            web::scope("/api")
                .route("/status", web::get().to(handlers::system_status))
                .route("/cameras", web::get().to(handlers::cameras))
                .route("/cameras/{id}/stream", web::get().to(handlers::camera_stream))
                .route("/cameras/{id}/ws", web::get().to(handlers::camera_websocket))
                .route("/timelapse/videos", web::get().to(handlers::timelapse_videos))
                .route("/timelapse/config", web::get().to(handlers::timelapse_config))
                .route("/timelapse/status", web::get().to(handlers::timelapse_status))
                .route(
                    "/timelapse/video/{filename}",
                    web::get().to(handlers::timelapse_video_file),
                ),
        )
        .default_service(web::route().to(handlers::fallback));
}

/// Run the HTTP server until shutdown (SIGINT/SIGTERM).
pub async fn run(state: AppState) -> Result<()> {
    let address = state.config.server_address();
    let data = web::Data::new(state);

    info!("HTTP server listening on {address}");
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(
                middleware::DefaultHeaders::new()
                    .add(("Access-Control-Allow-Origin", "*"))
                    .add(("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"))
                    .add(("Access-Control-Allow-Headers", "Content-Type, Authorization")),
            )
            .configure(routes)
    })
    .bind(&address)
    .with_context(|| format!("binding {address}"))?
    .run()
    .await
    .context("HTTP server error")?;
    Ok(())
}
