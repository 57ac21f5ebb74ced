//! `argus` — multi-source surveillance recorder.
//!
//! Discovers local capture devices, streams each one as MJPEG over
//! HTTP, and keeps a combined timelapse of every active source.

mod camera;
mod cli;
mod config;
mod server;
mod telemetry;
mod timelapse;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use video_ingest::V4l2Discovery;

use crate::{
    camera::SourceManager, cli::Cli, config::Config, server::AppState,
    timelapse::TimelapseManager,
};

const ENCODER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[actix_web::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    telemetry::init_tracing();
    telemetry::init_metrics_recorder();

    let mut config = Config::load().context("loading configuration")?;
    Cli::parse().apply(&mut config);
    config.validate().context("validating configuration")?;

    if let Err(err) = video_ingest::probe_encoder(ENCODER_PROBE_TIMEOUT) {
        warn!("encoder binary unavailable, capture will fail: {err}");
    }

    let discovery = Arc::new(V4l2Discovery::new());
    let sources = SourceManager::new(
        discovery,
        config.camera.default_settings(),
        config.camera.scan_interval,
    );
    let timelapse = Arc::new(TimelapseManager::new(
        sources.clone(),
        config.output_dir.clone(),
        config.timelapse.clone(),
    ));

    sources.start().context("starting source manager")?;
    // Timelapse is optional; the server still runs without it.
    if let Err(err) = timelapse.start() {
        warn!("timelapse not started: {err:#}");
    }

    info!("argus up at http://{}", config.server_address());
    let result = server::run(AppState {
        config,
        sources: sources.clone(),
        timelapse: timelapse.clone(),
    })
    .await;

    info!("shutting down");
    if let Err(err) = timelapse.stop() {
        warn!("timelapse shutdown failed: {err:#}");
    }
    if let Err(err) = sources.stop() {
        warn!("source shutdown failed: {err:#}");
    }

    result
}
