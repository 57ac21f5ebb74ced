//! Aggregate lifecycle and status over the timelapse capture engine.

use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use tracing::info;

use crate::{
    camera::{SourceManager, Status},
    timelapse::{TimelapseCapture, TimelapseConfig, Video},
};

/// Read-only view of the timelapse subsystem for the API.
#[derive(Clone, Debug, Default)]
pub struct TimelapseStatus {
    pub enabled: bool,
    pub active_sources: usize,
    pub total_videos: usize,
    pub storage_used: u64,
    pub current_video: String,
    pub frame_buffer_size: usize,
    pub last_update: Option<DateTime<Local>>,
}

pub struct TimelapseManager {
    sources: Arc<SourceManager>,
    output_dir: PathBuf,
    config: TimelapseConfig,
    capture: RwLock<Option<Arc<TimelapseCapture>>>,
}

impl TimelapseManager {
    pub fn new(sources: Arc<SourceManager>, output_dir: PathBuf, config: TimelapseConfig) -> Self {
        Self {
            sources,
            output_dir,
            config,
            capture: RwLock::new(None),
        }
    }

    /// Start a capture run over the currently active sources.
    ///
    /// A disabled config is a silent no-op; having no active source is
    /// an error the caller may tolerate, since sources can appear later.
    pub fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("timelapse is disabled by configuration");
            return Ok(());
        }
        self.config.validate()?;

        let active: Vec<_> = self
            .sources
            .list()
            .into_iter()
            .filter(|source| source.status() == Status::Active)
            .collect();
        if active.is_empty() {
            bail!("no active video sources to capture");
        }

        let capture = Arc::new(TimelapseCapture::new(
            self.output_dir.clone(),
            self.config.clone(),
            active,
        ));
        capture.start().context("starting timelapse capture")?;

        let mut slot = self
            .capture
            .write()
            .map_err(|_| anyhow::anyhow!("timelapse manager lock poisoned"))?;
        *slot = Some(capture);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let capture = self.capture.write().ok().and_then(|mut slot| slot.take());
        if let Some(capture) = capture {
            capture.stop()?;
        }
        Ok(())
    }

    pub fn videos(&self) -> Result<Vec<Video>> {
        match self.current_capture() {
            Some(capture) => capture.videos(),
            None => Ok(Vec::new()),
        }
    }

    pub fn status(&self) -> TimelapseStatus {
        let mut status = TimelapseStatus {
            enabled: self.config.enabled,
            ..TimelapseStatus::default()
        };

        if let Some(capture) = self.current_capture() {
            if let Ok(videos) = capture.videos() {
                status.total_videos = videos.len();
                status.storage_used = videos.iter().map(|video| video.file_size).sum();
            }
            let capture_status = capture.status();
            status.current_video = capture_status.current_video;
            status.frame_buffer_size = capture_status.frame_buffer_size;
            status.last_update = capture_status.last_update;
        }

        status.active_sources = self
            .sources
            .list()
            .iter()
            .filter(|source| source.status() == Status::Active)
            .count();
        status
    }

    pub fn config(&self) -> TimelapseConfig {
        self.config.clone()
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    fn current_capture(&self) -> Option<Arc<TimelapseCapture>> {
        self.capture.read().ok().and_then(|slot| slot.clone())
    }
}
