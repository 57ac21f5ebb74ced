//! Video sources and their dynamic management.
//!
//! Every source — USB camera or screen grab — satisfies the same
//! [`VideoSource`] contract: start/stop lifecycle, a bounded live frame
//! channel for streaming consumers, and a single-shot snapshot for the
//! timelapse engine. The [`SourceManager`] owns the registry and keeps
//! it reconciled with the devices actually present.

pub mod manager;
pub mod screen;
pub mod source;
#[cfg(test)]
pub(crate) mod testing;
pub mod usb;

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use video_ingest::{CaptureError, Resolution};

pub use manager::SourceManager;
pub use screen::ScreenSource;
pub use source::{SharedVideoSource, VideoSource};
pub use usb::UsbCameraSource;

/// Operational state of a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Inactive,
    Active,
    Error,
}

/// Variant of a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    UsbCamera,
    X11Screen,
}

/// Immutable identity of a source.
#[derive(Clone, Debug)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
    pub driver: String,
    pub description: String,
    /// Device path for USB cameras, `x11:screen` for the screen grab.
    pub device: String,
}

/// What a source claims to support.
#[derive(Clone, Debug)]
pub struct Capabilities {
    pub resolutions: Vec<Resolution>,
    pub frame_rates: Vec<u32>,
    pub formats: Vec<String>,
}

/// Capture parameters applied to a source.
#[derive(Clone, Debug)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub format: String,
    pub quality: u8,
    pub properties: HashMap<String, serde_json::Value>,
}

impl VideoSettings {
    pub fn validate(&self) -> Result<(), CameraError> {
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::InvalidSettings(format!(
                "resolution {}x{} is not valid",
                self.width, self.height
            )));
        }
        if self.frame_rate == 0 {
            return Err(CameraError::InvalidSettings(
                "frame rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 15,
            format: "MJPEG".to_string(),
            quality: 3,
            properties: HashMap::new(),
        }
    }
}

/// Errors surfaced by source operations.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("source {0:?} not found")]
    NotFound(String),
    #[error("source is not active")]
    NotActive,
    #[error("no frame captured yet")]
    NoFrameYet,
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("source state lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Process-unique source id.
pub(crate) fn generate_source_id() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("camera_{nanos}")
}
