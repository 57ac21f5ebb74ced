//! Combined timelapse: periodic mosaic capture and daily MP4 assembly.
//!
//! Every capture tick grabs one snapshot per active source, composites
//! them into a single mosaic JPEG, and buffers it in memory. On a slower
//! cadence the buffer is flushed to disk by extending the current day's
//! MP4 in place; at local midnight the file rotates to the new date.

pub mod capture;
pub mod composer;
pub mod manager;
pub mod videogen;

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Local};
use serde::Serialize;
use video_ingest::Resolution;

pub use capture::TimelapseCapture;
pub use composer::FrameComposer;
pub use manager::TimelapseManager;
pub use videogen::VideoGenerator;

/// One snapshot taken from a single source.
#[derive(Clone, Debug)]
pub struct SourceFrame {
    pub source_id: String,
    pub timestamp: DateTime<Local>,
    pub data: Vec<u8>,
}

/// Snapshots from every source composited into one mosaic JPEG.
#[derive(Clone, Debug)]
pub struct CombinedFrame {
    pub timestamp: DateTime<Local>,
    pub source_frames: HashMap<String, SourceFrame>,
    pub composed: Vec<u8>,
}

/// Timelapse configuration, fixed for the lifetime of a capture run.
#[derive(Clone, Debug)]
pub struct TimelapseConfig {
    pub enabled: bool,
    pub capture_interval: Duration,
    pub update_interval: Duration,
    pub output_format: String,
    /// Video quality from 1 (small) to 5 (best).
    pub quality: u8,
    pub resolution: Resolution,
    pub max_frame_buffer: usize,
    pub retention_days: u32,
}

impl Default for TimelapseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capture_interval: Duration::from_secs(2),
            update_interval: Duration::from_secs(60 * 60),
            output_format: "mp4".to_string(),
            quality: 3,
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            // One hour of frames at the default two-second interval.
            max_frame_buffer: 1800,
            retention_days: 30,
        }
    }
}

impl TimelapseConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=5).contains(&self.quality) {
            anyhow::bail!("timelapse quality must be between 1 and 5, got {}", self.quality);
        }
        if self.capture_interval.is_zero() || self.update_interval.is_zero() {
            anyhow::bail!("timelapse intervals must be positive");
        }
        if self.max_frame_buffer == 0 {
            anyhow::bail!("timelapse frame buffer must hold at least one frame");
        }
        Ok(())
    }
}

/// Lifecycle state of an on-disk video.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    Recording,
    Completed,
}

/// One timelapse artifact in the output directory.
#[derive(Clone, Debug, Serialize)]
pub struct Video {
    pub date: DateTime<Local>,
    pub file_path: String,
    pub file_size: u64,
    pub status: VideoStatus,
    pub source_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Local>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Local>>,
}

/// Live snapshot of a capture run.
#[derive(Clone, Debug, Default)]
pub struct CaptureStatus {
    pub current_video: String,
    pub frame_buffer_size: usize,
    pub last_update: Option<DateTime<Local>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TimelapseConfig::default();
        config.validate().unwrap();
        assert_eq!(config.capture_interval, Duration::from_secs(2));
        assert_eq!(config.update_interval, Duration::from_secs(3600));
        assert_eq!(config.max_frame_buffer, 1800);
    }

    #[test]
    fn config_rejects_out_of_range_quality() {
        let mut config = TimelapseConfig::default();
        config.quality = 0;
        assert!(config.validate().is_err());
        config.quality = 6;
        assert!(config.validate().is_err());
    }
}
