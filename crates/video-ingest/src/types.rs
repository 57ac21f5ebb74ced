//! Shared data types exposed by the video ingest layer.

use std::time::Duration;

use anyhow::Error;
use thiserror::Error;

/// Capture backend driving an encoder invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureKind {
    /// Video4Linux device node such as `/dev/video0`.
    Usb,
    /// X11 display grab such as `:0.0`.
    Screen,
}

/// Parameters for one encoder invocation.
#[derive(Clone, Debug)]
pub struct StreamSpec {
    /// Backend selecting the encoder input format.
    pub kind: CaptureKind,
    /// Device path or display name handed to the encoder as `-i`.
    pub input: String,
    /// Capture width in pixels.
    pub width: u32,
    /// Capture height in pixels.
    pub height: u32,
    /// Requested capture frame rate.
    pub frame_rate: u32,
}

/// Device metadata reported by discovery.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    /// Device path, e.g. `/dev/video0`.
    pub path: String,
    /// Human-readable display name.
    pub name: String,
    /// Kernel driver behind the node.
    pub driver: String,
    /// Resolutions the device advertises.
    pub resolutions: Vec<Resolution>,
    /// Pixel formats the device advertises.
    pub formats: Vec<String>,
}

/// A capture resolution in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Errors that can arise while configuring or driving capture processes.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to spawn encoder for {input:?}")]
    Spawn {
        input: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder produced no frame within {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("encoder exited with {status}: {stderr}")]
    Encoder { status: String, stderr: String },
    #[error("device {path:?} is not available")]
    Unavailable { path: String },
    #[error(transparent)]
    Other(#[from] Error),
}
