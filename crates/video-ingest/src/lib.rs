//! Process-based video capture: device discovery and MJPEG ingestion.
//!
//! This crate knows how to find capture devices and how to run the
//! external encoder; it has no opinion about sources, streaming, or
//! timelapse policy. Consumers receive JPEG frames over bounded
//! channels and decide what to do with them.

pub mod discovery;
pub mod ffmpeg;
pub mod jpeg;
pub mod types;

pub use discovery::{Discovery, MockDiscovery, V4l2Discovery, device_number};
pub use ffmpeg::{ENCODER, MjpegStream, capture_single_frame, probe_encoder, spawn_mjpeg_stream};
pub use jpeg::FrameSplitter;
pub use types::{CaptureError, CaptureKind, DeviceInfo, Resolution, StreamSpec};
