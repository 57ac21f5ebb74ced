//! Desktop screen source backed by an X11 grab.

use std::{
    process::{Command, Stdio},
    sync::Arc,
};

use crossbeam_channel::Receiver;
use video_ingest::{CaptureError, CaptureKind, Resolution, StreamSpec};

use crate::camera::{
    Capabilities, CameraError, SharedVideoSource, SourceInfo, SourceKind, Status, VideoSettings,
    generate_source_id,
    source::{SourceCore, VideoSource},
};

const DISPLAY: &str = ":0.0";

pub struct ScreenSource {
    core: Arc<SourceCore>,
    display: String,
}

impl ScreenSource {
    pub fn from_config(settings: VideoSettings) -> Result<SharedVideoSource, CameraError> {
        settings.validate()?;

        let info = SourceInfo {
            id: generate_source_id(),
            name: "Screen Capture".to_string(),
            kind: SourceKind::X11Screen,
            driver: "x11grab".to_string(),
            description: "X11 Screen Capture".to_string(),
            device: "x11:screen".to_string(),
        };
        let capabilities = Capabilities {
            resolutions: vec![
                Resolution {
                    width: 800,
                    height: 600,
                },
                Resolution {
                    width: 1280,
                    height: 720,
                },
                Resolution {
                    width: 1920,
                    height: 1080,
                },
            ],
            frame_rates: vec![5, 10, 15, 30],
            formats: vec!["MJPEG".to_string()],
        };

        Ok(Arc::new(Self {
            core: Arc::new(SourceCore::new(info, capabilities, settings)),
            display: DISPLAY.to_string(),
        }))
    }

    /// Default screen settings: full HD at a gentle frame rate.
    pub fn default_settings() -> VideoSettings {
        VideoSettings {
            width: 1920,
            height: 1080,
            frame_rate: 10,
            ..VideoSettings::default()
        }
    }

    fn stream_spec_for(&self, settings: &VideoSettings) -> StreamSpec {
        StreamSpec {
            kind: CaptureKind::Screen,
            input: self.display.clone(),
            width: settings.width,
            height: settings.height,
            frame_rate: settings.frame_rate,
        }
    }
}

impl VideoSource for ScreenSource {
    fn start(&self) -> Result<(), CameraError> {
        let settings = self.core.current_settings();
        self.core
            .activate(self.stream_spec_for(&settings), self.is_available())
    }

    fn stop(&self) -> Result<(), CameraError> {
        self.core.deactivate()
    }

    fn is_available(&self) -> bool {
        Command::new("xdpyinfo")
            .args(["-display", &self.display])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn frame_channel(&self) -> Receiver<Vec<u8>> {
        self.core.frame_channel()
    }

    fn error_channel(&self) -> Receiver<CaptureError> {
        self.core.error_channel()
    }

    fn snapshot(&self) -> Result<Vec<u8>, CameraError> {
        self.core.snapshot()
    }

    fn apply_settings(&self, settings: VideoSettings) -> Result<(), CameraError> {
        let spec = self.stream_spec_for(&settings);
        self.core.reconfigure(spec, settings)
    }

    fn info(&self) -> SourceInfo {
        self.core.info()
    }

    fn capabilities(&self) -> Capabilities {
        self.core.capabilities()
    }

    fn current_settings(&self) -> VideoSettings {
        self.core.current_settings()
    }

    fn status(&self) -> Status {
        self.core.status()
    }
}
