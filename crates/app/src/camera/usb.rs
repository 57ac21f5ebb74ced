//! USB camera source backed by a V4L2 device node.

use std::{path::Path, sync::Arc};

use crossbeam_channel::Receiver;
use video_ingest::{CaptureError, CaptureKind, Discovery, Resolution, StreamSpec};

use crate::camera::{
    Capabilities, CameraError, SharedVideoSource, SourceInfo, SourceKind, Status, VideoSettings,
    generate_source_id,
    source::{SourceCore, VideoSource},
};

pub struct UsbCameraSource {
    core: Arc<SourceCore>,
}

impl UsbCameraSource {
    /// Build a source for `device`, naming it from the discovery probe
    /// when possible.
    pub fn from_config(
        discovery: &dyn Discovery,
        device: &str,
        settings: VideoSettings,
    ) -> Result<SharedVideoSource, CameraError> {
        if device.is_empty() {
            return Err(CameraError::InvalidSettings(
                "a USB camera needs a device path".to_string(),
            ));
        }
        settings.validate()?;

        let name = match discovery.describe(device) {
            Ok(info) => info.name,
            Err(_) => format!("USB Camera ({device})"),
        };

        let info = SourceInfo {
            id: generate_source_id(),
            name: name.clone(),
            kind: SourceKind::UsbCamera,
            driver: "v4l2".to_string(),
            description: format!("USB Camera: {name}"),
            device: device.to_string(),
        };
        let capabilities = Capabilities {
            resolutions: vec![
                Resolution {
                    width: 640,
                    height: 480,
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
            formats: vec!["MJPEG".to_string(), "YUYV".to_string()],
        };

        Ok(Arc::new(Self {
            core: Arc::new(SourceCore::new(info, capabilities, settings)),
        }))
    }

    fn stream_spec(&self) -> StreamSpec {
        let settings = self.core.current_settings();
        StreamSpec {
            kind: CaptureKind::Usb,
            input: self.core.info().device,
            width: settings.width,
            height: settings.height,
            frame_rate: settings.frame_rate,
        }
    }
}

impl VideoSource for UsbCameraSource {
    fn start(&self) -> Result<(), CameraError> {
        self.core.activate(self.stream_spec(), self.is_available())
    }

    fn stop(&self) -> Result<(), CameraError> {
        self.core.deactivate()
    }

    fn is_available(&self) -> bool {
        Path::new(&self.core.info().device).exists()
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
        let spec = StreamSpec {
            kind: CaptureKind::Usb,
            input: self.core.info().device,
            width: settings.width,
            height: settings.height,
            frame_rate: settings.frame_rate,
        };
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

#[cfg(test)]
mod tests {
    use super::*;
    use video_ingest::MockDiscovery;

    #[test]
    fn names_come_from_discovery_with_a_fallback() {
        let discovery = MockDiscovery::new(vec!["/dev/video0".to_string()]);

        let known = UsbCameraSource::from_config(
            &discovery,
            "/dev/video0",
            VideoSettings::default(),
        )
        .unwrap();
        assert_eq!(known.info().name, "Test Camera 0");

        let unknown = UsbCameraSource::from_config(
            &discovery,
            "/dev/video7",
            VideoSettings::default(),
        )
        .unwrap();
        assert_eq!(unknown.info().name, "USB Camera (/dev/video7)");
        assert_eq!(unknown.status(), Status::Inactive);
    }

    #[test]
    fn rejects_empty_device_and_bad_settings() {
        let discovery = MockDiscovery::new(Vec::new());
        assert!(UsbCameraSource::from_config(&discovery, "", VideoSettings::default()).is_err());

        let bad = VideoSettings {
            frame_rate: 0,
            ..VideoSettings::default()
        };
        assert!(UsbCameraSource::from_config(&discovery, "/dev/video0", bad).is_err());
    }

    #[test]
    fn start_fails_and_marks_error_when_device_is_missing() {
        let discovery = MockDiscovery::new(Vec::new());
        let source = UsbCameraSource::from_config(
            &discovery,
            "/dev/video200",
            VideoSettings::default(),
        )
        .unwrap();

        assert!(source.start().is_err());
        assert_eq!(source.status(), Status::Error);
        // Stop from the error state resets to inactive.
        source.stop().unwrap();
        assert_eq!(source.status(), Status::Inactive);
    }
}
