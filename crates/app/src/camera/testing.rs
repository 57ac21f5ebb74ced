//! Test doubles shared by camera and timelapse tests.

use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::{Receiver, Sender, bounded};
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use video_ingest::CaptureError;

use crate::camera::{
    Capabilities, CameraError, SourceInfo, SourceKind, Status, VideoSettings,
    source::VideoSource,
};

/// A scriptable in-memory source: no encoder, no device.
pub(crate) struct MockSource {
    info: SourceInfo,
    status: RwLock<Status>,
    latest: Mutex<Option<Vec<u8>>>,
    frame_tx: Sender<Vec<u8>>,
    frame_rx: Receiver<Vec<u8>>,
    error_rx: Receiver<CaptureError>,
    _error_tx: Sender<CaptureError>,
}

impl MockSource {
    pub(crate) fn new(id: &str, name: &str) -> Arc<Self> {
        let (frame_tx, frame_rx) = bounded(10);
        let (_error_tx, error_rx) = bounded(5);
        Arc::new(Self {
            info: SourceInfo {
                id: id.to_string(),
                name: name.to_string(),
                kind: SourceKind::UsbCamera,
                driver: "mock".to_string(),
                description: format!("mock source {name}"),
                device: format!("/dev/mock/{id}"),
            },
            status: RwLock::new(Status::Active),
            latest: Mutex::new(None),
            frame_tx,
            frame_rx,
            error_rx,
            _error_tx,
        })
    }

    pub(crate) fn set_status(&self, status: Status) {
        *self.status.write().unwrap() = status;
    }

    pub(crate) fn set_frame(&self, frame: Vec<u8>) {
        *self.latest.lock().unwrap() = Some(frame.clone());
        let _ = self.frame_tx.try_send(frame);
    }
}

impl VideoSource for MockSource {
    fn start(&self) -> Result<(), CameraError> {
        self.set_status(Status::Active);
        Ok(())
    }

    fn stop(&self) -> Result<(), CameraError> {
        self.set_status(Status::Inactive);
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn frame_channel(&self) -> Receiver<Vec<u8>> {
        self.frame_rx.clone()
    }

    fn error_channel(&self) -> Receiver<CaptureError> {
        self.error_rx.clone()
    }

    fn snapshot(&self) -> Result<Vec<u8>, CameraError> {
        if *self.status.read().unwrap() != Status::Active {
            return Err(CameraError::NotActive);
        }
        self.latest
            .lock()
            .unwrap()
            .clone()
            .ok_or(CameraError::NoFrameYet)
    }

    fn apply_settings(&self, _settings: VideoSettings) -> Result<(), CameraError> {
        Ok(())
    }

    fn info(&self) -> SourceInfo {
        self.info.clone()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            resolutions: Vec::new(),
            frame_rates: vec![15],
            formats: vec!["MJPEG".to_string()],
        }
    }

    fn current_settings(&self) -> VideoSettings {
        VideoSettings::default()
    }

    fn status(&self) -> Status {
        *self.status.read().unwrap()
    }
}

/// A real, decodable JPEG of a solid 8×8 tile.
pub(crate) fn solid_jpeg(shade: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(8, 8, Rgb([shade, shade, shade]));
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, 90)
        .encode_image(&image)
        .expect("jpeg encoding of a test tile cannot fail");
    bytes
}
