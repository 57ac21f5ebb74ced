//! The uniform source contract and the state shared by every kind.
//!
//! [`SourceCore`] carries what USB and screen sources have in common:
//! status, settings, the bounded public frame/error channels, the
//! latest-frame cell backing snapshots, and the forwarder thread that
//! pumps encoder output into all of them. Kind-specific types only
//! decide how to probe availability and how to parameterise the encoder.

use std::{
    sync::{Arc, Mutex, RwLock},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, tick};
use tracing::{debug, warn};
use video_ingest::{CaptureError, MjpegStream, StreamSpec, capture_single_frame, spawn_mjpeg_stream};

use crate::camera::{CameraError, Capabilities, SourceInfo, Status, VideoSettings};

/// Capacity of the public live frame channel.
pub(crate) const FRAME_CHANNEL_CAPACITY: usize = 10;
/// Capacity of the public error channel.
pub(crate) const ERROR_CHANNEL_CAPACITY: usize = 5;
/// Forwarder wake-up interval while the producer is quiet.
const IDLE_TICK: Duration = Duration::from_millis(100);
/// Hard timeout for the start-time test capture.
const TEST_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Uniform contract satisfied by every video source.
pub trait VideoSource: Send + Sync {
    /// Bring the source up: validate, test-capture, launch the encoder.
    /// Idempotent; failure leaves the source in [`Status::Error`].
    fn start(&self) -> Result<(), CameraError>;

    /// Tear the source down and make it restartable. Idempotent.
    fn stop(&self) -> Result<(), CameraError>;

    /// Cheap liveness probe for the underlying device.
    fn is_available(&self) -> bool;

    /// Live JPEG frames, bounded, oldest dropped under backpressure.
    fn frame_channel(&self) -> Receiver<Vec<u8>>;

    /// Capture errors that did not stop the stream.
    fn error_channel(&self) -> Receiver<CaptureError>;

    /// Copy of the most recent frame the forwarder has seen.
    fn snapshot(&self) -> Result<Vec<u8>, CameraError>;

    /// Swap capture parameters, transparently restarting if active.
    fn apply_settings(&self, settings: VideoSettings) -> Result<(), CameraError>;

    fn info(&self) -> SourceInfo;
    fn capabilities(&self) -> Capabilities;
    fn current_settings(&self) -> VideoSettings;
    fn status(&self) -> Status;
}

/// Sources are shared between the manager, HTTP handlers, and timelapse.
pub type SharedVideoSource = Arc<dyn VideoSource>;

/// Forwarder thread handle plus its stop signal.
struct Forwarder {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// State common to every source kind.
pub(crate) struct SourceCore {
    info: SourceInfo,
    capabilities: Capabilities,
    settings: RwLock<VideoSettings>,
    status: RwLock<Status>,
    frame_tx: Sender<Vec<u8>>,
    frame_rx: Receiver<Vec<u8>>,
    error_tx: Sender<CaptureError>,
    error_rx: Receiver<CaptureError>,
    latest: Mutex<Option<Vec<u8>>>,
    // Serialises every status transition (start/stop/apply-settings).
    worker: Mutex<Option<Forwarder>>,
}

impl SourceCore {
    pub(crate) fn new(
        info: SourceInfo,
        capabilities: Capabilities,
        settings: VideoSettings,
    ) -> Self {
        let (frame_tx, frame_rx) = bounded(FRAME_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = bounded(ERROR_CHANNEL_CAPACITY);
        Self {
            info,
            capabilities,
            settings: RwLock::new(settings),
            status: RwLock::new(Status::Inactive),
            frame_tx,
            frame_rx,
            error_tx,
            error_rx,
            latest: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Start the capture pipeline for `spec`.
    pub(crate) fn activate(
        self: &Arc<Self>,
        spec: StreamSpec,
        available: bool,
    ) -> Result<(), CameraError> {
        let mut worker = self.worker.lock().map_err(|_| CameraError::Poisoned)?;
        if self.status() == Status::Active {
            return Ok(());
        }

        if !available {
            self.set_status(Status::Error);
            return Err(CameraError::Capture(CaptureError::Unavailable {
                path: spec.input,
            }));
        }

        if let Err(err) = capture_single_frame(&spec, TEST_CAPTURE_TIMEOUT) {
            self.set_status(Status::Error);
            return Err(err.into());
        }

        match spawn_mjpeg_stream(&spec) {
            Ok(stream) => {
                *worker = Some(self.spawn_forwarder(stream)?);
                self.set_status(Status::Active);
                Ok(())
            }
            Err(err) => {
                self.set_status(Status::Error);
                Err(err.into())
            }
        }
    }

    /// Stop the capture pipeline and reset channels for a later restart.
    pub(crate) fn deactivate(&self) -> Result<(), CameraError> {
        let mut worker = self.worker.lock().map_err(|_| CameraError::Poisoned)?;
        if self.status() == Status::Inactive {
            return Ok(());
        }

        if let Some(forwarder) = worker.take() {
            // Disconnecting the stop channel wakes the forwarder, which
            // kills the encoder on its way out.
            drop(forwarder.stop_tx);
            let _ = forwarder.handle.join();
        }

        while self.frame_rx.try_recv().is_ok() {}
        while self.error_rx.try_recv().is_ok() {}
        if let Ok(mut latest) = self.latest.lock() {
            *latest = None;
        }

        self.set_status(Status::Inactive);
        Ok(())
    }

    /// Replace settings, restarting the encoder in place when active.
    pub(crate) fn reconfigure(
        self: &Arc<Self>,
        spec: StreamSpec,
        settings: VideoSettings,
    ) -> Result<(), CameraError> {
        settings.validate()?;
        let mut worker = self.worker.lock().map_err(|_| CameraError::Poisoned)?;
        {
            let mut current = self.settings.write().map_err(|_| CameraError::Poisoned)?;
            *current = settings;
        }

        if self.status() != Status::Active {
            return Ok(());
        }

        if let Some(forwarder) = worker.take() {
            drop(forwarder.stop_tx);
            let _ = forwarder.handle.join();
        }
        match spawn_mjpeg_stream(&spec) {
            Ok(stream) => {
                *worker = Some(self.spawn_forwarder(stream)?);
                Ok(())
            }
            Err(err) => {
                self.set_status(Status::Error);
                Err(err.into())
            }
        }
    }

    fn spawn_forwarder(self: &Arc<Self>, stream: MjpegStream) -> Result<Forwarder, CameraError> {
        let (stop_tx, stop_rx) = bounded(1);
        let core = self.clone();
        let handle = thread::Builder::new()
            .name(format!("forwarder-{}", self.info.id))
            .spawn(move || forward_frames(&core, stream, &stop_rx))
            .map_err(|err| CameraError::Capture(CaptureError::Other(err.into())))?;
        Ok(Forwarder { stop_tx, handle })
    }

    /// Store the latest frame, then deliver to the public channel,
    /// evicting the oldest pending frame when it is full.
    pub(crate) fn publish_frame(&self, frame: Vec<u8>) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(frame.clone());
        }
        metrics::counter!("argus_source_frames_total", "source" => self.info.id.clone())
            .increment(1);

        if let Err(TrySendError::Full(frame)) = self.frame_tx.try_send(frame) {
            let _ = self.frame_rx.try_recv();
            let _ = self.frame_tx.try_send(frame);
            metrics::counter!(
                "argus_source_frames_dropped_total",
                "source" => self.info.id.clone()
            )
            .increment(1);
        }
    }

    /// Forward a transient capture error with the same eviction policy.
    pub(crate) fn publish_error(&self, err: CaptureError) {
        warn!("source {}: {err}", self.info.id);
        if let Err(TrySendError::Full(err)) = self.error_tx.try_send(err) {
            let _ = self.error_rx.try_recv();
            let _ = self.error_tx.try_send(err);
        }
    }

    pub(crate) fn snapshot(&self) -> Result<Vec<u8>, CameraError> {
        if self.status() != Status::Active {
            return Err(CameraError::NotActive);
        }
        let latest = self.latest.lock().map_err(|_| CameraError::Poisoned)?;
        latest.clone().ok_or(CameraError::NoFrameYet)
    }

    pub(crate) fn info(&self) -> SourceInfo {
        self.info.clone()
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    pub(crate) fn current_settings(&self) -> VideoSettings {
        self.settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub(crate) fn status(&self) -> Status {
        self.status.read().map(|s| *s).unwrap_or(Status::Error)
    }

    pub(crate) fn set_status(&self, status: Status) {
        if let Ok(mut current) = self.status.write() {
            *current = status;
        }
    }

    pub(crate) fn frame_channel(&self) -> Receiver<Vec<u8>> {
        self.frame_rx.clone()
    }

    pub(crate) fn error_channel(&self) -> Receiver<CaptureError> {
        self.error_rx.clone()
    }
}

/// Pump encoder output into the core until stopped or the encoder dies.
fn forward_frames(core: &Arc<SourceCore>, stream: MjpegStream, stop_rx: &Receiver<()>) {
    let frames = stream.frames();
    let idle = tick(IDLE_TICK);

    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(frames) -> msg => match msg {
                Ok(Ok(frame)) => core.publish_frame(frame),
                Ok(Err(err)) => core.publish_error(err),
                // Producer gone: encoder exited on its own.
                Err(_) => {
                    debug!("source {} capture stream ended", core.info.id);
                    break;
                }
            },
            // Periodic stop poll while the producer is quiet.
            recv(idle) -> _ => {}
        }
    }

    stream.stop();
}
