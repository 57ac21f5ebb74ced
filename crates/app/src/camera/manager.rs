//! Dynamic source registry with periodic device rediscovery.
//!
//! On start the manager runs one synchronous discovery pass, auto-starts
//! every eligible USB device, then unconditionally brings up a single
//! always-on screen source. A background thread re-runs discovery on an
//! interval, adding sources for devices that appeared and removing
//! sources whose device vanished; the screen source is never removed.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Sender, bounded, select, tick};
use tracing::{info, warn};
use video_ingest::Discovery;

use crate::camera::{
    CameraError, ScreenSource, SharedVideoSource, SourceKind, Status, UsbCameraSource,
    VideoSettings,
};

struct Scanner {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct SourceManager {
    discovery: Arc<dyn Discovery>,
    default_settings: VideoSettings,
    scan_interval: Duration,
    registry: RwLock<HashMap<String, SharedVideoSource>>,
    scanner: Mutex<Option<Scanner>>,
}

impl SourceManager {
    pub fn new(
        discovery: Arc<dyn Discovery>,
        default_settings: VideoSettings,
        scan_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            discovery,
            default_settings,
            scan_interval,
            registry: RwLock::new(HashMap::new()),
            scanner: Mutex::new(None),
        })
    }

    /// Initial discovery, the always-on screen source, and the scanner.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.reconcile().context("initial device discovery failed")?;

        match ScreenSource::from_config(ScreenSource::default_settings()) {
            Ok(screen) => {
                let id = screen.info().id;
                if let Err(err) = screen.start() {
                    warn!("screen source {id} failed to start: {err}");
                } else {
                    info!("screen source {id} started");
                }
                self.write_registry()?.insert(id, screen);
            }
            Err(err) => warn!("screen source could not be created: {err}"),
        }

        let (stop_tx, stop_rx) = bounded(1);
        let manager = self.clone();
        let interval = self.scan_interval;
        let handle = thread::Builder::new()
            .name("source-scanner".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(stop_rx) -> _ => return,
                        recv(ticker) -> _ => {
                            if let Err(err) = manager.reconcile() {
                                warn!("device rediscovery failed: {err}");
                            }
                        }
                    }
                }
            })
            .context("failed to spawn rediscovery thread")?;

        let mut scanner = self.scanner.lock().map_err(|_| CameraError::Poisoned)?;
        *scanner = Some(Scanner { stop_tx, handle });
        Ok(())
    }

    /// Stop rediscovery, then every source; partial failures aggregate.
    pub fn stop(&self) -> Result<()> {
        if let Ok(mut scanner) = self.scanner.lock() {
            if let Some(scanner) = scanner.take() {
                drop(scanner.stop_tx);
                let _ = scanner.handle.join();
            }
        }

        let sources: Vec<SharedVideoSource> = {
            let mut registry = self.write_registry()?;
            registry.drain().map(|(_, source)| source).collect()
        };

        let mut failures = Vec::new();
        for source in sources {
            let id = source.info().id;
            if let Err(err) = source.stop() {
                failures.push(format!("{id}: {err}"));
            }
        }
        if !failures.is_empty() {
            bail!("failed to stop {} source(s): {}", failures.len(), failures.join("; "));
        }
        Ok(())
    }

    /// Re-run discovery now; returns the current device paths.
    pub fn discover(&self) -> Result<Vec<String>> {
        self.reconcile()
    }

    /// Create and register a source without starting it.
    pub fn add(
        &self,
        kind: SourceKind,
        device: &str,
        settings: VideoSettings,
    ) -> Result<SharedVideoSource, CameraError> {
        let source = match kind {
            SourceKind::UsbCamera => {
                UsbCameraSource::from_config(self.discovery.as_ref(), device, settings)?
            }
            SourceKind::X11Screen => ScreenSource::from_config(settings)?,
        };
        let id = source.info().id;
        self.write_registry()?.insert(id, source.clone());
        Ok(source)
    }

    /// Stop and unregister a source.
    pub fn remove(&self, id: &str) -> Result<(), CameraError> {
        let source = {
            let mut registry = self.write_registry()?;
            registry
                .remove(id)
                .ok_or_else(|| CameraError::NotFound(id.to_string()))?
        };
        if source.status() == Status::Active {
            source.stop()?;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<SharedVideoSource> {
        self.registry
            .read()
            .ok()
            .and_then(|registry| registry.get(id).cloned())
    }

    pub fn list(&self) -> Vec<SharedVideoSource> {
        self.registry
            .read()
            .map(|registry| registry.values().cloned().collect())
            .unwrap_or_default()
    }

    /// One reconciliation pass: add sources for new devices, drop
    /// sources whose device disappeared. Holds the registry write lock
    /// for the whole pass so `add`/`remove`/`list` see it atomically.
    fn reconcile(&self) -> Result<Vec<String>> {
        let devices = self
            .discovery
            .scan()
            .context("device scan failed")?;
        let mut registry = self.write_registry()?;

        for device in &devices {
            let registered = registry
                .values()
                .any(|source| source.info().device == *device);
            if registered {
                continue;
            }

            match UsbCameraSource::from_config(
                self.discovery.as_ref(),
                device,
                self.default_settings.clone(),
            ) {
                Ok(source) => {
                    let id = source.info().id;
                    if let Err(err) = source.start() {
                        warn!("source {id} ({device}) failed to start: {err}");
                    } else {
                        info!("source {id} ({device}) started");
                    }
                    registry.insert(id, source);
                }
                Err(err) => warn!("skipping device {device}: {err}"),
            }
        }

        let stale: Vec<String> = registry
            .iter()
            .filter(|(_, source)| {
                let info = source.info();
                info.kind == SourceKind::UsbCamera && !devices.contains(&info.device)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(source) = registry.remove(&id) {
                if source.status() == Status::Active {
                    let _ = source.stop();
                }
                info!("source {id} removed: device {} disappeared", source.info().device);
            }
        }

        metrics::gauge!("argus_sources").set(registry.len() as f64);
        Ok(devices)
    }

    fn write_registry(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, SharedVideoSource>>, CameraError>
    {
        self.registry.write().map_err(|_| CameraError::Poisoned)
    }
}
