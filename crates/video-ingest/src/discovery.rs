//! Enumeration of capture devices via `/dev/video*` and `v4l2-ctl`.
//!
//! The shell tooling is treated as an interface: any failure to run it
//! just removes the device from consideration. The [`Discovery`] trait is
//! the seam the source manager depends on, with [`MockDiscovery`]
//! standing in for hardware in tests.

use std::{
    path::Path,
    process::{Command, Stdio},
    sync::Mutex,
};

use tracing::warn;

use crate::types::{CaptureError, DeviceInfo, Resolution};

const DEVICE_PATTERN: &str = "/dev/video*";
const DEVICE_PREFIX: &str = "/dev/video";

/// Capture-device enumeration.
pub trait Discovery: Send + Sync {
    /// Scan for device paths eligible as main cameras, sorted by number.
    fn scan(&self) -> Result<Vec<String>, CaptureError>;

    /// Cheap check that a device path is present and plausible.
    fn is_available(&self, path: &str) -> bool;

    /// Full metadata for one device.
    fn describe(&self, path: &str) -> Result<DeviceInfo, CaptureError>;
}

/// Discovery over real Video4Linux device nodes.
#[derive(Debug, Default)]
pub struct V4l2Discovery;

impl V4l2Discovery {
    pub fn new() -> Self {
        Self
    }

    /// Display name from the driver's card-type field.
    fn card_name(&self, path: &str) -> Option<String> {
        let output = v4l2_output(&["--device", path, "--info"])?;
        output.lines().find_map(|line| {
            let line = line.trim();
            let value = line.strip_prefix("Card type")?.trim_start_matches([':', ' ']);
            (!value.is_empty()).then(|| value.to_string())
        })
    }

    /// A device is a main camera when it reports a color pixel format.
    /// Multi-plane UVC devices expose several nodes under one card name;
    /// only the smallest-numbered one is kept.
    fn is_main_camera(&self, path: &str) -> bool {
        let Some(output) = v4l2_output(&["--device", path, "--list-formats-ext"]) else {
            return false;
        };
        if !has_color_formats(&output) {
            return false;
        }

        let number = device_number(path);
        for sibling_number in 0..number {
            let sibling = format!("{DEVICE_PREFIX}{sibling_number}");
            if !self.is_available(&sibling) {
                continue;
            }
            let sibling_color = v4l2_output(&["--device", &sibling, "--list-formats-ext"])
                .is_some_and(|out| has_color_formats(&out));
            if sibling_color && self.same_card(path, &sibling) {
                return false;
            }
        }
        true
    }

    fn same_card(&self, a: &str, b: &str) -> bool {
        match (self.card_name(a), self.card_name(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Discovery for V4l2Discovery {
    fn scan(&self) -> Result<Vec<String>, CaptureError> {
        let mut paths: Vec<String> = glob::glob(DEVICE_PATTERN)
            .map_err(|err| CaptureError::Other(err.into()))?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path.to_string_lossy().into_owned()),
                Err(err) => {
                    warn!("skipping unreadable device entry: {err}");
                    None
                }
            })
            .collect();
        paths.sort_by_key(|path| device_number(path));

        Ok(paths
            .into_iter()
            .filter(|path| self.is_available(path) && self.is_main_camera(path))
            .collect())
    }

    fn is_available(&self, path: &str) -> bool {
        is_video_node(path) && Path::new(path).exists()
    }

    fn describe(&self, path: &str) -> Result<DeviceInfo, CaptureError> {
        if !self.is_available(path) {
            return Err(CaptureError::Unavailable {
                path: path.to_string(),
            });
        }

        let name = self
            .card_name(path)
            .unwrap_or_else(|| format!("Camera {}", device_number(path)));

        Ok(DeviceInfo {
            path: path.to_string(),
            name,
            driver: "uvcvideo".to_string(),
            resolutions: default_resolutions(),
            formats: vec!["MJPEG".to_string(), "YUYV".to_string()],
        })
    }
}

/// Scripted discovery for tests: devices appear and vanish on demand.
#[derive(Debug, Default)]
pub struct MockDiscovery {
    devices: Mutex<Vec<String>>,
}

impl MockDiscovery {
    pub fn new(devices: Vec<String>) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }

    pub fn add_device(&self, path: &str) {
        let mut devices = self.devices.lock().expect("mock device list poisoned");
        if !devices.iter().any(|d| d == path) {
            devices.push(path.to_string());
        }
    }

    pub fn remove_device(&self, path: &str) {
        let mut devices = self.devices.lock().expect("mock device list poisoned");
        devices.retain(|d| d != path);
    }
}

impl Discovery for MockDiscovery {
    fn scan(&self) -> Result<Vec<String>, CaptureError> {
        Ok(self.devices.lock().expect("mock device list poisoned").clone())
    }

    fn is_available(&self, path: &str) -> bool {
        self.devices
            .lock()
            .expect("mock device list poisoned")
            .iter()
            .any(|d| d == path)
    }

    fn describe(&self, path: &str) -> Result<DeviceInfo, CaptureError> {
        if !self.is_available(path) {
            return Err(CaptureError::Unavailable {
                path: path.to_string(),
            });
        }
        Ok(DeviceInfo {
            path: path.to_string(),
            name: format!("Test Camera {}", device_number(path)),
            driver: "mock".to_string(),
            resolutions: default_resolutions(),
            formats: vec!["MJPEG".to_string()],
        })
    }
}

/// Numeric suffix of a `/dev/videoN` path; 0 when absent.
pub fn device_number(path: &str) -> u32 {
    path.strip_prefix(DEVICE_PREFIX)
        .and_then(|rest| rest.parse().ok())
        .unwrap_or(0)
}

fn is_video_node(path: &str) -> bool {
    path.strip_prefix(DEVICE_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Grey-only sensors (e.g. IR depth planes) report neither format and
/// are excluded from main-camera duty.
fn has_color_formats(formats_output: &str) -> bool {
    formats_output.contains("YUYV") || formats_output.contains("MJPG")
}

fn v4l2_output(args: &[&str]) -> Option<String> {
    let output = Command::new("v4l2-ctl")
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

fn default_resolutions() -> Vec<Resolution> {
    vec![
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
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_number_parses_suffix() {
        assert_eq!(device_number("/dev/video0"), 0);
        assert_eq!(device_number("/dev/video12"), 12);
        assert_eq!(device_number("/dev/null"), 0);
    }

    #[test]
    fn video_node_pattern() {
        assert!(is_video_node("/dev/video3"));
        assert!(!is_video_node("/dev/video"));
        assert!(!is_video_node("/dev/video3a"));
        assert!(!is_video_node("/tmp/video3"));
    }

    #[test]
    fn color_format_eligibility() {
        assert!(has_color_formats("[0]: 'MJPG' (Motion-JPEG, compressed)"));
        assert!(has_color_formats("[0]: 'YUYV' (YUYV 4:2:2)"));
        // Grey-only plane of a depth camera.
        assert!(!has_color_formats("[0]: 'GREY' (8-bit Greyscale)"));
        assert!(!has_color_formats(""));
        // Color plus an extra grey plane still counts as color.
        assert!(has_color_formats("[0]: 'YUYV'\n[1]: 'GREY'"));
    }

    #[test]
    fn mock_discovery_tracks_device_set() {
        let discovery = MockDiscovery::new(vec!["/dev/video0".to_string()]);
        assert!(discovery.is_available("/dev/video0"));
        assert!(!discovery.is_available("/dev/video1"));

        discovery.add_device("/dev/video1");
        discovery.add_device("/dev/video1");
        assert_eq!(discovery.scan().unwrap().len(), 2);

        discovery.remove_device("/dev/video0");
        assert_eq!(discovery.scan().unwrap(), vec!["/dev/video1".to_string()]);
        assert!(discovery.describe("/dev/video0").is_err());
        assert_eq!(discovery.describe("/dev/video1").unwrap().name, "Test Camera 1");
    }

    #[test]
    fn scan_returns_identical_results_for_stable_set() {
        let discovery = MockDiscovery::new(vec![
            "/dev/video0".to_string(),
            "/dev/video2".to_string(),
        ]);
        assert_eq!(discovery.scan().unwrap(), discovery.scan().unwrap());
    }
}
