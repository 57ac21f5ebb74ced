//! Application configuration, assembled from defaults and environment.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};

use crate::{camera::VideoSettings, timelapse::TimelapseConfig};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_OUTPUT_DIR: &str = "/data/timelapse";

#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub timelapse: TimelapseConfig,
    /// Where timelapse videos are written.
    pub output_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub default_fps: u32,
    pub default_width: u32,
    pub default_height: u32,
    /// Background rediscovery cadence.
    pub scan_interval: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            default_fps: 15,
            default_width: 1280,
            default_height: 720,
            scan_interval: Duration::from_secs(30),
        }
    }
}

impl CameraConfig {
    /// Settings applied to sources created by discovery.
    pub fn default_settings(&self) -> VideoSettings {
        VideoSettings {
            width: self.default_width,
            height: self.default_height,
            frame_rate: self.default_fps,
            ..VideoSettings::default()
        }
    }
}

impl Config {
    /// Build the configuration from defaults and environment overrides.
    pub fn load() -> Result<Self> {
        let config = Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", DEFAULT_HOST),
                port: env_parsed("PORT", DEFAULT_PORT)?,
            },
            camera: CameraConfig::default(),
            timelapse: TimelapseConfig::default(),
            output_dir: PathBuf::from(env_or("ARGUS_OUTPUT_DIR", DEFAULT_OUTPUT_DIR)),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server port must be between 1 and 65535");
        }
        if self.server.host.is_empty() {
            bail!("server host must not be empty");
        }
        self.timelapse.validate()?;
        Ok(())
    }

    /// Bind address for the HTTP server.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .with_context(|| format!("invalid value for {key}: {value:?}")),
        _ => Ok(default),
    }
}
