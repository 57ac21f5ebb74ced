//! Command-line overrides for the server configuration.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(
    name = "argus",
    version,
    about = "Multi-source surveillance recorder with MJPEG streaming and a combined timelapse"
)]
pub struct Cli {
    /// Host to listen on (default: 0.0.0.0, or SERVER_HOST).
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (default: 8080, or PORT).
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for timelapse videos (default: /data/timelapse).
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

impl Cli {
    /// Fold CLI flags over an already-loaded configuration.
    pub fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraConfig, ServerConfig};
    use crate::timelapse::TimelapseConfig;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            camera: CameraConfig::default(),
            timelapse: TimelapseConfig::default(),
            output_dir: PathBuf::from("/data/timelapse"),
        }
    }

    #[test]
    fn flags_override_loaded_config() {
        let mut config = base_config();
        let cli = Cli::parse_from(["argus", "--host", "::1", "--port", "9999"]);
        cli.apply(&mut config);
        assert_eq!(config.server.host, "::1");
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn absent_flags_leave_config_untouched() {
        let mut config = base_config();
        Cli::parse_from(["argus"]).apply(&mut config);
        assert_eq!(config.server_address(), "0.0.0.0:8080");
    }
}
