//! Configuration loading for the binding daemon

use serde::{Deserialize, Serialize};
use std::fs;
use crate::{Result, TeleoError};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub control: ControlConfig,
    pub publishing: Option<PublishingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// TCP port for the remote command channel
    pub remote_port: u16,
    /// TCP port for the joint telemetry feed
    pub telemetry_port: u16,
    /// Path probed for the reserved virtual robot slot
    pub virtual_robot_path: Option<String>,
    /// Device paths offered to discovery (robot endpoints and controller
    /// device nodes alike; classification sorts them out)
    #[serde(default)]
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Control loop period in milliseconds
    pub tick_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishingConfig {
    pub decimal_places: Option<u32>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                remote_port: 6666,
                telemetry_port: 5678,
                virtual_robot_path: None,
                devices: Vec::new(),
            },
            control: ControlConfig { tick_ms: None },
            publishing: None,
        }
    }
}

impl DaemonConfig {
    pub fn load_from_path(config_path: &str) -> Result<Self> {
        let contents = fs::read_to_string(config_path)
            .map_err(|e| TeleoError::Config(format!("Failed to read {}: {}", config_path, e)))?;

        let config: DaemonConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Control loop period with default fallback
    pub fn tick_ms(&self) -> u64 {
        self.control.tick_ms.unwrap_or(250)
    }

    /// Published joint value precision with default fallback
    pub fn decimal_places(&self) -> u32 {
        self.publishing
            .as_ref()
            .and_then(|p| p.decimal_places)
            .unwrap_or(2)
    }

    /// Virtual robot probe path with default fallback
    pub fn virtual_robot_path(&self) -> String {
        self.server
            .virtual_robot_path
            .clone()
            .unwrap_or_else(|| "virtual".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.remote_port, 6666);
        assert_eq!(config.tick_ms(), 250);
        assert_eq!(config.decimal_places(), 2);
        assert_eq!(config.virtual_robot_path(), "virtual");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  remote_port: 7000
  telemetry_port: 7001
  virtual_robot_path: sim0
  devices:
    - 127.0.0.1:30002
    - /dev/input/js0
control:
  tick_ms: 100
publishing:
  decimal_places: 2
"#;
        let config: DaemonConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.remote_port, 7000);
        assert_eq!(config.tick_ms(), 100);
        assert_eq!(config.virtual_robot_path(), "sim0");
        assert_eq!(config.server.devices.len(), 2);
        assert_eq!(config.decimal_places(), 2);

        let yaml = "server:\n  remote_port: 7000\n  telemetry_port: 7001\ncontrol: {}\npublishing:\n  decimal_places: 4\n";
        let config: DaemonConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.decimal_places(), 4);
    }
}
