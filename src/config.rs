//! Tool configuration loaded from TOML. Every field has a default, so an
//! empty file is valid.

use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::MotorError, model::ServoModel, poll::PollConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub port: String,
    pub baudrate: u32,
    pub timeout_ms: u64,
    pub model: ServoModel,
    pub calibration: Option<PathBuf>,
    pub leader_port: Option<String>,
    /// Use degrees instead of -100..100 for the arm joints.
    pub use_degrees: bool,
    pub web_addr: String,
    pub poll: PollSettings,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baudrate: 1_000_000,
            timeout_ms: 20,
            model: ServoModel::Sts3215,
            calibration: None,
            leader_port: None,
            use_degrees: false,
            web_addr: "0.0.0.0:5001".to_string(),
            poll: PollSettings::default(),
        }
    }
}

impl ToolConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, MotorError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| MotorError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, MotorError> {
        toml::from_str(content).map_err(|e| MotorError::Config(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// `[poll]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub tolerance: i32,
    pub movement_threshold: i32,
}

impl Default for PollSettings {
    fn default() -> Self {
        let cfg = PollConfig::default();
        Self {
            interval_ms: cfg.interval.as_millis() as u64,
            timeout_ms: cfg.timeout.as_millis() as u64,
            tolerance: cfg.tolerance,
            movement_threshold: cfg.movement_threshold,
        }
    }
}

impl From<PollSettings> for PollConfig {
    fn from(s: PollSettings) -> Self {
        PollConfig {
            interval: Duration::from_millis(s.interval_ms),
            timeout: Duration::from_millis(s.timeout_ms),
            tolerance: s.tolerance,
            movement_threshold: s.movement_threshold,
        }
    }
}
