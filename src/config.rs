//! Host configuration.
//!
//! Paths under `~/.foreman/` and the optional `config.toml` tuning the
//! daemon bootstrap (timeouts, mode override, binary override).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::daemon::supervisor::DaemonConfig;
use crate::error::{ForemanError, Result};

/// Root data directory: `~/.foreman`.
pub fn data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ForemanError::Config("Could not determine home directory".to_string()))?;
    Ok(home.join(".foreman"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("config.toml"))
}

/// Directory for the daemon's rolling log files.
pub fn log_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("logs"))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
}

/// Daemon bootstrap tuning from `config.toml`. All fields optional; absent
/// values fall back to the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonSettings {
    pub ready_timeout_ms: Option<u64>,
    pub call_timeout_ms: Option<u64>,
    pub force_in_process: Option<bool>,
    pub daemon_binary: Option<PathBuf>,
}

/// Load `config.toml`, falling back to defaults when it does not exist.
pub fn load() -> Result<HostConfig> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(HostConfig::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(toml::from_str(&raw)?)
}

impl HostConfig {
    /// Resolve the supervisor configuration for the given data directory.
    pub fn daemon_config(&self, data_dir: PathBuf) -> DaemonConfig {
        let mut config = DaemonConfig::new(data_dir);
        if let Some(ms) = self.daemon.ready_timeout_ms {
            config.ready_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.daemon.call_timeout_ms {
            config.call_timeout = Duration::from_millis(ms);
        }
        if let Some(force) = self.daemon.force_in_process {
            config.force_in_process = force;
        }
        config.daemon_binary = self.daemon.daemon_binary.clone();
        config
    }
}
