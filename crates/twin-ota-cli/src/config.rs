//! Agent configuration file

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use twin_ota::DriverConfig;

use crate::error::CliError;

/// Exit code reported after an update has been staged
pub const DEFAULT_RESTART_EXIT_CODE: u8 = 3;

/// Default TLS connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default limit for one full image download, sized for a few MiB over a slow link
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 900;

/// Agent settings, loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory holding `ota_0.bin`, `ota_1.bin` and `otadata.json`
    pub slots_dir: PathBuf,
    /// Time allowed to establish the TLS connection
    pub connect_timeout_secs: u64,
    /// Upper bound on one whole download, headers through last byte
    pub download_timeout_secs: u64,
    /// Exit code used to ask the supervisor for a restart
    pub restart_exit_code: u8,
    /// Streaming driver tunables
    pub driver: DriverConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            slots_dir: PathBuf::from("ota-slots"),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            restart_exit_code: DEFAULT_RESTART_EXIT_CODE,
            driver: DriverConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            CliError::InvalidConfiguration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: AgentConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CliError> {
        self.driver
            .validate()
            .map_err(|e| CliError::InvalidConfiguration(e.to_string()))?;
        if self.connect_timeout_secs == 0 {
            return Err(CliError::InvalidConfiguration(
                "connect_timeout_secs must be positive".to_string(),
            ));
        }
        if self.download_timeout_secs < self.connect_timeout_secs {
            return Err(CliError::InvalidConfiguration(format!(
                "download_timeout_secs ({}) must not be shorter than connect_timeout_secs ({})",
                self.download_timeout_secs, self.connect_timeout_secs
            )));
        }
        if self.restart_exit_code == 0 {
            return Err(CliError::InvalidConfiguration(
                "restart_exit_code must not be 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}
