use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::{
    BLUETOOTH_OPERATION_TIMEOUT_SECS, DEFAULT_LINK_POLL_INTERVAL_MS,
};
use crate::core::bluetooth::types::{ScanMode, ScanSettings};

const APP_DIR_NAME: &str = "blexplorer";
const CONFIG_FILE_NAME: &str = "explorer_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Radio duty cycle while scanning
    pub scan_mode: ScanMode,

    /// Ask the platform to re-establish dropped links on its own
    pub auto_reconnect: bool,

    /// How often an open link is checked for liveness, in milliseconds
    pub link_poll_interval_ms: u64,

    /// Timeout for connect, discovery and read commands, in seconds
    pub operation_timeout_secs: u64,

    /// Advertisements weaker than this (dBm) are ignored
    pub min_rssi: Option<i16>,

    /// One of error, warn, info, debug, trace
    pub log_level: String,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        ExplorerConfig {
            scan_mode: ScanMode::default(),
            auto_reconnect: false,
            link_poll_interval_ms: DEFAULT_LINK_POLL_INTERVAL_MS,
            operation_timeout_secs: BLUETOOTH_OPERATION_TIMEOUT_SECS,
            min_rssi: None,
            log_level: "info".to_string(),
        }
    }
}

impl ExplorerConfig {
    /// `<config_dir>/blexplorer/explorer_config.json`, if the platform has a
    /// config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            mode: self.scan_mode,
            service_filter: Vec::new(),
        }
    }

    pub fn link_poll_interval(&self) -> Duration {
        Duration::from_millis(self.link_poll_interval_ms.max(1))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or_else(|_| {
            warn!("Unknown log level {:?}, using info.", self.log_level);
            log::LevelFilter::Info
        })
    }

    /// Loads the config from `file_path`; a missing file yields the defaults.
    pub async fn load_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", file_path))?;
        let config: Self = serde_json::from_str(&config_json)
            .with_context(|| format!("Invalid config file {:?}", file_path))?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the current config to `file_path`, creating its directory.
    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(config_dir) = file_path.parent() {
            fs::create_dir_all(config_dir)
                .await
                .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize explorer config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Explorer config saved to {:?}.", file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExplorerConfig::load_config(&dir.path().join("absent.json"))
            .await
            .unwrap();
        assert_eq!(config, ExplorerConfig::default());
    }

    #[tokio::test]
    async fn save_creates_directory_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = ExplorerConfig {
            scan_mode: ScanMode::LowLatency,
            auto_reconnect: true,
            min_rssi: Some(-75),
            log_level: "debug".to_string(),
            ..Default::default()
        };

        config.save_config(&path).await.unwrap();
        let loaded = ExplorerConfig::load_config(&path).await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.log_level_filter(), log::LevelFilter::Debug);
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{ "scan_mode": "low_power", "min_rssi": -90 }"#).unwrap();

        let config = ExplorerConfig::load_config(&path).await.unwrap();
        assert_eq!(config.scan_mode, ScanMode::LowPower);
        assert_eq!(config.min_rssi, Some(-90));
        assert_eq!(config.link_poll_interval_ms, DEFAULT_LINK_POLL_INTERVAL_MS);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "not json").unwrap();
        assert!(ExplorerConfig::load_config(&path).await.is_err());
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let config = ExplorerConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert_eq!(config.log_level_filter(), log::LevelFilter::Info);
    }
}
