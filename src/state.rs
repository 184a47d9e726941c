//! Application state management
//! This module defines and manages the application state shared by commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::config::AppConfig;
use crate::core::bluetooth::bluest_backend::BluestPlatform;
use crate::core::bluetooth::manager::{BluetoothController, ControllerOptions};
use crate::core::bluetooth::platform::BlePlatform;

/// Application state
pub struct AppState<P: BlePlatform = BluestPlatform> {
    /// The Bluetooth controller instance
    pub controller: Arc<BluetoothController<P>>,
    pub config: AppConfig,
}

impl AppState<BluestPlatform> {
    /// Opens the default adapter and starts the controller on it.
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing Bluetooth controller...");
        let platform = BluestPlatform::new(config.explorer.link_poll_interval())
            .await
            .context("Failed to open the Bluetooth adapter")?;
        Ok(Self::with_platform(platform, config).await)
    }
}

impl<P: BlePlatform> AppState<P> {
    pub async fn with_platform(platform: P, config: AppConfig) -> Self {
        let options = ControllerOptions {
            scan_settings: config.explorer.scan_settings(),
            auto_reconnect: config.explorer.auto_reconnect,
            min_rssi: config.explorer.min_rssi,
        };
        let controller = BluetoothController::start(Arc::new(platform), options).await;
        Self { controller, config }
    }

    /// Gets a reference to the Bluetooth controller
    pub fn controller(&self) -> Arc<BluetoothController<P>> {
        self.controller.clone()
    }
}
