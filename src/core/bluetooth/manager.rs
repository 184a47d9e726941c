//! Bluetooth controller for the explorer
//! This module provides the single entry point for scanning, the device list
//! and shared connections.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use log::{debug, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::connection::{ConnectionLease, Connector, SharedConnection};
use crate::core::bluetooth::device::{DeviceEntry, DeviceRegistry};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::platform::BlePlatform;
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::types::{AdapterState, DeviceId, DeviceSnapshot, ScanSettings};
use crate::core::scan_record::manufacturer::ManufacturerParserRegistry;
use crate::core::scan_record::render::render_scan_record;

/// Start-up options for [`BluetoothController`]
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub scan_settings: ScanSettings,
    /// Passed to the platform on every connect
    pub auto_reconnect: bool,
    /// Observations weaker than this are not registered
    pub min_rssi: Option<i16>,
}

/// Owns discovery state and the per-device connection slots.
pub struct BluetoothController<P: BlePlatform> {
    platform: Arc<P>,
    registry: Arc<DeviceRegistry<P::Connection>>,
    scanner: Arc<BluetoothScanner<P>>,
    parsers: ManufacturerParserRegistry,
    auto_reconnect: bool,
    shutdown_token: CancellationToken,
    state_pump: Mutex<Option<JoinHandle<()>>>,
}

impl<P: BlePlatform> BluetoothController<P> {
    /// Reads the current adapter state, applies it and then follows the
    /// platform's adapter events.
    pub async fn start(platform: Arc<P>, options: ControllerOptions) -> Arc<Self> {
        let initial_state = platform.adapter_state().await;
        info!("Bluetooth adapter state at start: {:?}", initial_state);

        let registry = Arc::new(DeviceRegistry::new());
        let scanner = Arc::new(BluetoothScanner::new(
            platform.clone(),
            registry.clone(),
            options.scan_settings,
            options.min_rssi,
            initial_state,
        ));
        scanner.apply_state(initial_state);

        let shutdown_token = CancellationToken::new();
        let state_pump = scanner.spawn_state_pump(shutdown_token.clone());

        Arc::new(Self {
            platform,
            registry,
            scanner,
            parsers: ManufacturerParserRegistry::default(),
            auto_reconnect: options.auto_reconnect,
            shutdown_token,
            state_pump: Mutex::new(Some(state_pump)),
        })
    }

    pub fn is_adapter_enabled(&self) -> bool {
        self.platform.is_adapter_enabled()
    }

    /// Current adapter state; late subscribers get the latest value.
    pub fn scan_state(&self) -> watch::Receiver<AdapterState> {
        self.scanner.state()
    }

    /// Full device list, republished after every observation.
    pub fn device_list(&self) -> watch::Receiver<Vec<DeviceSnapshot>> {
        self.registry.subscribe()
    }

    pub fn device_entry(&self, id: &DeviceId) -> Option<Arc<DeviceEntry<P::Connection>>> {
        self.registry.get_entry(id)
    }

    /// Renders an advertisement payload with the registered decoders.
    pub fn describe_scan_record(&self, payload: &[u8]) -> String {
        render_scan_record(payload, &self.parsers)
    }

    /// Returns the device's current connection generation, publishing a new
    /// one if the slot is empty. Nothing is connected until it is attached.
    pub fn acquire(
        &self,
        id: &DeviceId,
    ) -> Result<Arc<SharedConnection<P::Connection>>, BleError> {
        let entry = self
            .registry
            .get_entry(id)
            .ok_or_else(|| BleError::DeviceNotFound(id.clone()))?;
        Ok(self.acquire_for(&entry))
    }

    /// Attaches to the device's shared connection. The first caller starts
    /// establishment; every caller observes the same link.
    ///
    /// Must be called from within a tokio runtime.
    pub fn acquire_connection(
        &self,
        id: &DeviceId,
    ) -> Result<ConnectionLease<P::Connection>, BleError> {
        let entry = self
            .registry
            .get_entry(id)
            .ok_or_else(|| BleError::DeviceNotFound(id.clone()))?;

        loop {
            let shared = self.acquire_for(&entry);
            if let Some(lease) = shared.attach() {
                return Ok(lease);
            }
            // Retired between lookup and attach; its teardown may not have
            // cleared the slot yet.
            debug!(
                "Generation {} for {} is retired, acquiring a fresh one",
                shared.generation(),
                id
            );
            entry.slot().clear_if(&shared);
        }
    }

    /// Stops scanning and drops every device entry.
    pub fn shutdown(&self) {
        info!("Shutting down Bluetooth controller.");
        self.shutdown_token.cancel();
        self.state_pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.scanner.shutdown();
        self.registry.clear();
    }

    fn acquire_for(
        &self,
        entry: &DeviceEntry<P::Connection>,
    ) -> Arc<SharedConnection<P::Connection>> {
        if let Some(existing) = entry.slot().get() {
            return existing;
        }
        let device = entry.id().clone();
        let candidate = SharedConnection::new(device.clone(), entry.slot(), self.connector(device));
        entry.slot().get_or_publish(candidate)
    }

    fn connector(&self, device: DeviceId) -> Connector<P::Connection> {
        let platform = self.platform.clone();
        let auto_reconnect = self.auto_reconnect;
        Arc::new(move || {
            let platform = platform.clone();
            let device = device.clone();
            async move { platform.connect(&device, auto_reconnect).await }.boxed()
        })
    }
}
