//! Interface the controller needs from the platform BLE stack.
//!
//! The link layer and the GATT wire protocol live behind these traits; the
//! controller only composes connect/discover/read/subscribe primitives.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::types::{
    AdapterState, ConnectionState, DeviceId, GattService, NotificationSetupMode, ScanResult,
    ScanSettings,
};

/// Stream of scan observations; an `Err` item terminates the scan.
pub type ScanStream = BoxStream<'static, Result<ScanResult, BleError>>;

/// Stream of characteristic values delivered by notifications.
pub type NotificationStream = BoxStream<'static, Result<Vec<u8>, BleError>>;

/// Stream of adapter state changes.
pub type AdapterEventStream = BoxStream<'static, AdapterState>;

/// An established link to a single peripheral.
#[async_trait]
pub trait BleConnection: Send + Sync + 'static {
    /// Discovers all services and their characteristics.
    async fn discover_services(&self) -> Result<Vec<GattService>, BleError>;

    /// Reads the current value of a characteristic.
    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, BleError>;

    /// Enables notifications for a characteristic and returns its value stream.
    async fn subscribe_notifications(
        &self,
        characteristic: Uuid,
        mode: NotificationSetupMode,
    ) -> Result<NotificationStream, BleError>;

    /// Observable link state; late subscribers get the current value.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// Closes the physical link.
    async fn disconnect(&self) -> Result<(), BleError>;
}

/// The platform BLE stack.
#[async_trait]
pub trait BlePlatform: Send + Sync + 'static {
    type Connection: BleConnection;

    /// Whether an adapter exists and is powered.
    fn is_adapter_enabled(&self) -> bool;

    /// Current adapter state.
    async fn adapter_state(&self) -> AdapterState;

    /// Subsequent adapter state changes.
    async fn adapter_events(&self) -> Result<AdapterEventStream, BleError>;

    /// Starts a scan; dropping the stream stops it.
    async fn scan(&self, settings: &ScanSettings) -> Result<ScanStream, BleError>;

    /// Opens a link to a device.
    async fn connect(
        &self,
        device: &DeviceId,
        auto_reconnect: bool,
    ) -> Result<Self::Connection, BleError>;
}
