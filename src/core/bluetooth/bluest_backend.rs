//! Platform BLE stack backed by `bluest`.
//! Device handles seen while scanning are kept so that later connects can
//! find them by id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluest::{
    Adapter, AdapterEvent, AdvertisingDevice, Characteristic, CharacteristicProperties, Device,
};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::FORWARD_CHANNEL_CAPACITY;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::platform::{
    AdapterEventStream, BleConnection, BlePlatform, NotificationStream, ScanStream,
};
use crate::core::bluetooth::types::{
    AdapterState, BondState, ConnectionState, DeviceId, GattCharacteristic, GattService,
    NotificationSetupMode, ScanResult, ScanSettings, property,
};
use crate::core::scan_record::record::ScanRecord;

/// How long `adapter_state` waits for the adapter to report availability
const ADAPTER_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct BluestPlatform {
    adapter: Adapter,
    /// Map of device ids to the handles seen while scanning
    devices: Arc<Mutex<HashMap<DeviceId, Device>>>,
    /// Bond state per device, read once per sighting and refreshed on connect
    bond_states: BondStates,
    enabled: Arc<AtomicBool>,
    link_poll_interval: Duration,
}

impl BluestPlatform {
    pub async fn new(link_poll_interval: Duration) -> Result<Self, BleError> {
        let adapter = Adapter::default()
            .await
            .ok_or(BleError::AdapterUnavailable)?;
        info!("Bluetooth adapter found.");
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            bond_states: Arc::new(Mutex::new(HashMap::new())),
            enabled: Arc::new(AtomicBool::new(false)),
            link_poll_interval,
        })
    }

    fn known_device(&self, id: &DeviceId) -> Option<Device> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    async fn scan_result(
        devices: &Mutex<HashMap<DeviceId, Device>>,
        bond_states: &BondStates,
        found: AdvertisingDevice,
    ) -> ScanResult {
        let device = found.device;
        let adv_data = found.adv_data;
        let rssi = found.rssi;
        let id = DeviceId::new(device.id().to_string());

        let mut record = ScanRecord {
            service_uuids: adv_data.services.iter().copied().collect(),
            service_data: adv_data
                .service_data
                .iter()
                .map(|(uuid, data)| (*uuid, data.to_vec()))
                .collect(),
            local_name: adv_data.local_name.clone(),
            tx_power_level: adv_data.tx_power_level.map(|level| level as i8),
            ..Default::default()
        };
        if let Some(manufacturer) = adv_data.manufacturer_data {
            record
                .manufacturer_data
                .insert(manufacturer.company_id, manufacturer.data.to_vec());
        }

        let name = adv_data.local_name.or_else(|| device.name().ok());
        let bond_state = cached_bond_state(bond_states, &id, || read_bond_state(&device)).await;

        devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), device);

        let mut result = ScanResult::new(id, name, rssi.unwrap_or(0), record.to_bytes());
        result.bond_state = bond_state;
        result
    }
}

type BondStates = Arc<Mutex<HashMap<DeviceId, BondState>>>;

async fn read_bond_state(device: &Device) -> BondState {
    match device.is_paired().await {
        Ok(true) => BondState::Bonded,
        Ok(false) => BondState::None,
        Err(_) => BondState::Unknown,
    }
}

/// Returns the cached bond state of `id`, running `read` only when the
/// device has none cached yet.
async fn cached_bond_state<F, Fut>(
    cache: &Mutex<HashMap<DeviceId, BondState>>,
    id: &DeviceId,
    read: F,
) -> BondState
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = BondState>,
{
    let cached = cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(id)
        .copied();
    if let Some(state) = cached {
        return state;
    }
    let state = read().await;
    cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id.clone(), state);
    state
}

fn map_adapter_event(event: AdapterEvent) -> AdapterState {
    match event {
        AdapterEvent::Available => AdapterState::Ready,
        AdapterEvent::Unavailable => AdapterState::NotAvailable,
    }
}

#[async_trait]
impl BlePlatform for BluestPlatform {
    type Connection = BluestConnection;

    fn is_adapter_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn adapter_state(&self) -> AdapterState {
        let probe = tokio::time::timeout(ADAPTER_PROBE_TIMEOUT, self.adapter.wait_available());
        let state = match probe.await {
            Ok(Ok(())) => AdapterState::Ready,
            Ok(Err(e)) => {
                warn!("Bluetooth adapter is not available: {}", e);
                AdapterState::NotAvailable
            }
            Err(_) => AdapterState::NotEnabled,
        };
        self.enabled
            .store(state == AdapterState::Ready, Ordering::SeqCst);
        state
    }

    async fn adapter_events(&self) -> Result<AdapterEventStream, BleError> {
        let adapter = self.adapter.clone();
        let enabled = self.enabled.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(FORWARD_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => {
                    let _ = ready_tx.send(Ok(()));
                    events
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(BleError::AdapterUnavailable));
                    error!("Failed to subscribe to adapter events: {}", e);
                    return;
                }
            };
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        let state = map_adapter_event(event);
                        enabled.store(state == AdapterState::Ready, Ordering::SeqCst);
                        if tx.send(state).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error in adapter event stream: {}", e);
                        break;
                    }
                }
            }
        });

        ready_rx.await.map_err(|_| BleError::AdapterUnavailable)??;
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn scan(&self, settings: &ScanSettings) -> Result<ScanStream, BleError> {
        debug!("Scan mode {:?} is left to the platform default.", settings.mode);
        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let bond_states = self.bond_states.clone();
        let service_filter = settings.service_filter.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(FORWARD_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            info!("Starting bluetooth scan");
            let mut scan_stream = match adapter.scan(&service_filter).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(BleError::ScanFailure(e.to_string())));
                    return;
                }
            };
            loop {
                tokio::select! {
                    found = scan_stream.next() => match found {
                        Some(found) => {
                            let result = Self::scan_result(&devices, &bond_states, found).await;
                            if tx.send(Ok(result)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = tx
                                .send(Err(BleError::ScanFailure("scan stream ended".to_string())))
                                .await;
                            break;
                        }
                    },
                    _ = tx.closed() => break,
                }
            }
            info!("Bluetooth scan stopped.");
        });

        ready_rx
            .await
            .map_err(|_| BleError::ScanFailure("scan task ended".to_string()))??;
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn connect(
        &self,
        device_id: &DeviceId,
        auto_reconnect: bool,
    ) -> Result<BluestConnection, BleError> {
        let device = self
            .known_device(device_id)
            .ok_or_else(|| BleError::DeviceNotFound(device_id.clone()))?;
        if auto_reconnect {
            debug!("Auto reconnect is handled by the platform stack for {}", device_id);
        }

        if !device.is_connected().await {
            info!("Initiating connection to {}...", device_id);
            self.adapter
                .connect_device(&device)
                .await
                .map_err(|e| BleError::ConnectionFailure {
                    device: device_id.clone(),
                    reason: e.to_string(),
                })?;
        }
        // Connecting may have paired the device.
        let bond_state = read_bond_state(&device).await;
        self.bond_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.clone(), bond_state);

        Ok(BluestConnection::new(
            self.adapter.clone(),
            device,
            self.link_poll_interval,
        ))
    }
}

fn properties_mask(properties: CharacteristicProperties) -> u8 {
    let mut mask = 0;
    let bits = [
        (properties.broadcast, property::BROADCAST),
        (properties.read, property::READ),
        (properties.write_without_response, property::WRITE_NO_RESPONSE),
        (properties.write, property::WRITE),
        (properties.notify, property::NOTIFY),
        (properties.indicate, property::INDICATE),
        (properties.authenticated_signed_writes, property::SIGNED_WRITE),
        (properties.extended_properties, property::EXTENDED_PROPS),
    ];
    for (set, bit) in bits {
        if set {
            mask |= bit;
        }
    }
    mask
}

pub struct BluestConnection {
    adapter: Adapter,
    device: Device,
    /// Handles from the last discovery, by characteristic uuid
    characteristics: Mutex<HashMap<Uuid, Characteristic>>,
    state: watch::Sender<ConnectionState>,
    poll_cancel: CancellationToken,
}

impl BluestConnection {
    fn new(adapter: Adapter, device: Device, poll_interval: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connected);
        let poll_cancel = CancellationToken::new();
        tokio::spawn(Self::poll_link(
            device.clone(),
            state.clone(),
            poll_interval,
            poll_cancel.clone(),
        ));
        Self {
            adapter,
            device,
            characteristics: Mutex::new(HashMap::new()),
            state,
            poll_cancel,
        }
    }

    async fn poll_link(
        device: Device,
        state: watch::Sender<ConnectionState>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if !device.is_connected().await {
                        info!("Device {} is no longer connected.", device.id());
                        state.send_replace(ConnectionState::Disconnected);
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }

    async fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, BleError> {
        let cached = self
            .characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uuid)
            .cloned();
        if let Some(characteristic) = cached {
            return Ok(characteristic);
        }
        self.discover_services().await?;
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uuid)
            .cloned()
            .ok_or(BleError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl BleConnection for BluestConnection {
    async fn discover_services(&self) -> Result<Vec<GattService>, BleError> {
        info!("Discovering services of {}...", self.device.id());
        let services = self
            .device
            .services()
            .await
            .map_err(|e| BleError::DiscoveryFailure(e.to_string()))?;

        let mut discovered = Vec::with_capacity(services.len());
        let mut handles = HashMap::new();
        for service in services {
            let characteristics = service
                .characteristics()
                .await
                .map_err(|e| BleError::DiscoveryFailure(e.to_string()))?;

            let mut described = Vec::with_capacity(characteristics.len());
            for characteristic in characteristics {
                let properties = match characteristic.properties().await {
                    Ok(properties) => properties_mask(properties),
                    Err(e) => {
                        warn!("Failed to read properties of {}: {}", characteristic.uuid(), e);
                        0
                    }
                };
                let descriptor_count = characteristic
                    .descriptors()
                    .await
                    .map(|descriptors| descriptors.len())
                    .unwrap_or(0);
                described.push(GattCharacteristic {
                    uuid: characteristic.uuid(),
                    service_uuid: service.uuid(),
                    properties,
                    permissions: 0,
                    descriptor_count,
                });
                handles.insert(characteristic.uuid(), characteristic);
            }

            discovered.push(GattService {
                uuid: service.uuid(),
                is_primary: service.is_primary().await.unwrap_or(true),
                characteristics: described,
            });
        }

        *self
            .characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handles;
        Ok(discovered)
    }

    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, BleError> {
        let characteristic = self.characteristic(uuid).await?;
        characteristic
            .read()
            .await
            .map_err(|e| BleError::ReadFailure {
                uuid,
                reason: e.to_string(),
            })
    }

    async fn subscribe_notifications(
        &self,
        characteristic: Uuid,
        mode: NotificationSetupMode,
    ) -> Result<NotificationStream, BleError> {
        if mode != NotificationSetupMode::Default {
            debug!("Notification setup mode {:?} maps to the platform default.", mode);
        }
        let handle = self.characteristic(characteristic).await?;
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(FORWARD_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut notifications = match handle.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(BleError::NotificationSetupFailure {
                        uuid: characteristic,
                        reason: e.to_string(),
                    }));
                    return;
                }
            };
            loop {
                tokio::select! {
                    value = notifications.next() => match value {
                        Some(Ok(value)) => {
                            if tx.send(Ok(value)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = tx
                                .send(Err(BleError::ReadFailure {
                                    uuid: characteristic,
                                    reason: e.to_string(),
                                }))
                                .await;
                            break;
                        }
                        None => break,
                    },
                    _ = tx.closed() => break,
                }
            }
            debug!("Notification forward for {} ended", characteristic);
        });

        ready_rx
            .await
            .map_err(|_| BleError::NotificationSetupFailure {
                uuid: characteristic,
                reason: "notification task ended".to_string(),
            })??;
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.poll_cancel.cancel();
        self.state.send_replace(ConnectionState::Disconnecting);
        let result = if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            self.adapter
                .disconnect_device(&self.device)
                .await
                .map_err(|e| BleError::ConnectionFailure {
                    device: DeviceId::new(self.device.id().to_string()),
                    reason: e.to_string(),
                })
        } else {
            info!("Device {} not connected", self.device.id());
            Ok(())
        };
        self.state.send_replace(ConnectionState::Disconnected);
        result
    }
}

impl Drop for BluestConnection {
    fn drop(&mut self) {
        self.poll_cancel.cancel();
    }
}
