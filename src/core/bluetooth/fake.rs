//! Scriptable in-memory platform used by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::manager::{BluetoothController, ControllerOptions};
use crate::core::bluetooth::platform::{
    AdapterEventStream, BleConnection, BlePlatform, NotificationStream, ScanStream,
};
use crate::core::bluetooth::types::{
    AdapterState, ConnectionState, DeviceId, GattCharacteristic, GattService,
    NotificationSetupMode, ScanResult, ScanSettings, property,
};

pub(crate) const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub(crate) const HEART_RATE_MEASUREMENT: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
pub(crate) const BODY_SENSOR_LOCATION: Uuid =
    Uuid::from_u128(0x00002a38_0000_1000_8000_00805f9b34fb);

/// Polls `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Starts a controller on `platform` and waits until `device` is registered.
pub(crate) async fn controller_with_device(
    platform: &FakePlatform,
    device: &DeviceId,
) -> Arc<BluetoothController<FakePlatform>> {
    let controller =
        BluetoothController::start(Arc::new(platform.clone()), ControllerOptions::default()).await;
    wait_until(|| platform.is_scanning()).await;
    platform
        .advertise(ScanResult::new(device.clone(), None, -50, Vec::new()))
        .await;
    wait_until(|| controller.device_entry(device).is_some()).await;
    controller
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    open_links: AtomicUsize,
    max_open_links: AtomicUsize,
    scans_started: AtomicUsize,
    failing_connects: AtomicUsize,
}

struct Script {
    connect_delay: Duration,
    disconnect_delay: Duration,
    read_delay: Duration,
    values: HashMap<Uuid, Vec<u8>>,
    failing_reads: Vec<Uuid>,
    failing_notifications: Vec<Uuid>,
    scan_error: Option<BleError>,
}

struct FakeInner {
    counters: Counters,
    script: Mutex<Script>,
    adapter_state: Mutex<AdapterState>,
    adapter_listeners: Mutex<Vec<mpsc::Sender<AdapterState>>>,
    scan_sender: Mutex<Option<mpsc::Sender<Result<ScanResult, BleError>>>>,
    notifiers: Mutex<HashMap<Uuid, Vec<mpsc::Sender<Result<Vec<u8>, BleError>>>>>,
}

/// Fake platform; clones share state.
#[derive(Clone)]
pub(crate) struct FakePlatform {
    inner: Arc<FakeInner>,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        let values = HashMap::from([
            (BODY_SENSOR_LOCATION, vec![0x01]),
            (HEART_RATE_MEASUREMENT, vec![0x00, 0x48]),
        ]);
        Self {
            inner: Arc::new(FakeInner {
                counters: Counters::default(),
                script: Mutex::new(Script {
                    connect_delay: Duration::ZERO,
                    disconnect_delay: Duration::ZERO,
                    read_delay: Duration::ZERO,
                    values,
                    failing_reads: Vec::new(),
                    failing_notifications: Vec::new(),
                    scan_error: None,
                }),
                adapter_state: Mutex::new(AdapterState::Ready),
                adapter_listeners: Mutex::new(Vec::new()),
                scan_sender: Mutex::new(None),
                notifiers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn with_adapter_state(state: AdapterState) -> Self {
        let platform = Self::new();
        *platform.inner.adapter_state.lock().unwrap() = state;
        platform
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.inner.counters.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnect_count(&self) -> usize {
        self.inner.counters.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn open_links(&self) -> usize {
        self.inner.counters.open_links.load(Ordering::SeqCst)
    }

    pub(crate) fn max_open_links(&self) -> usize {
        self.inner.counters.max_open_links.load(Ordering::SeqCst)
    }

    pub(crate) fn scans_started(&self) -> usize {
        self.inner.counters.scans_started.load(Ordering::SeqCst)
    }

    /// Whether a scan stream is currently held by a consumer.
    pub(crate) fn is_scanning(&self) -> bool {
        self.inner
            .scan_sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub(crate) fn fail_next_connects(&self, count: usize) {
        self.inner
            .counters
            .failing_connects
            .store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_connect_delay(&self, delay: Duration) {
        self.inner.script.lock().unwrap().connect_delay = delay;
    }

    pub(crate) fn set_disconnect_delay(&self, delay: Duration) {
        self.inner.script.lock().unwrap().disconnect_delay = delay;
    }

    pub(crate) fn set_read_delay(&self, delay: Duration) {
        self.inner.script.lock().unwrap().read_delay = delay;
    }

    pub(crate) fn fail_reads_of(&self, uuid: Uuid) {
        self.inner.script.lock().unwrap().failing_reads.push(uuid);
    }

    pub(crate) fn fail_notifications_of(&self, uuid: Uuid) {
        self.inner
            .script
            .lock()
            .unwrap()
            .failing_notifications
            .push(uuid);
    }

    pub(crate) fn fail_next_scan(&self, error: BleError) {
        self.inner.script.lock().unwrap().scan_error = Some(error);
    }

    pub(crate) fn set_adapter_state(&self, state: AdapterState) {
        *self.inner.adapter_state.lock().unwrap() = state;
        self.inner
            .adapter_listeners
            .lock()
            .unwrap()
            .retain(|tx| tx.try_send(state).is_ok());
    }

    /// Delivers one advertisement to the active scan, if any.
    pub(crate) async fn advertise(&self, result: ScanResult) {
        let sender = self.inner.scan_sender.lock().unwrap().clone();
        if let Some(tx) = sender {
            let _ = tx.send(Ok(result)).await;
        }
    }

    /// Terminates the active scan with an error.
    pub(crate) async fn break_scan(&self, error: BleError) {
        let sender = self.inner.scan_sender.lock().unwrap().clone();
        if let Some(tx) = sender {
            let _ = tx.send(Err(error)).await;
        }
    }

    /// Emits a notification value to every subscriber of `uuid`.
    pub(crate) async fn notify(&self, uuid: Uuid, value: Vec<u8>) {
        let senders = self
            .inner
            .notifiers
            .lock()
            .unwrap()
            .get(&uuid)
            .cloned()
            .unwrap_or_default();
        for tx in senders {
            let _ = tx.send(Ok(value.clone())).await;
        }
    }
}

#[async_trait]
impl BlePlatform for FakePlatform {
    type Connection = FakeConnection;

    fn is_adapter_enabled(&self) -> bool {
        !matches!(
            *self.inner.adapter_state.lock().unwrap(),
            AdapterState::NotEnabled | AdapterState::NotAvailable
        )
    }

    async fn adapter_state(&self) -> AdapterState {
        *self.inner.adapter_state.lock().unwrap()
    }

    async fn adapter_events(&self) -> Result<AdapterEventStream, BleError> {
        let (tx, rx) = mpsc::channel(64);
        self.inner.adapter_listeners.lock().unwrap().push(tx);
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn scan(&self, _settings: &ScanSettings) -> Result<ScanStream, BleError> {
        if let Some(error) = self.inner.script.lock().unwrap().scan_error.take() {
            return Err(error);
        }
        let (tx, rx) = mpsc::channel(64);
        *self.inner.scan_sender.lock().unwrap() = Some(tx);
        self.inner
            .counters
            .scans_started
            .fetch_add(1, Ordering::SeqCst);
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn connect(
        &self,
        device: &DeviceId,
        _auto_reconnect: bool,
    ) -> Result<FakeConnection, BleError> {
        let counters = &self.inner.counters;
        counters.connects.fetch_add(1, Ordering::SeqCst);

        let delay = self.inner.script.lock().unwrap().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failing = counters.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            counters.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(BleError::ConnectionFailure {
                device: device.clone(),
                reason: "scripted failure".to_string(),
            });
        }

        let open = counters.open_links.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_open_links.fetch_max(open, Ordering::SeqCst);

        let (state, _) = watch::channel(ConnectionState::Connected);
        Ok(FakeConnection {
            platform: self.clone(),
            state,
        })
    }
}

pub(crate) struct FakeConnection {
    platform: FakePlatform,
    state: watch::Sender<ConnectionState>,
}

impl FakeConnection {
    /// Simulates the peripheral going out of range.
    pub(crate) fn drop_link(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

#[async_trait]
impl BleConnection for FakeConnection {
    async fn discover_services(&self) -> Result<Vec<GattService>, BleError> {
        Ok(vec![GattService {
            uuid: HEART_RATE_SERVICE,
            is_primary: true,
            characteristics: vec![
                GattCharacteristic {
                    uuid: HEART_RATE_MEASUREMENT,
                    service_uuid: HEART_RATE_SERVICE,
                    properties: property::NOTIFY,
                    permissions: 0,
                    descriptor_count: 1,
                },
                GattCharacteristic {
                    uuid: BODY_SENSOR_LOCATION,
                    service_uuid: HEART_RATE_SERVICE,
                    properties: property::READ,
                    permissions: 0,
                    descriptor_count: 0,
                },
            ],
        }])
    }

    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>, BleError> {
        let delay = self.platform.inner.script.lock().unwrap().read_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let script = self.platform.inner.script.lock().unwrap();
        if script.failing_reads.contains(&uuid) {
            return Err(BleError::ReadFailure {
                uuid,
                reason: "scripted failure".to_string(),
            });
        }
        script
            .values
            .get(&uuid)
            .cloned()
            .ok_or(BleError::CharacteristicNotFound(uuid))
    }

    async fn subscribe_notifications(
        &self,
        characteristic: Uuid,
        _mode: NotificationSetupMode,
    ) -> Result<NotificationStream, BleError> {
        if self
            .platform
            .inner
            .script
            .lock()
            .unwrap()
            .failing_notifications
            .contains(&characteristic)
        {
            return Err(BleError::NotificationSetupFailure {
                uuid: characteristic,
                reason: "scripted failure".to_string(),
            });
        }
        let (tx, rx) = mpsc::channel(16);
        self.platform
            .inner
            .notifiers
            .lock()
            .unwrap()
            .entry(characteristic)
            .or_default()
            .push(tx);
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.state.send_replace(ConnectionState::Disconnecting);
        let delay = self.platform.inner.script.lock().unwrap().disconnect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let counters = &self.platform.inner.counters;
        counters.open_links.fetch_sub(1, Ordering::SeqCst);
        counters.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }
}
