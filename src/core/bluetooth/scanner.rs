//! Scan state machine
//! Tracks the adapter state and runs the platform scan exactly while the
//! adapter is ready.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::device::DeviceRegistry;
use crate::core::bluetooth::platform::BlePlatform;
use crate::core::bluetooth::types::{AdapterState, ScanSettings};

struct ScanControl {
    /// Last applied "should scan" value; transitions are taken on change only
    should_scan: bool,
    cancel_token: Option<CancellationToken>,
    scan_task_handle: Option<JoinHandle<()>>,
}

pub struct BluetoothScanner<P: BlePlatform> {
    platform: Arc<P>,
    registry: Arc<DeviceRegistry<P::Connection>>,
    settings: ScanSettings,
    min_rssi: Option<i16>,
    state_tx: watch::Sender<AdapterState>,
    control: Mutex<ScanControl>,
}

impl<P: BlePlatform> BluetoothScanner<P> {
    pub fn new(
        platform: Arc<P>,
        registry: Arc<DeviceRegistry<P::Connection>>,
        settings: ScanSettings,
        min_rssi: Option<i16>,
        initial_state: AdapterState,
    ) -> Self {
        let (state_tx, _) = watch::channel(initial_state);
        Self {
            platform,
            registry,
            settings,
            min_rssi,
            state_tx,
            control: Mutex::new(ScanControl {
                should_scan: false,
                cancel_token: None,
                scan_task_handle: None,
            }),
        }
    }

    /// Current adapter state; late subscribers get the latest value.
    pub fn state(&self) -> watch::Receiver<AdapterState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> AdapterState {
        *self.state_tx.borrow()
    }

    pub fn should_scan(&self) -> bool {
        self.current_state().should_scan()
    }

    /// Whether a scan task is currently running.
    pub fn is_scanning(&self) -> bool {
        let control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        control
            .scan_task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Records a new adapter state and starts or stops the scan when
    /// "should scan" changes. Repeated states cause no transition.
    pub fn apply_state(&self, state: AdapterState) {
        self.state_tx.send_replace(state);

        let should_scan = state.should_scan();
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if control.should_scan == should_scan {
            return;
        }
        control.should_scan = should_scan;

        if should_scan {
            self.start_scan(&mut control);
        } else {
            Self::stop_scan(&mut control);
        }
    }

    /// Stops any running scan regardless of adapter state.
    pub fn shutdown(&self) {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        control.should_scan = false;
        Self::stop_scan(&mut control);
    }

    /// Feeds platform adapter events into [`BluetoothScanner::apply_state`]
    /// until `shutdown` fires or the event stream ends.
    pub fn spawn_state_pump(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let scanner = self.clone();
        tokio::spawn(async move {
            let mut events = match scanner.platform.adapter_events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to observe adapter state: {}", e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    event = events.next() => match event {
                        Some(state) => {
                            info!("Adapter state changed: {:?}", state);
                            scanner.apply_state(state);
                        }
                        None => {
                            info!("Adapter event stream has ended.");
                            break;
                        }
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }

    fn start_scan(&self, control: &mut ScanControl) {
        Self::stop_scan(control);

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(Self::internal_scan_task(
            self.platform.clone(),
            self.registry.clone(),
            self.settings.clone(),
            self.min_rssi,
            cancel_token.clone(),
        ));
        control.cancel_token = Some(cancel_token);
        control.scan_task_handle = Some(handle);
        info!("Device scan task started.");
    }

    fn stop_scan(control: &mut ScanControl) {
        if let Some(cancel_token) = control.cancel_token.take() {
            info!("Stopping Bluetooth scan.");
            cancel_token.cancel();
        }
        control.scan_task_handle = None;
    }

    async fn internal_scan_task(
        platform: Arc<P>,
        registry: Arc<DeviceRegistry<P::Connection>>,
        settings: ScanSettings,
        min_rssi: Option<i16>,
        cancel_token: CancellationToken,
    ) {
        let mut scan_stream = tokio::select! {
            stream = platform.scan(&settings) => match stream {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Exception occurred while scanning for BLE devices: {}", e);
                    return;
                }
            },
            _ = cancel_token.cancelled() => return,
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => match result {
                    Some(Ok(scan_result)) => {
                        if min_rssi.is_some_and(|min| scan_result.rssi < min) {
                            continue;
                        }
                        debug!("Found device - {}, RSSI: {}", scan_result.device_id, scan_result.rssi);
                        registry.on_scan_result(scan_result);
                    }
                    Some(Err(e)) => {
                        error!("Exception occurred while scanning for BLE devices: {}", e);
                        break;
                    }
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    }
                },
                _ = cancel_token.cancelled() => {
                    debug!("Scan task cancelled.");
                    break;
                }
            }
        }
    }
}
