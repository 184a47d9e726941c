//! Scan-driven device registry
//! One entry per device identity, updated in place by every observation so
//! the entry's connection slot survives rescans.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::debug;
use tokio::sync::watch;

use crate::core::bluetooth::connection::ConnectionSlot;
use crate::core::bluetooth::types::{DeviceId, DeviceSnapshot, ScanResult};

/// Registry entry for one peripheral
pub struct DeviceEntry<C> {
    id: DeviceId,
    scan_result: RwLock<ScanResult>,
    slot: Arc<ConnectionSlot<C>>,
}

impl<C> DeviceEntry<C> {
    fn new(scan_result: ScanResult) -> Self {
        Self {
            id: scan_result.device_id.clone(),
            scan_result: RwLock::new(scan_result),
            slot: Arc::new(ConnectionSlot::new()),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// The most recent observation of this device
    pub fn scan_result(&self) -> ScanResult {
        self.scan_result
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn slot(&self) -> &Arc<ConnectionSlot<C>> {
        &self.slot
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.scan_result()
    }

    fn replace_scan_result(&self, scan_result: ScanResult) {
        *self
            .scan_result
            .write()
            .unwrap_or_else(PoisonError::into_inner) = scan_result;
    }
}

/// Map of device identity to entry, published as a most-recent-wins list.
pub struct DeviceRegistry<C> {
    devices: Mutex<HashMap<DeviceId, Arc<DeviceEntry<C>>>>,
    snapshots: watch::Sender<Vec<DeviceSnapshot>>,
}

impl<C> Default for DeviceRegistry<C> {
    fn default() -> Self {
        let (snapshots, _) = watch::channel(Vec::new());
        Self {
            devices: Mutex::new(HashMap::new()),
            snapshots,
        }
    }
}

impl<C> DeviceRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts an observation and publishes the full entry list.
    pub fn on_scan_result(&self, result: ScanResult) {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        match devices.get(&result.device_id) {
            Some(entry) => entry.replace_scan_result(result),
            None => {
                debug!("New device discovered: {}", result.device_id);
                devices.insert(result.device_id.clone(), Arc::new(DeviceEntry::new(result)));
            }
        }
        // Published under the map lock so the latest publication always
        // reflects the latest upsert.
        self.snapshots.send_replace(Self::collect(&devices));
    }

    pub fn get_entry(&self, id: &DeviceId) -> Option<Arc<DeviceEntry<C>>> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Late subscribers immediately see the latest list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<DeviceSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry; only done when the controller shuts down.
    pub fn clear(&self) {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        devices.clear();
        self.snapshots.send_replace(Vec::new());
    }

    fn collect(devices: &HashMap<DeviceId, Arc<DeviceEntry<C>>>) -> Vec<DeviceSnapshot> {
        let mut list: Vec<DeviceSnapshot> = devices.values().map(|entry| entry.snapshot()).collect();
        list.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::connection::SharedConnection;
    use crate::core::bluetooth::fake::{FakeConnection, FakePlatform};
    use crate::core::bluetooth::platform::BlePlatform;
    use futures_util::FutureExt;

    fn observation(id: &str, rssi: i16) -> ScanResult {
        ScanResult::new(DeviceId::from(id), None, rssi, vec![0x02, 0x01, 0x06])
    }

    #[test]
    fn repeated_observation_replaces_result_in_place() {
        let registry: DeviceRegistry<FakeConnection> = DeviceRegistry::new();
        registry.on_scan_result(observation("11:22:33:44:55:66", -70));
        registry.on_scan_result(observation("11:22:33:44:55:66", -40));

        let list = registry.snapshot();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].rssi, -40);
    }

    #[test]
    fn late_subscriber_sees_latest_list_only() {
        let registry: DeviceRegistry<FakeConnection> = DeviceRegistry::new();
        registry.on_scan_result(observation("11:22:33:44:55:01", -60));
        registry.on_scan_result(observation("11:22:33:44:55:02", -61));

        let receiver = registry.subscribe();
        let list = receiver.borrow().clone();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].device_id.as_str(), "11:22:33:44:55:01");
    }

    #[test]
    fn unknown_device_lookup_is_none() {
        let registry: DeviceRegistry<FakeConnection> = DeviceRegistry::new();
        assert!(registry.get_entry(&DeviceId::from("nope")).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn rescan_keeps_slot_and_its_occupant() {
        let platform = FakePlatform::new();
        let registry: DeviceRegistry<FakeConnection> = DeviceRegistry::new();
        let id = DeviceId::from("11:22:33:44:55:77");
        registry.on_scan_result(observation(id.as_str(), -70));

        let entry = registry.get_entry(&id).unwrap();
        let connector_platform = platform.clone();
        let connector_id = id.clone();
        let shared = entry.slot().get_or_publish(SharedConnection::new(
            id.clone(),
            entry.slot(),
            Arc::new(move || {
                let platform = connector_platform.clone();
                let id = connector_id.clone();
                async move { platform.connect(&id, false).await }.boxed()
            }),
        ));

        registry.on_scan_result(observation(id.as_str(), -50));
        let again = registry.get_entry(&id).unwrap();
        assert!(Arc::ptr_eq(&entry, &again));
        assert!(Arc::ptr_eq(&again.slot().get().unwrap(), &shared));
        assert_eq!(again.scan_result().rssi, -50);
        assert_eq!(again.id(), &id);
    }

    #[test]
    fn clear_empties_registry_and_publishes() {
        let registry: DeviceRegistry<FakeConnection> = DeviceRegistry::new();
        registry.on_scan_result(observation("11:22:33:44:55:88", -70));
        let receiver = registry.subscribe();
        registry.clear();
        assert!(receiver.borrow().is_empty());
        assert!(registry.is_empty());
    }
}
