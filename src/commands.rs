//! Explorer commands
//! This module defines the commands the command line can invoke. Each one
//! writes its human-readable output to the given writer.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, Utc};
use log::info;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::explorer_config::ExplorerConfig;
use crate::config::AppConfig;
use crate::core::bluetooth::connection::ConnectionLease;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::manager::BluetoothController;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::platform::{BleConnection, BlePlatform};
use crate::core::bluetooth::types::{DeviceId, GattService, NotificationSetupMode};
use crate::core::describe::{
    characteristic_name, describe_bond_state, describe_characteristic, describe_connection_state,
    describe_service_type, describe_type, format_value, name_or_address, seconds_since_seen, service_name,
};
use crate::core::scan_record::record::uuid_from_short;
use crate::state::AppState;

/// Parses a full UUID or a 16/32-bit short form such as `180f`.
pub fn parse_uuid(text: &str) -> Result<Uuid> {
    let trimmed = text.trim_start_matches("0x");
    if trimmed.len() <= 8 {
        let short = u32::from_str_radix(trimmed, 16)
            .with_context(|| format!("Invalid short UUID: {}", text))?;
        return Ok(uuid_from_short(short));
    }
    Uuid::parse_str(text).with_context(|| format!("Invalid UUID: {}", text))
}

/// Writes the default config to `path`. An existing file is only replaced
/// when `force` is set.
pub async fn init_config<W: Write>(path: &Path, force: bool, out: &mut W) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists, pass --force to overwrite it", path.display());
    }
    ExplorerConfig::default().save_config(path).await?;
    writeln!(out, "Wrote default config to {}", path.display())?;
    Ok(())
}

pub fn show_config<W: Write>(config: &AppConfig, out: &mut W) -> Result<()> {
    let json = serde_json::to_string_pretty(&config.explorer)
        .context("Failed to serialize the config")?;
    writeln!(out, "{}", json)?;
    Ok(())
}

/// Waits until the scanner has registered `device_id`.
pub async fn wait_for_device<P: BlePlatform>(
    controller: &BluetoothController<P>,
    device_id: &DeviceId,
    timeout: Duration,
) -> Result<()> {
    let mut devices = controller.device_list();
    tokio::time::timeout(
        timeout,
        devices.wait_for(|list| list.iter().any(|d| &d.device_id == device_id)),
    )
    .await
    .map_err(|_| anyhow!(BleError::DeviceNotFound(device_id.clone())))?
    .context("Device list closed")?;
    Ok(())
}

/// Scans for `duration` and prints every device seen, with its decoded
/// advertisement.
///
/// # Returns
/// The number of devices listed
pub async fn scan_devices<P: BlePlatform, W: Write>(
    state: &AppState<P>,
    duration: Duration,
    out: &mut W,
) -> Result<usize> {
    let controller = state.controller();
    if !controller.is_adapter_enabled() {
        writeln!(out, "Bluetooth adapter is {:?}", *controller.scan_state().borrow())?;
    }
    info!("Scanning for {:?}...", duration);
    tokio::time::sleep(duration).await;

    let devices = controller.device_list().borrow().clone();
    let now = Utc::now();
    for device in &devices {
        writeln!(
            out,
            "{} [{}] {} dBm, {}, {}, seen {}s ago",
            name_or_address(device),
            device.device_id,
            device.rssi,
            describe_type(device.device_type),
            describe_bond_state(device.bond_state),
            seconds_since_seen(device, now)
        )?;
        for line in controller.describe_scan_record(&device.payload).lines() {
            writeln!(out, "    {}", line)?;
        }
    }
    Ok(devices.len())
}

async fn open<P: BlePlatform>(
    state: &AppState<P>,
    device_id: &DeviceId,
) -> Result<(ConnectionLease<P::Connection>, Vec<GattService>)> {
    let controller = state.controller();
    let timeout = state.config.explorer.operation_timeout();
    wait_for_device(&controller, device_id, timeout).await?;

    let lease = controller.acquire_connection(device_id)?;
    let services = tokio::time::timeout(timeout, lease.discover_services())
        .await
        .with_context(|| format!("Timed out exploring {}", device_id))??;
    Ok((lease, services))
}

/// Connects to a device and prints its services and characteristics,
/// reading every readable value.
pub async fn explore_device<P: BlePlatform, W: Write>(
    state: &AppState<P>,
    device_id: &DeviceId,
    out: &mut W,
) -> Result<()> {
    let (lease, services) = open(state, device_id).await?;
    let link_state = *lease.connection().await?.connection_state().borrow();
    writeln!(
        out,
        "{} (generation {}, {})",
        device_id,
        lease.generation(),
        describe_connection_state(link_state)
    )?;

    let timeout = state.config.explorer.operation_timeout();

    for service in &services {
        let name = service_name(&service.uuid)
            .map(str::to_string)
            .unwrap_or_else(|| service.uuid.to_string());
        writeln!(out, "{} ({})", name, describe_service_type(service.is_primary))?;

        for characteristic in &service.characteristics {
            writeln!(out, "  {}", describe_characteristic(characteristic))?;
            if characteristic.can_read() {
                match tokio::time::timeout(timeout, lease.read_characteristic(characteristic.uuid))
                    .await
                {
                    Ok(Ok(value)) => writeln!(out, "    value: {}", format_value(&value))?,
                    Ok(Err(e)) => writeln!(out, "    read failed: {}", e)?,
                    Err(_) => writeln!(out, "    read timed out")?,
                }
            }
        }
    }
    Ok(())
}

/// Reads one characteristic of one service and prints its value.
pub async fn read_characteristic<P: BlePlatform, W: Write>(
    state: &AppState<P>,
    device_id: &DeviceId,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    out: &mut W,
) -> Result<Vec<u8>> {
    let (lease, services) = open(state, device_id).await?;
    let found = services
        .iter()
        .find(|s| s.uuid == service_uuid)
        .and_then(|s| s.characteristic(characteristic_uuid))
        .ok_or(BleError::CharacteristicNotFound(characteristic_uuid))?;

    let timeout = state.config.explorer.operation_timeout();
    let value = tokio::time::timeout(timeout, lease.read_characteristic(found.uuid))
        .await
        .with_context(|| format!("Timed out reading {}", characteristic_uuid))??;

    let label = characteristic_name(&characteristic_uuid)
        .map(str::to_string)
        .unwrap_or_else(|| characteristic_uuid.to_string());
    writeln!(out, "{}: {}", label, format_value(&value))?;
    Ok(value)
}

/// Prints notifications of a characteristic until `cancel` fires, the link
/// drops, or `limit` values have been printed.
pub async fn watch_characteristic<P: BlePlatform, W: Write>(
    state: &AppState<P>,
    device_id: &DeviceId,
    characteristic_uuid: Uuid,
    limit: Option<usize>,
    cancel: CancellationToken,
    out: &mut W,
) -> Result<usize> {
    let (lease, services) = open(state, device_id).await?;
    let found = services
        .iter()
        .find_map(|s| s.characteristic(characteristic_uuid))
        .ok_or(BleError::CharacteristicNotFound(characteristic_uuid))?;
    if !found.can_notify() {
        bail!("{} does not support notifications", characteristic_uuid);
    }

    let timeout = state.config.explorer.operation_timeout();
    let mut subscription = tokio::time::timeout(
        timeout,
        NotificationHandler::new(NotificationSetupMode::Default)
            .setup_notifications(lease, characteristic_uuid),
    )
    .await
    .with_context(|| format!("Timed out subscribing to {}", characteristic_uuid))??;

    let mut received = 0;
    while limit.is_none_or(|limit| received < limit) {
        let value = tokio::select! {
            _ = cancel.cancelled() => break,
            value = subscription.next() => value,
        };
        match value {
            Some(Ok(value)) => {
                received += 1;
                writeln!(
                    out,
                    "{} {}",
                    Local::now().format("%H:%M:%S%.3f"),
                    format_value(&value)
                )?;
            }
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }
    Ok(received)
}
