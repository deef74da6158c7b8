//! Device discovery.
//!
//! Scans for peripherals advertising the radon service UUID and returns every
//! match seen within the scan window.

use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tracing::info;

use super::TransportError;
use crate::protocol::SERVICE_UUID;

/// A peripheral observed advertising the radon service.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub peripheral: Peripheral,
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
}

/// First available Bluetooth adapter on the host.
pub async fn default_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(TransportError::NoAdapter)
}

/// Scan `adapter` for RD200 devices for the duration of `window`.
pub async fn scan(
    adapter: &Adapter,
    window: Duration,
) -> Result<Vec<DiscoveredDevice>, TransportError> {
    adapter
        .start_scan(ScanFilter {
            services: vec![SERVICE_UUID],
        })
        .await?;
    let mut events = adapter.events().await?;

    let mut found = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let event = match tokio::time::timeout_at(deadline, events.next()).await {
            Ok(Some(event)) => event,
            Ok(None) | Err(_) => break,
        };
        let CentralEvent::DeviceDiscovered(id) = event else {
            continue;
        };
        let peripheral = adapter.peripheral(&id).await?;
        let Some(properties) = peripheral.properties().await? else {
            continue;
        };
        // The scan filter is advisory on some platforms; re-check the
        // advertised services before reporting a match.
        if !properties.services.contains(&SERVICE_UUID) {
            continue;
        }
        info!(address = %properties.address, name = ?properties.local_name, "found RadonEye RD200");
        found.push(DiscoveredDevice {
            name: properties.local_name.clone(),
            address: properties.address.to_string(),
            rssi: properties.rssi,
            peripheral,
        });
    }

    adapter.stop_scan().await?;
    Ok(found)
}
