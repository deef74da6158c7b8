//! btleplug-backed GATT link.
//!
//! Resolves the three radon service characteristics after connect and routes
//! the peripheral's merged notification stream to whichever sink is armed for
//! each characteristic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{GattLink, LinkHandle, NotificationSink, TransportError};
use crate::protocol::{CONTROL_UUID, LOG_UUID, MEAS_UUID};

/// Tuning for connection establishment.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Attempts for the notification subscription, which can fail right after
    /// connect while the link settles.
    pub subscribe_attempts: u32,
    /// Delay between subscription attempts.
    pub subscribe_retry_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            subscribe_attempts: 3,
            subscribe_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Resolved characteristics of the radon service.
#[derive(Debug, Clone)]
struct ServiceChars {
    control: Characteristic,
    response: Characteristic,
    log: Characteristic,
}

/// GATT link over a btleplug peripheral.
pub struct BleLink {
    peripheral: Peripheral,
    config: LinkConfig,
    chars: Mutex<Option<ServiceChars>>,
    sinks: Arc<Mutex<HashMap<Uuid, NotificationSink>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BleLink {
    pub fn new(peripheral: Peripheral) -> Self {
        Self::with_config(peripheral, LinkConfig::default())
    }

    pub fn with_config(peripheral: Peripheral, config: LinkConfig) -> Self {
        Self {
            peripheral,
            config,
            chars: Mutex::new(None),
            sinks: Arc::new(Mutex::new(HashMap::new())),
            dispatcher: Mutex::new(None),
        }
    }

    fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicMissing { uuid })
    }

    fn characteristic(&self, handle: LinkHandle) -> Result<Characteristic, TransportError> {
        let chars = self.chars.lock().map_err(|_| TransportError::Poisoned)?;
        let chars = chars.as_ref().ok_or(TransportError::NotConnected)?;
        let characteristic = match handle {
            LinkHandle::Control => &chars.control,
            LinkHandle::Response => &chars.response,
            LinkHandle::Log => &chars.log,
        };
        Ok(characteristic.clone())
    }

    /// Start the task that drains the merged notification stream and routes
    /// each value to the sink armed for its characteristic.
    async fn spawn_dispatcher(&self) -> Result<(), TransportError> {
        let mut notifications = self.peripheral.notifications().await?;
        let sinks = Arc::clone(&self.sinks);
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let mut sinks = match sinks.lock() {
                    Ok(sinks) => sinks,
                    Err(_) => {
                        warn!("sink table poisoned, stopping dispatcher");
                        return;
                    }
                };
                match sinks.get_mut(&notification.uuid) {
                    Some(sink) => sink(notification.value),
                    None => debug!(
                        uuid = %notification.uuid,
                        "notification with no armed listener"
                    ),
                }
            }
            debug!("notification stream ended");
        });

        let mut dispatcher = self
            .dispatcher
            .lock()
            .map_err(|_| TransportError::Poisoned)?;
        if let Some(old) = dispatcher.replace(task) {
            old.abort();
        }
        Ok(())
    }

    fn stop_dispatcher(&self) {
        match self.dispatcher.lock() {
            Ok(mut dispatcher) => {
                if let Some(task) = dispatcher.take() {
                    task.abort();
                }
            }
            Err(_) => warn!("dispatcher lock poisoned"),
        }
    }
}

#[async_trait]
impl GattLink for BleLink {
    async fn connect(&self) -> Result<bool, TransportError> {
        self.peripheral.connect().await?;
        self.peripheral.discover_services().await?;

        let resolved = ServiceChars {
            control: self.find_characteristic(CONTROL_UUID)?,
            response: self.find_characteristic(MEAS_UUID)?,
            log: self.find_characteristic(LOG_UUID)?,
        };
        *self.chars.lock().map_err(|_| TransportError::Poisoned)? = Some(resolved);

        self.spawn_dispatcher().await?;
        debug!(address = %self.peripheral.address(), "radon service resolved");
        Ok(true)
    }

    async fn disconnect(&self) -> Result<bool, TransportError> {
        self.stop_dispatcher();
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.clear();
        }
        if let Ok(mut chars) = self.chars.lock() {
            *chars = None;
        }
        self.peripheral.disconnect().await?;
        Ok(true)
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    fn address(&self) -> String {
        self.peripheral.address().to_string()
    }

    async fn write(&self, handle: LinkHandle, bytes: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.characteristic(handle)?;
        let write_type = if characteristic
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        self.peripheral
            .write(&characteristic, bytes, write_type)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        handle: LinkHandle,
        sink: NotificationSink,
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic(handle)?;
        {
            let mut sinks = self.sinks.lock().map_err(|_| TransportError::Poisoned)?;
            if sinks.insert(characteristic.uuid, sink).is_some() {
                warn!(uuid = %characteristic.uuid, "replacing an armed notification sink");
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.peripheral.subscribe(&characteristic).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.config.subscribe_attempts => {
                    warn!(%err, attempt, "notification subscribe failed, retrying");
                    tokio::time::sleep(self.config.subscribe_retry_delay).await;
                }
                Err(err) => {
                    if let Ok(mut sinks) = self.sinks.lock() {
                        sinks.remove(&characteristic.uuid);
                    }
                    return Err(err.into());
                }
            }
        }
    }

    async fn unsubscribe(&self, handle: LinkHandle) -> Result<(), TransportError> {
        let characteristic = self.characteristic(handle)?;
        match self.sinks.lock() {
            Ok(mut sinks) => {
                sinks.remove(&characteristic.uuid);
            }
            Err(_) => warn!("sink table poisoned during disarm"),
        }
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        self.stop_dispatcher();
    }
}
